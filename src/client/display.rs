use crate::envelope::Envelope;
use std::{fs, io, path::PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("Failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Where received annotated frames end up.
pub trait ResultSink {
    fn show(&mut self, frame: &Envelope) -> Result<(), DisplayError>;
}

/// Keeps the latest annotated frame on disk. The extension follows the frame
/// format, so `processed/latest` becomes `processed/latest.jpg` for a JPEG.
#[derive(Debug)]
pub struct FileSink {
    base: PathBuf,
    last_written: Option<PathBuf>,
}

impl FileSink {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            last_written: None,
        }
    }

    pub fn last_written(&self) -> Option<&PathBuf> {
        self.last_written.as_ref()
    }
}

impl ResultSink for FileSink {
    fn show(&mut self, frame: &Envelope) -> Result<(), DisplayError> {
        let path = self.base.with_extension(frame.format().extension());
        let write_err = |source: io::Error| DisplayError::Write {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        // Readers never see a half-written image.
        let staging = path.with_extension("partial");
        fs::write(&staging, frame.data()).map_err(write_err)?;
        fs::rename(&staging, &path).map_err(write_err)?;

        tracing::info!("Processed frame written to {}", path.display());
        self.last_written = Some(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ImageFormat;

    #[test]
    fn test_file_sink_uses_format_extension() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(dir.path().join("out/latest"));

        sink.show(&Envelope::new(ImageFormat::Jpeg, vec![1, 2, 3]))
            .unwrap();

        let written = dir.path().join("out/latest.jpg");
        assert_eq!(sink.last_written(), Some(&written));
        assert_eq!(fs::read(written).unwrap(), vec![1, 2, 3]);
        assert!(!dir.path().join("out/latest.partial").exists());
    }
}
