use crate::{config::StorageConfig, envelope::ImageFormat};
use std::{io, path::PathBuf};
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

/// Transient on-disk locations for a single frame round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameArtifacts {
    pub source: PathBuf,
    pub output: PathBuf,
}

/// Directory pair shared with the detector process.
///
/// Every artifact is keyed by session id and sequence number, so concurrent
/// sessions never write or read each other's files.
#[derive(Debug, Clone)]
pub struct FrameStore {
    frames_dir: PathBuf,
    results_dir: PathBuf,
}

impl FrameStore {
    /// Creates both directories if needed and resolves them to absolute paths,
    /// so the detector can run from any working directory.
    pub async fn open(config: &StorageConfig) -> io::Result<Self> {
        fs::create_dir_all(&config.frames_dir).await?;
        fs::create_dir_all(&config.results_dir).await?;

        Ok(Self {
            frames_dir: fs::canonicalize(&config.frames_dir).await?,
            results_dir: fs::canonicalize(&config.results_dir).await?,
        })
    }

    pub fn artifacts(&self, session_id: &Uuid, seq: u64, format: ImageFormat) -> FrameArtifacts {
        let file_name = format!("{}-{}.{}", session_id.simple(), seq, format.extension());
        FrameArtifacts {
            source: self.frames_dir.join(&file_name),
            output: self.results_dir.join(file_name),
        }
    }

    /// Writes the source image and syncs it before returning.
    pub async fn write_source(&self, artifacts: &FrameArtifacts, data: &[u8]) -> io::Result<()> {
        let mut file = fs::File::create(&artifacts.source).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(())
    }

    pub async fn read_output(&self, artifacts: &FrameArtifacts) -> io::Result<Vec<u8>> {
        fs::read(&artifacts.output).await
    }

    pub async fn cleanup(&self, artifacts: &FrameArtifacts) {
        for path in [&artifacts.source, &artifacts.output] {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn store_config(root: &Path) -> StorageConfig {
        StorageConfig {
            frames_dir: root.join("frames"),
            results_dir: root.join("results"),
        }
    }

    #[tokio::test]
    async fn test_artifacts_are_unique_per_session_and_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::open(&store_config(dir.path())).await.unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let first = store.artifacts(&a, 0, ImageFormat::Png);
        let second = store.artifacts(&a, 1, ImageFormat::Png);
        let other = store.artifacts(&b, 0, ImageFormat::Png);

        assert_ne!(first.source, second.source);
        assert_ne!(first.source, other.source);
        assert_ne!(first.output, other.output);
        assert_eq!(first.source.file_name(), first.output.file_name());
        assert!(first.source.is_absolute());
    }

    #[tokio::test]
    async fn test_write_then_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::open(&store_config(dir.path())).await.unwrap();
        let artifacts = store.artifacts(&Uuid::new_v4(), 3, ImageFormat::Jpeg);

        store.write_source(&artifacts, b"frame").await.unwrap();
        fs::write(&artifacts.output, b"result").await.unwrap();
        assert_eq!(store.read_output(&artifacts).await.unwrap(), b"result");

        store.cleanup(&artifacts).await;
        assert!(!artifacts.source.exists());
        assert!(!artifacts.output.exists());

        // Missing files are not an error.
        store.cleanup(&artifacts).await;
    }
}
