use crate::envelope::{Envelope, ImageFormat};
use image::ImageReader;
use serde::Serialize;
use std::{
    fs, io,
    io::Cursor,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Access to capture device `{device}` denied: {reason}")]
    AccessDenied { device: String, reason: String },
    #[error("Unknown capture device `{0}`")]
    UnknownDevice(String),
    #[error("No capture device selected")]
    NoDeviceSelected,
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(String),
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(String),
}

impl CaptureError {
    pub fn is_access_denied(&self) -> bool {
        matches!(self, CaptureError::AccessDenied { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub label: String,
}

/// A live frame source the client can enumerate, select and grab from.
pub trait FrameSource {
    /// Lists the devices currently available. Has no side effects.
    fn devices(&self) -> Result<Vec<DeviceInfo>, CaptureError>;

    /// Swaps the live capture to `device_id`. The previous handle is released
    /// before the new one is opened, even if opening fails.
    fn select(&mut self, device_id: &str) -> Result<(), CaptureError>;

    /// Grabs the current frame from the selected device.
    fn capture(&mut self) -> Result<Envelope, CaptureError>;
}

/// Treats every image file in a directory as a device.
///
/// The selected file is re-read on every capture, so overwriting it stands in
/// for a live feed. Frames are re-encoded as PNG.
#[derive(Debug)]
pub struct DirectorySource {
    root: PathBuf,
    selected: Option<PathBuf>,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            selected: None,
        }
    }

    pub fn selected(&self) -> Option<&Path> {
        self.selected.as_deref()
    }
}

fn access_error(device: &str, e: io::Error) -> CaptureError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => CaptureError::AccessDenied {
            device: device.to_string(),
            reason: e.to_string(),
        },
        io::ErrorKind::NotFound => CaptureError::UnknownDevice(device.to_string()),
        _ => CaptureError::ReadFrameFailed(e.to_string()),
    }
}

impl FrameSource for DirectorySource {
    fn devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        let root = self.root.display().to_string();
        let entries = fs::read_dir(&self.root).map_err(|e| access_error(&root, e))?;

        let mut devices: Vec<DeviceInfo> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && ImageFormat::from_path(path).is_some())
            .filter_map(|path| {
                let device_id = path.file_name()?.to_str()?.to_string();
                let label = path.file_stem()?.to_str()?.to_string();
                Some(DeviceInfo { device_id, label })
            })
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));

        Ok(devices)
    }

    fn select(&mut self, device_id: &str) -> Result<(), CaptureError> {
        self.selected = None;

        let name = Path::new(device_id);
        if name.components().count() != 1 || name.file_name().is_none() {
            return Err(CaptureError::UnknownDevice(device_id.to_string()));
        }
        let path = self.root.join(name);
        if ImageFormat::from_path(&path).is_none() {
            return Err(CaptureError::UnknownDevice(device_id.to_string()));
        }
        fs::File::open(&path).map_err(|e| access_error(device_id, e))?;

        self.selected = Some(path);
        Ok(())
    }

    fn capture(&mut self) -> Result<Envelope, CaptureError> {
        let path = self.selected.as_ref().ok_or(CaptureError::NoDeviceSelected)?;
        let device = path.display().to_string();

        let frame = ImageReader::open(path)
            .map_err(|e| access_error(&device, e))?
            .with_guessed_format()
            .map_err(|e| CaptureError::ReadFrameFailed(e.to_string()))?
            .decode()
            .map_err(|e| CaptureError::ReadFrameFailed(e.to_string()))?;

        let mut cursor = Cursor::new(Vec::new());
        frame
            .write_to(&mut cursor, image::ImageFormat::Png)
            .map_err(|e| CaptureError::EncodeFrameFailed(e.to_string()))?;

        Ok(Envelope::new(ImageFormat::Png, cursor.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::tests::png_pixel;

    fn populated_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("front.png"), png_pixel([1, 2, 3])).unwrap();
        fs::write(dir.path().join("back.png"), png_pixel([4, 5, 6])).unwrap();
        fs::write(dir.path().join("notes.txt"), b"not a camera").unwrap();
        dir
    }

    #[test]
    fn test_devices_lists_images_only() {
        let dir = populated_dir();
        let source = DirectorySource::new(dir.path());

        let devices = source.devices().unwrap();

        assert_eq!(
            devices,
            vec![
                DeviceInfo {
                    device_id: "back.png".to_string(),
                    label: "back".to_string(),
                },
                DeviceInfo {
                    device_id: "front.png".to_string(),
                    label: "front".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_capture_requires_selection() {
        let dir = populated_dir();
        let mut source = DirectorySource::new(dir.path());

        assert!(matches!(
            source.capture(),
            Err(CaptureError::NoDeviceSelected)
        ));

        source.select("front.png").unwrap();
        let frame = source.capture().unwrap();
        assert_eq!(frame.format(), ImageFormat::Png);
        assert!(!frame.data().is_empty());
    }

    #[test]
    fn test_failed_select_invalidates_previous_device() {
        let dir = populated_dir();
        let mut source = DirectorySource::new(dir.path());
        source.select("front.png").unwrap();

        assert!(matches!(
            source.select("../escape.png"),
            Err(CaptureError::UnknownDevice(_))
        ));
        assert!(source.selected().is_none());
        assert!(matches!(
            source.select("missing.png"),
            Err(CaptureError::UnknownDevice(_))
        ));
        assert!(matches!(
            source.select("notes.txt"),
            Err(CaptureError::UnknownDevice(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_device_is_access_denied() {
        use std::os::unix::fs::PermissionsExt;

        let dir = populated_dir();
        let path = dir.path().join("front.png");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::File::open(&path).is_ok() {
            // Running as root; permissions are not enforced.
            return;
        }

        let mut source = DirectorySource::new(dir.path());
        let err = source.select("front.png").unwrap_err();

        assert!(err.is_access_denied());
    }
}
