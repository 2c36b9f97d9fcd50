use super::source::{CaptureError, DeviceInfo, FrameSource};
use crate::envelope::{Envelope, ImageFormat};
use opencv::{core::Mat, core::Vector, imgcodecs, prelude::*, videoio};

impl From<opencv::Error> for CaptureError {
    fn from(err: opencv::Error) -> Self {
        CaptureError::ReadFrameFailed(err.to_string())
    }
}

/// OpenCV video capture devices, addressed by index (`"0"`, `"1"`, ...).
pub struct CameraSource {
    max_probe: i32,
    capture: Option<(i32, videoio::VideoCapture)>,
}

impl CameraSource {
    pub fn new(max_probe: i32) -> Self {
        Self {
            max_probe,
            capture: None,
        }
    }

    fn parse_index(device_id: &str) -> Result<i32, CaptureError> {
        device_id
            .parse::<i32>()
            .ok()
            .filter(|index| *index >= 0)
            .ok_or_else(|| CaptureError::UnknownDevice(device_id.to_string()))
    }
}

fn label(index: i32) -> String {
    format!("Camera {}", index + 1)
}

impl FrameSource for CameraSource {
    fn devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        let mut devices = Vec::new();
        for index in 0..self.max_probe {
            let open = match &self.capture {
                Some((selected, _)) if *selected == index => true,
                _ => videoio::VideoCapture::new(index, videoio::CAP_ANY)
                    .and_then(|cam| cam.is_opened())
                    .unwrap_or(false),
            };
            if open {
                devices.push(DeviceInfo {
                    device_id: index.to_string(),
                    label: label(index),
                });
            }
        }
        Ok(devices)
    }

    fn select(&mut self, device_id: &str) -> Result<(), CaptureError> {
        self.capture = None;
        let index = Self::parse_index(device_id)?;

        let capture = videoio::VideoCapture::new(index, videoio::CAP_ANY).map_err(|e| {
            CaptureError::AccessDenied {
                device: label(index),
                reason: e.to_string(),
            }
        })?;
        if !capture.is_opened()? {
            return Err(CaptureError::AccessDenied {
                device: label(index),
                reason: "device could not be opened".to_string(),
            });
        }

        self.capture = Some((index, capture));
        Ok(())
    }

    fn capture(&mut self) -> Result<Envelope, CaptureError> {
        let (_, cam) = self.capture.as_mut().ok_or(CaptureError::NoDeviceSelected)?;

        let mut frame = Mat::default();
        if !cam.read(&mut frame)? || frame.empty() {
            return Err(CaptureError::ReadFrameFailed("empty frame".to_string()));
        }

        let mut buf = Vector::<u8>::new();
        imgcodecs::imencode(".png", &frame, &mut buf, &Vector::new())
            .map_err(|e| CaptureError::EncodeFrameFailed(e.to_string()))?;

        Ok(Envelope::new(ImageFormat::Png, buf.into()))
    }
}
