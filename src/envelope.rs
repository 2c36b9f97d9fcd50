//! Self-describing image payloads exchanged with clients.
//!
//! An envelope is a data URL of the form `data:image/<type>;base64,<body>`.
//! Parsing checks the prefix, decodes the body and sniffs the decoded bytes so
//! that only real images reach the detector.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::{fmt, path::Path};
use thiserror::Error;

const DATA_PREFIX: &str = "data:";
const BASE64_MARKER: &str = "base64";

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("payload is not a data URL")]
    MissingPrefix,
    #[error("unsupported media type `{0}`")]
    UnsupportedMediaType(String),
    #[error("data URL is not base64 encoded")]
    NotBase64,
    #[error("data URL body is empty")]
    EmptyBody,
    #[error("invalid base64 body: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("decoded body is not a recognized image")]
    NotAnImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
    Bmp,
    Gif,
}

impl ImageFormat {
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.to_ascii_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/webp" => Some(Self::Webp),
            "image/bmp" => Some(Self::Bmp),
            "image/gif" => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?;
        match extension.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            "bmp" => Some(Self::Bmp),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
            Self::Gif => "image/gif",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
            Self::Gif => "gif",
        }
    }

    /// Identifies the format from the leading magic bytes.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        match image::guess_format(data).ok()? {
            image::ImageFormat::Png => Some(Self::Png),
            image::ImageFormat::Jpeg => Some(Self::Jpeg),
            image::ImageFormat::WebP => Some(Self::Webp),
            image::ImageFormat::Bmp => Some(Self::Bmp),
            image::ImageFormat::Gif => Some(Self::Gif),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    format: ImageFormat,
    data: Vec<u8>,
}

impl Envelope {
    pub fn new(format: ImageFormat, data: Vec<u8>) -> Self {
        Self { format, data }
    }

    pub fn parse(input: &str) -> Result<Self, EnvelopeError> {
        let rest = input
            .strip_prefix(DATA_PREFIX)
            .ok_or(EnvelopeError::MissingPrefix)?;
        let (header, body) = rest.split_once(',').ok_or(EnvelopeError::MissingPrefix)?;

        let mut params = header.split(';');
        let mime = params.next().unwrap_or_default();
        let declared = ImageFormat::from_mime(mime)
            .ok_or_else(|| EnvelopeError::UnsupportedMediaType(mime.to_string()))?;
        if !params.any(|p| p.eq_ignore_ascii_case(BASE64_MARKER)) {
            return Err(EnvelopeError::NotBase64);
        }

        if body.is_empty() {
            return Err(EnvelopeError::EmptyBody);
        }
        let data = STANDARD.decode(body)?;
        if data.is_empty() {
            return Err(EnvelopeError::EmptyBody);
        }

        let format = ImageFormat::sniff(&data).ok_or(EnvelopeError::NotAnImage)?;
        if format != declared {
            tracing::debug!(
                "Envelope declared {} but carries {}",
                declared.mime(),
                format.mime()
            );
        }

        Ok(Self { format, data })
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn to_data_url(&self) -> String {
        format!(
            "{}{};{},{}",
            DATA_PREFIX,
            self.format.mime(),
            BASE64_MARKER,
            STANDARD.encode(&self.data)
        )
    }
}

// Payloads can be megabytes; keep them out of debug output.
impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("format", &self.format)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    pub(crate) fn png_pixel(rgb: [u8; 3]) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(1, 1, Rgb(rgb));
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_parse_png_data_url() {
        let png = png_pixel([255, 0, 0]);
        let url = format!("data:image/png;base64,{}", STANDARD.encode(&png));

        let envelope = Envelope::parse(&url).unwrap();

        assert_eq!(envelope.format(), ImageFormat::Png);
        assert_eq!(envelope.data(), png.as_slice());
        assert_eq!(envelope.to_data_url(), url);
    }

    #[test]
    fn test_sniffed_format_wins_over_declared() {
        let png = png_pixel([0, 0, 255]);
        let url = format!("data:image/jpeg;base64,{}", STANDARD.encode(&png));

        let envelope = Envelope::parse(&url).unwrap();

        assert_eq!(envelope.format(), ImageFormat::Png);
    }

    #[test]
    fn test_malformed_payloads_are_rejected() {
        let png = STANDARD.encode(png_pixel([0, 255, 0]));

        assert!(matches!(
            Envelope::parse("not-an-image"),
            Err(EnvelopeError::MissingPrefix)
        ));
        assert!(matches!(
            Envelope::parse("data:image/png;base64"),
            Err(EnvelopeError::MissingPrefix)
        ));
        assert!(matches!(
            Envelope::parse("data:image/png;base64,"),
            Err(EnvelopeError::EmptyBody)
        ));
        assert!(matches!(
            Envelope::parse(&format!("data:text/plain;base64,{}", png)),
            Err(EnvelopeError::UnsupportedMediaType(_))
        ));
        assert!(matches!(
            Envelope::parse(&format!("data:image/png,{}", png)),
            Err(EnvelopeError::NotBase64)
        ));
        assert!(matches!(
            Envelope::parse("data:image/png;base64,@@@@"),
            Err(EnvelopeError::InvalidBase64(_))
        ));
        assert!(matches!(
            Envelope::parse(&format!(
                "data:image/png;base64,{}",
                STANDARD.encode(b"plain text")
            )),
            Err(EnvelopeError::NotAnImage)
        ));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            ImageFormat::from_path(Path::new("results/a-1.JPG")),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(ImageFormat::from_path(Path::new("results/a-1")), None);
    }
}
