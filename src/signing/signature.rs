//! Signature image handling

use crate::error::{Error, Result};
use base64::Engine;
use std::io::Cursor;
use uuid::Uuid;

/// A drawn or uploaded signature, PNG or JPEG.
///
/// Immutable once created. Redrawing the signature creates a new image with
/// a new id, so the compositor can embed each distinct image exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureImage {
    id: Uuid,
    bytes: Vec<u8>,
    width: u32,
    height: u32,
}

impl SignatureImage {
    /// Wrap raw image bytes, reading the natural pixel size from the header.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let reader = image::ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .map_err(|e| Error::ImageDecode {
                reason: format!("Failed to read signature header: {}", e),
            })?;

        match reader.format() {
            Some(image::ImageFormat::Png) | Some(image::ImageFormat::Jpeg) => {}
            other => {
                return Err(Error::ImageDecode {
                    reason: format!("Unsupported signature format: {:?}", other),
                })
            }
        }

        let (width, height) = reader.into_dimensions().map_err(|e| Error::ImageDecode {
            reason: format!("Failed to read signature dimensions: {}", e),
        })?;

        if width == 0 || height == 0 {
            return Err(Error::ImageDecode {
                reason: "Signature image is empty".to_string(),
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            bytes,
            width,
            height,
        })
    }

    /// Parse a `data:image/png;base64,...` URL or a bare base64 string.
    pub fn from_data_url(input: &str) -> Result<Self> {
        let payload = match input.strip_prefix("data:") {
            Some(rest) => {
                let (header, data) = rest.split_once(',').ok_or_else(|| Error::ImageDecode {
                    reason: "Malformed data URL".to_string(),
                })?;
                if !header.ends_with(";base64") {
                    return Err(Error::ImageDecode {
                        reason: format!("Data URL is not base64 encoded: {}", header),
                    });
                }
                data
            }
            None => input,
        };

        let bytes = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
        Self::from_bytes(bytes)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Natural width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Natural height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }
}
