use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use tracing::debug;

use crate::app::Result;

pub const MAX_PHOTO_DIMENSION: u32 = 2048;
pub const MAX_PHOTO_BYTES: usize = 10_000_000;
const INITIAL_QUALITY: u8 = 90;
const QUALITY_STEP: u8 = 10;
const MIN_QUALITY: u8 = 10;

/// Image bytes ready for upload.
#[derive(Debug, Clone)]
pub struct PreparedPhoto {
    pub data: Vec<u8>,
    pub mime: &'static str,
    pub file_name: &'static str,
}

/// Normalizes downloaded images into something the photo upload accepts.
#[derive(Debug, Clone)]
pub struct PhotoTranscoder {
    max_dimension: u32,
    max_bytes: usize,
}

impl Default for PhotoTranscoder {
    fn default() -> Self {
        Self {
            max_dimension: MAX_PHOTO_DIMENSION,
            max_bytes: MAX_PHOTO_BYTES,
        }
    }
}

impl PhotoTranscoder {
    pub fn with_limits(max_dimension: u32, max_bytes: usize) -> Self {
        Self {
            max_dimension,
            max_bytes,
        }
    }

    /// JPEG and PNG sources within the limits pass through untouched.
    /// Everything else is scaled down if needed and re-encoded as JPEG,
    /// lowering the quality until the size fits or the floor is reached.
    pub fn prepare(&self, bytes: Vec<u8>) -> Result<PreparedPhoto> {
        let format = image::guess_format(&bytes)?;
        let img = image::load_from_memory_with_format(&bytes, format)?;
        let oversized = img.width() > self.max_dimension || img.height() > self.max_dimension;

        if !oversized && bytes.len() <= self.max_bytes {
            match format {
                ImageFormat::Jpeg => return Ok(jpeg(bytes)),
                ImageFormat::Png => {
                    return Ok(PreparedPhoto {
                        data: bytes,
                        mime: "image/png",
                        file_name: "photo.png",
                    })
                }
                _ => {}
            }
        }

        let img = if oversized {
            let (width, height) = fit_within(img.width(), img.height(), self.max_dimension);
            debug!(from = ?(img.width(), img.height()), to = ?(width, height), "resizing photo");
            img.resize_exact(width, height, FilterType::Lanczos3)
        } else {
            img
        };

        self.encode_jpeg(&img)
    }

    fn encode_jpeg(&self, img: &DynamicImage) -> Result<PreparedPhoto> {
        let rgb = img.to_rgb8();
        let mut quality = INITIAL_QUALITY;

        loop {
            let mut buf = Cursor::new(Vec::new());
            JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&rgb)?;
            let data = buf.into_inner();

            if data.len() <= self.max_bytes || quality <= MIN_QUALITY {
                debug!(quality, bytes = data.len(), "encoded photo");
                return Ok(jpeg(data));
            }
            quality = quality.saturating_sub(QUALITY_STEP).max(MIN_QUALITY);
        }
    }
}

fn jpeg(data: Vec<u8>) -> PreparedPhoto {
    PreparedPhoto {
        data,
        mime: "image/jpeg",
        file_name: "photo.jpg",
    }
}

/// Scale so the larger side equals `max`, keeping the aspect ratio and
/// rounding the other side up.
fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    let larger = u64::from(width.max(height));
    let scale = |side: u32| {
        let scaled = (u64::from(side) * u64::from(max)).div_ceil(larger);
        u32::try_from(scaled).unwrap_or(max).max(1)
    };
    (scale(width), scale(height))
}
