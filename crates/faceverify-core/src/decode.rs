//! Inbound image payloads → RGB8 [`ImageBuffer`].

use crate::types::ImageBuffer;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,
    #[error("invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unreadable image data: {0}")]
    Image(#[from] image::ImageError),
    #[error("image has zero width or height")]
    ZeroDimensions,
}

/// An image as it arrives at the service boundary.
#[derive(Debug, Clone)]
pub enum ImagePayload {
    /// Raw encoded image file bytes (PNG, JPEG, ...).
    Bytes(Vec<u8>),
    /// Base64 text, optionally wrapped in a `data:image/...;base64,` URI.
    Encoded(String),
}

impl ImagePayload {
    pub fn is_empty(&self) -> bool {
        match self {
            ImagePayload::Bytes(b) => b.is_empty(),
            ImagePayload::Encoded(s) => s.trim().is_empty(),
        }
    }
}

/// Decode any payload into an RGB image.
pub fn decode(payload: &ImagePayload) -> Result<ImageBuffer, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }
    match payload {
        ImagePayload::Bytes(bytes) => decode_bytes(bytes),
        ImagePayload::Encoded(text) => decode_base64(text),
    }
}

/// Decode encoded image file bytes. Palette, grayscale and alpha sources
/// are converted to RGB; alpha is dropped.
pub fn decode_bytes(bytes: &[u8]) -> Result<ImageBuffer, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    ImageBuffer::new(rgb).ok_or(DecodeError::ZeroDimensions)
}

/// Decode a base64 string or data URI.
pub fn decode_base64(text: &str) -> Result<ImageBuffer, DecodeError> {
    let encoded = strip_data_uri(text).trim();
    if encoded.is_empty() {
        return Err(DecodeError::Empty);
    }
    let bytes = STANDARD.decode(encoded)?;
    decode_bytes(&bytes)
}

/// Drop everything up to and including the first comma.
fn strip_data_uri(text: &str) -> &str {
    match text.split_once(',') {
        Some((_, rest)) => rest,
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    fn red_png() -> Vec<u8> {
        let img = RgbaImage::from_pixel(4, 3, Rgba([200, 10, 20, 255]));
        encode(DynamicImage::ImageRgba8(img), ImageFormat::Png)
    }

    #[test]
    fn test_decode_png_bytes() {
        let buf = decode_bytes(&red_png()).unwrap();
        assert_eq!((buf.width(), buf.height()), (4, 3));
        assert_eq!(&buf.as_raw()[..3], &[200, 10, 20]);
    }

    #[test]
    fn test_rgba_drops_alpha() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 0]));
        let bytes = encode(DynamicImage::ImageRgba8(img), ImageFormat::Png);
        let buf = decode_bytes(&bytes).unwrap();
        assert_eq!(buf.as_raw().len(), 2 * 2 * 3);
        assert_eq!(&buf.as_raw()[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_grayscale_expands_to_rgb() {
        let img = GrayImage::from_pixel(3, 3, Luma([77]));
        let bytes = encode(DynamicImage::ImageLuma8(img), ImageFormat::Png);
        let buf = decode_bytes(&bytes).unwrap();
        assert!(buf.as_raw().iter().all(|&p| p == 77));
        assert_eq!(buf.as_raw().len(), 3 * 3 * 3);
    }

    #[test]
    fn test_palette_expands_to_rgb() {
        let mut bytes = Vec::new();
        let mut encoder = png::Encoder::new(&mut bytes, 2, 2);
        encoder.set_color(png::ColorType::Indexed);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_palette(vec![255, 0, 0, 0, 0, 255]);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0, 1, 1, 0]).unwrap();
        writer.finish().unwrap();

        let buf = decode_bytes(&bytes).unwrap();
        assert_eq!((buf.width(), buf.height()), (2, 2));
        assert_eq!(buf.as_raw(), &[255, 0, 0, 0, 0, 255, 0, 0, 255, 255, 0, 0]);
    }

    #[test]
    fn test_decode_bare_base64() {
        let text = STANDARD.encode(red_png());
        let buf = decode(&ImagePayload::Encoded(text)).unwrap();
        assert_eq!(buf.width(), 4);
    }

    #[test]
    fn test_decode_data_uri() {
        let text = format!("data:image/png;base64,{}", STANDARD.encode(red_png()));
        let buf = decode_base64(&text).unwrap();
        assert_eq!((buf.width(), buf.height()), (4, 3));
    }

    #[test]
    fn test_decode_base64_with_trailing_newline() {
        let text = format!("{}\n", STANDARD.encode(red_png()));
        assert!(decode_base64(&text).is_ok());
    }

    #[test]
    fn test_empty_payloads() {
        assert!(matches!(decode_bytes(&[]), Err(DecodeError::Empty)));
        assert!(matches!(decode_base64(""), Err(DecodeError::Empty)));
        assert!(matches!(
            decode_base64("data:image/png;base64,"),
            Err(DecodeError::Empty)
        ));
        assert!(matches!(
            decode(&ImagePayload::Encoded("  \n".into())),
            Err(DecodeError::Empty)
        ));
        assert!(matches!(decode(&ImagePayload::Bytes(Vec::new())), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_malformed_base64() {
        assert!(matches!(
            decode_base64("data:image/png;base64,@@not*base64@@"),
            Err(DecodeError::Base64(_))
        ));
    }

    #[test]
    fn test_truncated_image() {
        let png = red_png();
        let truncated = &png[..png.len() / 2];
        assert!(matches!(decode_bytes(truncated), Err(DecodeError::Image(_))));
    }

    #[test]
    fn test_not_an_image() {
        assert!(matches!(
            decode_bytes(b"definitely not an image"),
            Err(DecodeError::Image(_))
        ));
    }

    #[test]
    fn test_strip_data_uri_only_first_comma() {
        assert_eq!(strip_data_uri("data:image/png;base64,AAA,BBB"), "AAA,BBB");
        assert_eq!(strip_data_uri("AAAA"), "AAAA");
    }
}
