use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb};

use crate::camera::convert::rgba_to_rgb;
use crate::frame::FrameBuffer;
use crate::output::error::{OutputError, Result};

/// Compress raw RGB pixel data to JPEG at the given quality (1-100).
pub fn compress_jpeg(data: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let img: ImageBuffer<Rgb<u8>, _> = ImageBuffer::from_raw(width, height, data)
        .ok_or_else(|| OutputError::Encode(format!("buffer does not hold {width}x{height} RGB")))?;

    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    img.write_with_encoder(encoder)
        .map_err(|e| OutputError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Encode a composited frame. JPEG has no alpha, so it is dropped first.
pub fn encode_jpeg(frame: &FrameBuffer, quality: u8) -> Result<Vec<u8>> {
    let rgb = rgba_to_rgb(frame.as_bytes());
    compress_jpeg(&rgb, frame.width(), frame.height(), quality)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Rgba;

    /// Create a synthetic RGB test image (gradient pattern).
    fn make_test_rgb(width: u32, height: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push((x % 256) as u8);
                data.push((y % 256) as u8);
                data.push(128);
            }
        }
        data
    }

    #[test]
    fn compress_jpeg_produces_valid_jpeg_bytes() {
        let rgb = make_test_rgb(640, 480);
        let jpeg = compress_jpeg(&rgb, 640, 480, 85).unwrap();
        // JPEG files start with FF D8
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn compress_jpeg_rejects_short_buffers() {
        assert!(matches!(
            compress_jpeg(&[0; 10], 640, 480, 85),
            Err(OutputError::Encode(_))
        ));
    }

    #[test]
    fn compress_jpeg_lower_quality_produces_smaller_output() {
        let rgb = make_test_rgb(1280, 720);
        let high = compress_jpeg(&rgb, 1280, 720, 90).unwrap();
        let low = compress_jpeg(&rgb, 1280, 720, 40).unwrap();
        assert!(
            low.len() < high.len(),
            "quality 40 ({}) should be smaller than quality 90 ({})",
            low.len(),
            high.len()
        );
    }

    #[test]
    fn encode_jpeg_decodes_to_same_size() {
        let frame = FrameBuffer::solid(64, 48, Rgba::opaque(200, 40, 40), 0);
        let jpeg = encode_jpeg(&frame, 90).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
        let px = decoded.to_rgb8().get_pixel(32, 24).0;
        assert!((i32::from(px[0]) - 200).abs() < 8, "{px:?}");
    }
}
