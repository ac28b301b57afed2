// Pixel layout conversions between device formats and the pipeline's RGBA8.
//
// YUV paths use BT.601 with fixed-point integer arithmetic (<<8) since they
// run once per frame on the capture thread.

use crate::camera::backend::RawFrame;
use crate::camera::error::{CameraError, Result};
use crate::camera::types::PixelFormat;

/// Convert a device frame to packed RGBA8.
pub fn to_rgba(raw: &RawFrame) -> Result<Vec<u8>> {
    let width = raw.width as usize;
    let height = raw.height as usize;
    let expected = raw.format.frame_len(raw.width, raw.height);
    if width == 0 || height == 0 || raw.data.len() < expected {
        return Err(CameraError::CorruptFrame(format!(
            "{:?} frame {}x{} has {} bytes, expected {expected}",
            raw.format,
            raw.width,
            raw.height,
            raw.data.len()
        )));
    }

    let rgba = match raw.format {
        PixelFormat::Rgba8 => raw.data[..expected].to_vec(),
        PixelFormat::Rgb24 => rgb_to_rgba(&raw.data[..expected]),
        PixelFormat::Bgr24BottomUp => convert_bgr_bottom_up_to_rgba(&raw.data, width, height),
        PixelFormat::Yuy2 => {
            if width % 2 != 0 {
                return Err(CameraError::CorruptFrame(format!(
                    "YUY2 width {width} must be even"
                )));
            }
            convert_yuy2_to_rgba(&raw.data, width, height)
        }
        PixelFormat::Nv12 => convert_nv12_to_rgba(&raw.data, width, height),
    };
    Ok(rgba)
}

fn rgb_to_rgba(rgb: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rgb.len() / 3 * 4);
    for px in rgb.chunks_exact(3) {
        out.extend_from_slice(&[px[0], px[1], px[2], 255]);
    }
    out
}

/// Drop the alpha channel, for encoders that only take RGB24.
pub fn rgba_to_rgb(rgba: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rgba.len() / 4 * 3);
    for px in rgba.chunks_exact(4) {
        out.extend_from_slice(&px[..3]);
    }
    out
}

/// Convert BGR24 bottom-up data to RGBA top-down.
///
/// Some capture stacks deliver BGR colour order with rows stored
/// bottom-to-top. This flips rows vertically and swaps blue/red channels.
fn convert_bgr_bottom_up_to_rgba(bgr: &[u8], width: usize, height: usize) -> Vec<u8> {
    let stride = width * 3;
    let mut rgba = vec![0u8; width * height * 4];
    for y in 0..height {
        let src_row = &bgr[(height - 1 - y) * stride..(height - y) * stride];
        let dst_row = &mut rgba[y * width * 4..(y + 1) * width * 4];
        for x in 0..width {
            dst_row[x * 4] = src_row[x * 3 + 2];
            dst_row[x * 4 + 1] = src_row[x * 3 + 1];
            dst_row[x * 4 + 2] = src_row[x * 3];
            dst_row[x * 4 + 3] = 255;
        }
    }
    rgba
}

#[inline]
fn yuv_to_rgb(y: i32, u: i32, v: i32) -> [u8; 3] {
    [
        ((y * 256 + 359 * v) >> 8).clamp(0, 255) as u8,
        ((y * 256 - 88 * u - 183 * v) >> 8).clamp(0, 255) as u8,
        ((y * 256 + 454 * u) >> 8).clamp(0, 255) as u8,
    ]
}

/// Convert YUY2 (YUYV) packed data to RGBA.
///
/// YUY2 stores two pixels per 4-byte macro-pixel: [Y0, U, Y1, V].
fn convert_yuy2_to_rgba(yuy2: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut rgba = vec![0u8; width * height * 4];
    for i in 0..(width * height / 2) {
        let y0 = i32::from(yuy2[i * 4]);
        let u = i32::from(yuy2[i * 4 + 1]) - 128;
        let y1 = i32::from(yuy2[i * 4 + 2]);
        let v = i32::from(yuy2[i * 4 + 3]) - 128;

        let base = i * 8;
        let [r0, g0, b0] = yuv_to_rgb(y0, u, v);
        let [r1, g1, b1] = yuv_to_rgb(y1, u, v);
        rgba[base..base + 8].copy_from_slice(&[r0, g0, b0, 255, r1, g1, b1, 255]);
    }
    rgba
}

/// Convert NV12 planar data to RGBA.
///
/// NV12 stores a full-resolution Y plane followed by an interleaved UV plane
/// at half resolution in both dimensions (4:2:0 subsampling).
fn convert_nv12_to_rgba(nv12: &[u8], width: usize, height: usize) -> Vec<u8> {
    let y_plane = &nv12[..width * height];
    let uv_plane = &nv12[width * height..];
    let mut rgba = vec![0u8; width * height * 4];

    for row in 0..height {
        for col in 0..width {
            let y = i32::from(y_plane[row * width + col]);
            let uv_index = (row / 2) * width + (col / 2) * 2;
            let u = i32::from(uv_plane[uv_index]) - 128;
            let v = i32::from(uv_plane[uv_index + 1]) - 128;

            let base = (row * width + col) * 4;
            let [r, g, b] = yuv_to_rgb(y, u, v);
            rgba[base..base + 4].copy_from_slice(&[r, g, b, 255]);
        }
    }
    rgba
}

/// Convert RGB24 to NV12, averaging chroma over each 2x2 block.
///
/// Width and height must be even.
pub fn rgb_to_nv12(rgb: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = vec![0u8; width * height * 3 / 2];
    let (y_plane, uv_plane) = out.split_at_mut(width * height);

    for row in 0..height {
        for col in 0..width {
            let i = (row * width + col) * 3;
            let (r, g, b) = (
                i32::from(rgb[i]),
                i32::from(rgb[i + 1]),
                i32::from(rgb[i + 2]),
            );
            y_plane[row * width + col] = ((77 * r + 150 * g + 29 * b) >> 8).clamp(0, 255) as u8;
        }
    }

    for by in 0..height / 2 {
        for bx in 0..width / 2 {
            let (mut r, mut g, mut b) = (0i32, 0i32, 0i32);
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let i = ((by * 2 + dy) * width + bx * 2 + dx) * 3;
                r += i32::from(rgb[i]);
                g += i32::from(rgb[i + 1]);
                b += i32::from(rgb[i + 2]);
            }
            let (r, g, b) = (r / 4, g / 4, b / 4);
            let u = ((-43 * r - 85 * g + 128 * b) >> 8) + 128;
            let v = ((128 * r - 107 * g - 21 * b) >> 8) + 128;
            let idx = by * width + bx * 2;
            uv_plane[idx] = u.clamp(0, 255) as u8;
            uv_plane[idx + 1] = v.clamp(0, 255) as u8;
        }
    }
    out
}
