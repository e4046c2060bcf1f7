use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{PixelFormat, PixelFrame};

pub const INPUT_SIZE: u32 = 224;
pub const NUM_LANDMARKS: usize = 21;

/// How a frame was scaled and padded into the square model input.
#[derive(Clone, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl Letterbox {
    /// Maps a point from model input space back to frame pixels.
    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        let px = (x - self.pad_x) / self.scale;
        let py = (y - self.pad_y) / self.scale;
        (
            px.clamp(0.0, self.orig_w.saturating_sub(1) as f32),
            py.clamp(0.0, self.orig_h.saturating_sub(1) as f32),
        )
    }
}

/// Resizes `image` to fit a `target_size` square, pads it with black and
/// returns an NHWC RGB tensor in `[0, 1]`.
pub fn prepare_frame_with_size(
    image: &PixelFrame,
    target_size: u32,
) -> Result<(Array4<f32>, Letterbox)> {
    if !image.is_well_formed() || image.width == 0 || image.height == 0 {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            image.data.len(),
            image.expected_len()
        ));
    }

    let scale = target_size as f32 / (image.width.max(image.height) as f32);
    let new_w = ((image.width as f32 * scale).round().max(1.0) as u32).min(target_size);
    let new_h = ((image.height as f32 * scale).round().max(1.0) as u32).min(target_size);

    let src_image = fir::images::Image::from_vec_u8(
        image.width,
        image.height,
        image.data.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let pad_x = ((target_size - new_w) / 2) as usize;
    let pad_y = ((target_size - new_h) / 2) as usize;
    let mut canvas = vec![0u8; (target_size as usize) * (target_size as usize) * 4];
    let dst_stride = target_size as usize * 4;
    let src_stride = new_w as usize * 4;
    for row in 0..(new_h as usize) {
        let dst_offset = (pad_y + row) * dst_stride + pad_x * 4;
        let src_offset = row * src_stride;
        canvas[dst_offset..dst_offset + src_stride]
            .copy_from_slice(&resized[src_offset..src_offset + src_stride]);
    }

    let (r, b) = match image.format {
        PixelFormat::Rgba => (0, 2),
        PixelFormat::Bgra => (2, 0),
    };
    let normalized: Vec<f32> = canvas
        .par_chunks_exact(4)
        .flat_map_iter(|px| {
            [
                px[r] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[b] as f32 / 255.0,
            ]
        })
        .collect();
    let input = Array4::<f32>::from_shape_vec(
        (1, target_size as usize, target_size as usize, 3),
        normalized,
    )
    .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    let letterbox = Letterbox {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        orig_w: image.width,
        orig_h: image.height,
    };

    Ok((input, letterbox))
}

pub fn decode_landmarks(flat: &[f32]) -> Result<Vec<[f32; 3]>> {
    if flat.len() < NUM_LANDMARKS * 3 {
        return Err(anyhow!(
            "unexpected landmarks length: got {}, need {}",
            flat.len(),
            NUM_LANDMARKS * 3
        ));
    }

    Ok(flat
        .chunks_exact(3)
        .take(NUM_LANDMARKS)
        .map(|chunk| [chunk[0], chunk[1], chunk[2]])
        .collect())
}

/// Converts model-space landmarks into frame-normalized `x, y, z` triples.
/// Depth is scaled by the same factor as `x`.
pub fn normalize_landmarks(landmarks: &[[f32; 3]], letterbox: &Letterbox) -> Vec<f32> {
    let w = letterbox.orig_w.max(1) as f32;
    let h = letterbox.orig_h.max(1) as f32;
    landmarks
        .iter()
        .flat_map(|&[x, y, z]| {
            let (px, py) = letterbox.project(x, y);
            [px / w, py / h, z / letterbox.scale / w]
        })
        .collect()
}
