//! Pixel output → background texture.

use image::RgbaImage;
use rayon::prelude::*;

use crate::{
    error::MalformedPayloadError,
    types::{PixelFormat, PixelFrame},
};

/// Background image plus the scale that aspect-fits it into the viewport.
#[derive(Clone, Debug, PartialEq)]
pub struct Texture {
    pub image: RgbaImage,
    /// `(x, y)` scale applied to a unit quad covering the viewport.
    pub scale: (f32, f32),
}

impl Texture {
    pub fn from_frame(
        frame: PixelFrame,
        viewport: (u32, u32),
    ) -> Result<Self, MalformedPayloadError> {
        let scale = aspect_fit_scale((frame.width, frame.height), viewport);
        Ok(Self {
            image: to_rgba_image(frame)?,
            scale,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

pub fn to_rgba_image(frame: PixelFrame) -> Result<RgbaImage, MalformedPayloadError> {
    if !frame.is_well_formed() {
        return Err(MalformedPayloadError::PixelBufferSize {
            width: frame.width,
            height: frame.height,
            expected: frame.expected_len(),
            got: frame.data.len(),
        });
    }

    let PixelFrame {
        width,
        height,
        format,
        mut data,
    } = frame;
    if format == PixelFormat::Bgra {
        data.par_chunks_exact_mut(4).for_each(|px| px.swap(0, 2));
    }

    RgbaImage::from_raw(width, height, data).ok_or(MalformedPayloadError::PixelBufferSize {
        width,
        height,
        expected: width as usize * height as usize * 4,
        got: 0,
    })
}

/// Scale that keeps the video's aspect ratio inside the viewport. One axis
/// is always 1; the other is shrunk.
pub fn aspect_fit_scale(video: (u32, u32), viewport: (u32, u32)) -> (f32, f32) {
    let (video_w, video_h) = (video.0 as f32, video.1 as f32);
    let (view_w, view_h) = (viewport.0 as f32, viewport.1 as f32);
    if video_w <= 0.0 || video_h <= 0.0 || view_w <= 0.0 || view_h <= 0.0 {
        return (1.0, 1.0);
    }

    let aspect_ratio = (view_h * video_w) / (view_w * video_h);
    if aspect_ratio < 1.0 {
        (1.0, aspect_ratio)
    } else {
        (1.0 / aspect_ratio, 1.0)
    }
}
