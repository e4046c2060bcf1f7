//! Per-frame conditioning between the capture device and the engine:
//! resize to the resolution preset, rotate to the configured orientation,
//! mirror, and pack into the configured pixel format.

use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use image::{RgbaImage, imageops};
use rayon::prelude::*;

use crate::{
    config::{CameraConfig, Orientation},
    types::{PixelFormat, PixelFrame},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureTransform {
    pub target: Option<(u32, u32)>,
    pub orientation: Orientation,
    pub mirrored: bool,
    pub format: PixelFormat,
}

impl CaptureTransform {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            target: config.resolution.dimensions(),
            orientation: config.orientation,
            mirrored: config.is_mirrored(),
            format: config.pixel_format,
        }
    }

    /// Dimensions of the frame handed to the engine for a `width x height` source.
    pub fn output_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let (w, h) = self.target.unwrap_or((width, height));
        match self.orientation {
            Orientation::Portrait | Orientation::PortraitUpsideDown => (h, w),
            Orientation::Landscape | Orientation::LandscapeFlipped => (w, h),
        }
    }

    pub fn apply(&self, image: RgbaImage) -> Result<PixelFrame> {
        let image = match self.target {
            Some((w, h)) if image.dimensions() != (w, h) => resize(image, w, h)?,
            _ => image,
        };

        let mut image = match self.orientation {
            Orientation::Landscape => image,
            Orientation::Portrait => imageops::rotate90(&image),
            Orientation::LandscapeFlipped => imageops::rotate180(&image),
            Orientation::PortraitUpsideDown => imageops::rotate270(&image),
        };
        if self.mirrored {
            imageops::flip_horizontal_in_place(&mut image);
        }

        Ok(pack(image, self.format))
    }
}

pub fn resize(image: RgbaImage, width: u32, height: u32) -> Result<RgbaImage> {
    if width == 0 || height == 0 {
        return Err(anyhow!("cannot resize to {width}x{height}"));
    }

    let (src_w, src_h) = image.dimensions();
    let src_image =
        fir::images::Image::from_vec_u8(src_w, src_h, image.into_raw(), fir::PixelType::U8x4)?;
    let mut dst_image = fir::images::Image::new(width, height, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;

    RgbaImage::from_raw(width, height, dst_image.into_vec())
        .ok_or_else(|| anyhow!("resized buffer does not match {width}x{height}"))
}

pub fn pack(image: RgbaImage, format: PixelFormat) -> PixelFrame {
    let (width, height) = image.dimensions();
    let mut data = image.into_raw();
    if format == PixelFormat::Bgra {
        data.par_chunks_exact_mut(4).for_each(|px| px.swap(0, 2));
    }
    PixelFrame {
        width,
        height,
        format,
        data,
    }
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    fn transform(orientation: Orientation, mirrored: bool, format: PixelFormat) -> CaptureTransform {
        CaptureTransform {
            target: None,
            orientation,
            mirrored,
            format,
        }
    }

    fn marked() -> RgbaImage {
        // 3x2, red pixel at the top-left corner
        let mut image = RgbaImage::from_pixel(3, 2, Rgba([0, 0, 0, 255]));
        image.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        image
    }

    fn red_at(frame: &PixelFrame) -> (u32, u32) {
        let idx = frame
            .data
            .chunks_exact(4)
            .position(|px| px[0] == 255 || px[2] == 255)
            .unwrap() as u32;
        (idx % frame.width, idx / frame.width)
    }

    #[test]
    fn mirroring_moves_pixel_to_the_right_edge() {
        let frame = transform(Orientation::Landscape, true, PixelFormat::Rgba)
            .apply(marked())
            .unwrap();
        assert_eq!((frame.width, frame.height), (3, 2));
        assert_eq!(red_at(&frame), (2, 0));
    }

    #[test]
    fn portrait_rotates_clockwise() {
        let t = transform(Orientation::Portrait, false, PixelFormat::Rgba);
        let frame = t.apply(marked()).unwrap();
        assert_eq!((frame.width, frame.height), (2, 3));
        assert_eq!(t.output_dimensions(3, 2), (2, 3));
        assert_eq!(red_at(&frame), (1, 0));
    }

    #[test]
    fn bgra_output_swaps_red_and_blue() {
        let frame = transform(Orientation::Landscape, false, PixelFormat::Bgra)
            .apply(marked())
            .unwrap();
        assert_eq!(frame.format, PixelFormat::Bgra);
        assert_eq!(&frame.data[..4], &[0, 0, 255, 255]);
        assert!(frame.is_well_formed());
    }

    #[test]
    fn resizes_to_preset() {
        let t = CaptureTransform {
            target: Some((8, 6)),
            orientation: Orientation::Portrait,
            mirrored: false,
            format: PixelFormat::Rgba,
        };
        let frame = t.apply(RgbaImage::new(4, 3)).unwrap();
        assert_eq!((frame.width, frame.height), (6, 8));
        assert_eq!(t.output_dimensions(4, 3), (6, 8));
    }

    #[test]
    fn config_defaults_mirror_front_camera() {
        let t = CaptureTransform::from_config(&CameraConfig::default());
        assert!(t.mirrored);
        assert_eq!(t.target, Some((640, 480)));
        assert_eq!(t.format, PixelFormat::Bgra);
    }
}
