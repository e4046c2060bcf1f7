//! Decodes whatever the camera driver hands out into an RGBA image.

use anyhow::{Result, anyhow};
use image::RgbaImage;
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

pub fn convert_camera_frame(frame: &Buffer) -> Result<RgbaImage> {
    let resolution = frame.resolution();
    let (width, height) = (resolution.width_x, resolution.height_y);
    let data = frame.buffer();

    let (width, height, rgba) = match frame.source_frame_format() {
        FrameFormat::NV12 => (width, height, nv12_to_rgba(data, width, height)?),
        FrameFormat::YUYV => (width, height, yuyv_to_rgba(data, width, height)?),
        FrameFormat::MJPEG => mjpeg_to_rgba(data)?,
        FrameFormat::RAWRGB => (width, height, packed_to_rgba(data, width, height, Packing::Rgb)?),
        FrameFormat::RAWBGR => (width, height, packed_to_rgba(data, width, height, Packing::Bgr)?),
        FrameFormat::GRAY => (width, height, packed_to_rgba(data, width, height, Packing::Gray)?),
    };

    RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| anyhow!("decoded buffer does not match {width}x{height}"))
}

fn ensure_len(kind: &str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(anyhow!(
            "{kind} buffer too small: got {}, expected {expected}",
            data.len()
        ));
    }
    Ok(())
}

fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_plane_len = width as usize * height as usize;
    let uv_plane_len = y_plane_len / 2;
    ensure_len("NV12", data, y_plane_len + uv_plane_len)?;

    let image = YuvBiPlanarImage {
        y_plane: &data[..y_plane_len],
        y_stride: width,
        uv_plane: &data[y_plane_len..y_plane_len + uv_plane_len],
        uv_stride: width,
        width,
        height,
    };

    let mut rgba = vec![0u8; y_plane_len * 4];
    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12→RGBA failed: {err:?}"))?;

    Ok(rgba)
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    ensure_len("YUYV", data, pixels * 2)?;

    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    let mut rgba = vec![0u8; pixels * 4];
    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422→RGBA failed: {err:?}"))?;

    Ok(rgba)
}

/// MJPEG frames carry their own dimensions, which win over the driver's.
fn mjpeg_to_rgba(data: &[u8]) -> Result<(u32, u32, Vec<u8>)> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder reported no image info"))?;

    let width =
        u32::try_from(info.width).map_err(|_| anyhow!("MJPEG width does not fit u32"))?;
    let height =
        u32::try_from(info.height).map_err(|_| anyhow!("MJPEG height does not fit u32"))?;
    Ok((width, height, rgba))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Packing {
    Rgb,
    Bgr,
    Gray,
}

impl Packing {
    fn bytes_per_pixel(self) -> usize {
        match self {
            Packing::Rgb | Packing::Bgr => 3,
            Packing::Gray => 1,
        }
    }
}

fn packed_to_rgba(data: &[u8], width: u32, height: u32, packing: Packing) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    let bpp = packing.bytes_per_pixel();
    ensure_len(&format!("{packing:?}"), data, pixels * bpp)?;

    let mut rgba = vec![0u8; pixels * 4];
    rgba.par_chunks_mut(4)
        .zip(data[..pixels * bpp].par_chunks_exact(bpp))
        .for_each(|(dst, src)| {
            let [r, g, b] = match packing {
                Packing::Rgb => [src[0], src[1], src[2]],
                Packing::Bgr => [src[2], src[1], src[0]],
                Packing::Gray => [src[0]; 3],
            };
            dst.copy_from_slice(&[r, g, b, 255]);
        });

    Ok(rgba)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_is_reordered_with_opaque_alpha() {
        let rgba = packed_to_rgba(&[1, 2, 3, 4, 5, 6], 2, 1, Packing::Bgr).unwrap();
        assert_eq!(rgba, vec![3, 2, 1, 255, 6, 5, 4, 255]);
    }

    #[test]
    fn gray_is_replicated() {
        let rgba = packed_to_rgba(&[9, 200], 1, 2, Packing::Gray).unwrap();
        assert_eq!(rgba, vec![9, 9, 9, 255, 200, 200, 200, 255]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(packed_to_rgba(&[0; 5], 2, 1, Packing::Rgb).is_err());
        assert!(yuyv_to_rgba(&[0; 3], 2, 1).is_err());
        assert!(nv12_to_rgba(&[0; 5], 2, 2).is_err());
    }
}
