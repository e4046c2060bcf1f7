use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Instant,
};

use anyhow::anyhow;
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraIndex, CameraInfo, FrameFormat, RequestedFormat, RequestedFormatType,
    },
};

use super::{
    capture::{CaptureStream, FrameSink},
    frame_ops::CaptureTransform,
    rgba_converter,
};
use crate::{
    config::CameraConfig,
    error::DeviceConfigurationError,
    types::{CaptureClock, Frame},
};

// Prefer pixel formats that are widely supported on macOS (the built-in cameras
// often reject YUYV even though Nokhwa reports it).
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

fn requested_formats() -> [RequestedFormat<'static>; 4] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestResolution,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

pub fn available_cameras() -> Result<Vec<CameraDevice>, DeviceConfigurationError> {
    let cameras = query(ApiBackend::Auto)
        .map_err(|err| DeviceConfigurationError::CameraOpen(err.into()))?;
    Ok(cameras
        .into_iter()
        .map(|info: CameraInfo| CameraDevice {
            index: info.index().clone(),
            label: info.human_name(),
        })
        .collect())
}

fn build_camera(index: CameraIndex) -> anyhow::Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

/// Opens the configured camera and starts delivering conditioned, timestamped
/// frames to `sink` from a dedicated capture thread.
pub fn start_camera_stream(
    config: &CameraConfig,
    sink: Arc<dyn FrameSink>,
) -> Result<CaptureStream, DeviceConfigurationError> {
    let devices = available_cameras()?;
    let device = devices
        .into_iter()
        .nth(config.device_index as usize)
        .ok_or(DeviceConfigurationError::CameraUnavailable(config.device_index))?;

    // Fail fast before spawning the capture thread.
    build_camera(device.index.clone()).map_err(DeviceConfigurationError::CameraOpen)?;
    log::info!(
        "opened camera {} ({:?}, {:?}, mirrored: {})",
        device.label,
        config.facing,
        config.resolution,
        config.is_mirrored()
    );

    let transform = CaptureTransform::from_config(config);
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::Builder::new()
        .name("camera-capture".into())
        .spawn(move || {
            let mut camera = match build_camera(device.index) {
                Ok(cam) => cam,
                Err(err) => {
                    log::error!("failed to open camera: {err:?}");
                    return;
                }
            };
            let mut clock = CaptureClock::new();

            while !stop_flag.load(Ordering::Relaxed) {
                let frame_start = Instant::now();
                let buffer = match camera.frame() {
                    Ok(buffer) => buffer,
                    Err(err) => {
                        log::warn!(
                            "camera frame read failed (after {:?}): {err:?}",
                            frame_start.elapsed()
                        );
                        continue;
                    }
                };
                let timestamp = clock.stamp();

                let image = match rgba_converter::convert_camera_frame(&buffer)
                    .and_then(|rgba| transform.apply(rgba))
                {
                    Ok(image) => image,
                    Err(err) => {
                        log::warn!("failed to decode camera frame {err:?}");
                        continue;
                    }
                };

                sink.offer(Frame { image, timestamp });
            }

            if let Err(err) = camera.stop_stream() {
                log::warn!("failed to stop camera stream: {err:?}");
            }
        })
        .map_err(|err| DeviceConfigurationError::CameraOpen(err.into()))?;

    Ok(CaptureStream::new(stop, handle))
}
