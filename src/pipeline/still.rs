//! Replays a directory of still images as if they came from a camera.
//!
//! Images go through the same [`CaptureTransform`] as camera frames, so the
//! engine sees one fixed resolution, orientation and pixel format.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use super::{
    capture::{CaptureStream, FrameSink},
    frame_ops::CaptureTransform,
};
use crate::{
    config::ImageSourceConfig,
    error::DeviceConfigurationError,
    types::{CaptureClock, Frame, PixelFrame},
};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
const STOP_POLL: Duration = Duration::from_millis(20);

/// Sorted image files directly inside `dir`.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, DeviceConfigurationError> {
    let entries = fs::read_dir(dir).map_err(|source| DeviceConfigurationError::ImageSource {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

fn load_frames(
    dir: &Path,
    transform: &CaptureTransform,
) -> Result<Vec<PixelFrame>, DeviceConfigurationError> {
    let frames: Vec<PixelFrame> = list_images(dir)?
        .into_iter()
        .filter_map(|path| {
            let loaded = image::open(&path)
                .map_err(anyhow::Error::from)
                .and_then(|image| transform.apply(image.to_rgba8()));
            match loaded {
                Ok(frame) => Some(frame),
                Err(err) => {
                    log::warn!("skipping image {}: {err:#}", path.display());
                    None
                }
            }
        })
        .collect();

    if frames.is_empty() {
        return Err(DeviceConfigurationError::NoImages(dir.to_path_buf()));
    }
    Ok(frames)
}

pub fn start_image_stream(
    config: &ImageSourceConfig,
    transform: &CaptureTransform,
    sink: Arc<dyn FrameSink>,
) -> Result<CaptureStream, DeviceConfigurationError> {
    let frames = load_frames(&config.dir, transform)?;
    log::info!(
        "replaying {} images from {} at {} fps",
        frames.len(),
        config.dir.display(),
        config.fps
    );

    let interval = config.frame_interval();
    let loop_forever = config.loop_forever;
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::Builder::new()
        .name("image-replay".into())
        .spawn(move || {
            let mut clock = CaptureClock::new();
            'replay: loop {
                for image in &frames {
                    let due = Instant::now() + interval;
                    if stop_flag.load(Ordering::Relaxed) {
                        break 'replay;
                    }
                    sink.offer(Frame {
                        image: image.clone(),
                        timestamp: clock.stamp(),
                    });
                    if !sleep_until(due, &stop_flag) {
                        break 'replay;
                    }
                }
                if !loop_forever {
                    break;
                }
            }
        })
        .map_err(|source| DeviceConfigurationError::ImageSource {
            path: config.dir.clone(),
            source,
        })?;

    Ok(CaptureStream::new(stop, handle))
}

/// Returns false if `stop` was raised while waiting.
fn sleep_until(due: Instant, stop: &AtomicBool) -> bool {
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= due {
            return true;
        }
        thread::sleep((due - now).min(STOP_POLL));
    }
}
