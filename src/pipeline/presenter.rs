//! The single presentation context.
//!
//! A [`ScenePresenter`] is not safe for concurrent mutation, so it is moved
//! onto one thread that drains [`SceneBatch`]es and applies each one whole.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use super::{
    dispatcher::{GeometryUpdate, SceneBatch},
    texture::Texture,
};
use crate::{
    error::{PipelineError, Result},
    geometry::{Primitive, RigidTransform},
    types::{EntityIndex, FrameTimestamp},
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub trait ScenePresenter: Send + 'static {
    fn set_background(&mut self, texture: Texture);

    fn set_transform(&mut self, entity: EntityIndex, transform: RigidTransform);

    fn set_geometry(&mut self, update: GeometryUpdate);

    /// Called after every update of one frame has been applied.
    fn frame_complete(&mut self, _timestamp: FrameTimestamp) {}
}

/// Applies `batch` in a fixed order: background, transforms, geometry.
pub fn apply_batch(presenter: &mut dyn ScenePresenter, batch: SceneBatch) {
    let SceneBatch {
        timestamp,
        texture,
        transforms,
        geometries,
    } = batch;

    if let Some(texture) = texture {
        presenter.set_background(texture);
    }
    for (entity, transform) in transforms {
        presenter.set_transform(entity, transform);
    }
    for update in geometries {
        presenter.set_geometry(update);
    }
    presenter.frame_complete(timestamp);
}

#[derive(Debug)]
pub struct PresentationThread {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<u64>>,
}

impl PresentationThread {
    /// Stops the thread and returns how many frames it presented.
    /// Batches still queued are discarded.
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        self.stop.store(true, Ordering::SeqCst);
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for PresentationThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn start_presentation<P: ScenePresenter>(
    mut presenter: P,
    batch_rx: Receiver<SceneBatch>,
) -> Result<PresentationThread> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::Builder::new()
        .name("presentation".into())
        .spawn(move || {
            let mut presented = 0u64;
            while !stop_flag.load(Ordering::Relaxed) {
                match batch_rx.recv_timeout(POLL_INTERVAL) {
                    Ok(batch) => {
                        if stop_flag.load(Ordering::Relaxed) {
                            break;
                        }
                        apply_batch(&mut presenter, batch);
                        presented += 1;
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            log::debug!("presentation thread exiting after {presented} frames");
            presented
        })
        .map_err(|source| PipelineError::Spawn {
            name: "presentation",
            source,
        })?;

    Ok(PresentationThread {
        stop,
        handle: Some(handle),
    })
}

/// Presenter for headless runs: keeps only counters and logs a summary line
/// every `report_every` frames.
#[derive(Debug)]
pub struct LoggingPresenter {
    report_every: u64,
    frames: u64,
    last_report: Instant,
    background: Option<(u32, u32)>,
    transforms: usize,
    vertices: usize,
    bones: usize,
}

impl LoggingPresenter {
    pub fn new(report_every: u64) -> Self {
        Self {
            report_every: report_every.max(1),
            frames: 0,
            last_report: Instant::now(),
            background: None,
            transforms: 0,
            vertices: 0,
            bones: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Default for LoggingPresenter {
    fn default() -> Self {
        Self::new(30)
    }
}

impl ScenePresenter for LoggingPresenter {
    fn set_background(&mut self, texture: Texture) {
        self.background = Some(texture.dimensions());
    }

    fn set_transform(&mut self, _entity: EntityIndex, _transform: RigidTransform) {
        self.transforms += 1;
    }

    fn set_geometry(&mut self, update: GeometryUpdate) {
        self.vertices += update.geometry.vertex_count();
        self.bones += update
            .geometry
            .element(Primitive::Lines)
            .map_or(0, |lines| lines.primitive_count());
    }

    fn frame_complete(&mut self, timestamp: FrameTimestamp) {
        self.frames += 1;
        if self.frames % self.report_every != 0 {
            return;
        }

        let elapsed = self.last_report.elapsed().as_secs_f32().max(f32::EPSILON);
        log::info!(
            "presented {} frames ({:.1} fps), last {timestamp:?}: background {:?}, {} transforms, {} vertices, {} bones",
            self.frames,
            self.report_every as f32 / elapsed,
            self.background,
            self.transforms,
            self.vertices,
            self.bones,
        );
        self.last_report = Instant::now();
        self.transforms = 0;
        self.vertices = 0;
        self.bones = 0;
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::bounded;
    use parking_lot::Mutex;

    use super::*;
    use crate::{
        geometry::ReconstructedGeometry,
        types::{PixelFormat, PixelFrame, ResultChannel},
    };

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl ScenePresenter for Recorder {
        fn set_background(&mut self, _texture: Texture) {
            self.calls.lock().push("background".into());
        }

        fn set_transform(&mut self, entity: EntityIndex, _transform: RigidTransform) {
            self.calls.lock().push(format!("transform {entity}"));
        }

        fn set_geometry(&mut self, update: GeometryUpdate) {
            self.calls.lock().push(format!("geometry {}", update.entity));
        }

        fn frame_complete(&mut self, timestamp: FrameTimestamp) {
            self.calls.lock().push(format!("done {}", timestamp.as_micros()));
        }
    }

    fn batch(micros: u64) -> SceneBatch {
        let texture = Texture::from_frame(
            PixelFrame {
                width: 1,
                height: 1,
                format: PixelFormat::Rgba,
                data: vec![0; 4],
            },
            (1, 1),
        )
        .unwrap();
        SceneBatch {
            timestamp: FrameTimestamp(micros),
            texture: Some(texture),
            transforms: vec![(0, RigidTransform::IDENTITY), (1, RigidTransform::IDENTITY)],
            geometries: vec![GeometryUpdate {
                entity: 0,
                channel: ResultChannel::Geometry,
                geometry: ReconstructedGeometry::empty(),
                anchor: None,
            }],
        }
    }

    #[test]
    fn batch_is_applied_in_fixed_order() {
        let mut recorder = Recorder::default();
        apply_batch(&mut recorder, batch(7));
        assert_eq!(
            *recorder.calls.lock(),
            vec!["background", "transform 0", "transform 1", "geometry 0", "done 7"]
        );
    }

    #[test]
    fn presentation_thread_drains_queue_until_stopped() {
        let recorder = Recorder::default();
        let calls = recorder.calls.clone();
        let (tx, rx) = bounded(4);
        let thread = start_presentation(recorder, rx).unwrap();

        tx.send(batch(1)).unwrap();
        tx.send(batch(2)).unwrap();
        for _ in 0..200 {
            if calls.lock().iter().filter(|c| c.starts_with("done")).count() == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(thread.stop(), 2);

        let calls = calls.lock();
        let done: Vec<_> = calls.iter().filter(|c| c.starts_with("done")).collect();
        assert_eq!(done, vec!["done 1", "done 2"]);
    }

    #[test]
    fn thread_exits_when_senders_are_gone() {
        let (tx, rx) = bounded::<SceneBatch>(1);
        let thread = start_presentation(LoggingPresenter::default(), rx).unwrap();
        drop(tx);
        assert_eq!(thread.stop(), 0);
    }

    #[test]
    fn logging_presenter_counts_frames() {
        let mut presenter = LoggingPresenter::new(2);
        apply_batch(&mut presenter, batch(1));
        apply_batch(&mut presenter, batch(2));
        assert_eq!(presenter.frames(), 2);
        assert_eq!(presenter.transforms, 0);
    }
}
