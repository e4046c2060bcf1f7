use std::{
    fs,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use graph_stage::{
    GraphDescription, Pipeline, PipelineConfig,
    config::SourceKind,
    error::{GraphLoadError, SubmissionError},
    geometry::RigidTransform,
    pipeline::{
        GeometryUpdate, GraphEngine, ResultSink, ScenePresenter, Texture,
        engine::passthrough::{PASSTHROUGH_GRAPH, PassthroughEngine},
    },
    types::{EntityIndex, Frame, FrameTimestamp, PixelFormat, PixelFrame, ResultPayload},
};
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;

/// Engine that accepts every frame and only reports results when told to.
#[derive(Clone, Default)]
struct FakeEngine {
    sink: Arc<Mutex<Option<ResultSink>>>,
    frames: Arc<Mutex<Vec<FrameTimestamp>>>,
}

impl FakeEngine {
    fn sink(&self) -> ResultSink {
        self.sink.lock().clone().expect("engine not started")
    }

    fn finish(&self, micros: u64) {
        self.sink().emit(FrameTimestamp(micros), pixel());
    }
}

impl GraphEngine for FakeEngine {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn load(&mut self, _graph: &GraphDescription) -> Result<(), GraphLoadError> {
        Ok(())
    }

    fn start(&mut self, sink: ResultSink) -> anyhow::Result<()> {
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn process_frame(&mut self, frame: Frame) -> Result<(), SubmissionError> {
        self.frames.lock().push(frame.timestamp);
        Ok(())
    }

    fn shutdown(&mut self) {}
}

#[derive(Clone, Default)]
struct CountingPresenter {
    frames: Arc<AtomicUsize>,
    backgrounds: Arc<AtomicUsize>,
}

impl ScenePresenter for CountingPresenter {
    fn set_background(&mut self, _texture: Texture) {
        self.backgrounds.fetch_add(1, Ordering::SeqCst);
    }

    fn set_transform(&mut self, _entity: EntityIndex, _transform: RigidTransform) {}

    fn set_geometry(&mut self, _update: GeometryUpdate) {}

    fn frame_complete(&mut self, _timestamp: FrameTimestamp) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

fn pixel() -> ResultPayload {
    ResultPayload::PixelFrame(PixelFrame {
        width: 2,
        height: 2,
        format: PixelFormat::Bgra,
        data: vec![0; 16],
    })
}

fn frame(micros: u64) -> Frame {
    Frame {
        image: PixelFrame {
            width: 2,
            height: 2,
            format: PixelFormat::Bgra,
            data: vec![0; 16],
        },
        timestamp: FrameTimestamp(micros),
    }
}

fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..400 {
        if done() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached in time");
}

fn start(engine: FakeEngine, presenter: CountingPresenter) -> Pipeline {
    let config = PipelineConfig::default();
    let graph = GraphDescription::new(PASSTHROUGH_GRAPH).unwrap();
    Pipeline::start(&config, &graph, Box::new(engine), presenter).unwrap()
}

#[test]
fn one_frame_in_flight_until_its_result_returns() {
    let engine = FakeEngine::default();
    let presenter = CountingPresenter::default();
    let pipeline = start(engine.clone(), presenter.clone());
    let sink = pipeline.frame_sink();

    assert!(sink.offer(frame(1)));
    assert!(!sink.offer(frame(2)));
    assert!(!sink.offer(frame(3)));
    assert_eq!(*engine.frames.lock(), vec![FrameTimestamp(1)]);

    engine.finish(1);
    assert!(sink.offer(frame(4)));
    assert_eq!(
        *engine.frames.lock(),
        vec![FrameTimestamp(1), FrameTimestamp(4)]
    );

    wait_until(|| presenter.frames.load(Ordering::SeqCst) == 1);
    let stats = pipeline.stop();
    assert_eq!(stats.throttle.submitted, 2);
    assert_eq!(stats.throttle.throttled, 2);
    assert_eq!(stats.dispatch.batches_sent, 1);
}

#[test]
fn late_callbacks_after_stop_are_never_presented() {
    let engine = FakeEngine::default();
    let presenter = CountingPresenter::default();
    let pipeline = start(engine.clone(), presenter.clone());
    let sink = pipeline.frame_sink();

    assert!(sink.offer(frame(1)));
    engine.finish(1);
    wait_until(|| presenter.frames.load(Ordering::SeqCst) == 1);

    assert!(sink.offer(frame(2)));
    let engine_sink = engine.sink();
    pipeline.stop();
    assert!(engine_sink.is_closed());

    let late: Vec<_> = (0..4)
        .map(|i| {
            let engine_sink = engine_sink.clone();
            thread::spawn(move || {
                for micros in 2..50 {
                    engine_sink.emit(FrameTimestamp(micros + i * 100), pixel());
                }
            })
        })
        .collect();
    for handle in late {
        handle.join().unwrap();
    }

    thread::sleep(Duration::from_millis(100));
    assert_eq!(presenter.frames.load(Ordering::SeqCst), 1);
    assert_eq!(presenter.backgrounds.load(Ordering::SeqCst), 1);
    assert!(!sink.offer(frame(500)));
}

#[test]
fn stop_releases_slot_without_waiting_for_result() {
    let engine = FakeEngine::default();
    let pipeline = start(engine.clone(), CountingPresenter::default());
    let sink = pipeline.frame_sink();

    assert!(sink.offer(frame(1)));
    assert_eq!(pipeline.throttle().token().holder(), Some(FrameTimestamp(1)));

    let token = pipeline.throttle().token().clone();
    let stats = pipeline.stop();
    assert_eq!(token.holder(), None);
    assert_eq!(stats.dispatch.batches_sent, 0);
}

#[test]
fn stale_slot_is_reclaimed_by_a_later_frame() {
    let engine = FakeEngine::default();
    let pipeline = start(engine.clone(), CountingPresenter::default());
    let sink = pipeline.frame_sink();

    assert!(sink.offer(frame(1)));
    // default timeout is one second of capture time
    assert!(!sink.offer(frame(500_000)));
    assert!(sink.offer(frame(1_000_001)));

    let stats = pipeline.stop();
    assert_eq!(stats.throttle.reclaimed, 1);
    assert_eq!(
        *engine.frames.lock(),
        vec![FrameTimestamp(1), FrameTimestamp(1_000_001)]
    );
}

#[test]
fn image_directory_runs_through_passthrough_engine() {
    let dir = tempfile::tempdir().unwrap();
    for (i, color) in [[255, 0, 0, 255], [0, 255, 0, 255], [0, 0, 255, 255]]
        .into_iter()
        .enumerate()
    {
        RgbaImage::from_pixel(4, 3, Rgba(color))
            .save(dir.path().join(format!("frame{i}.png")))
            .unwrap();
    }
    let config_path = dir.path().join("stage.toml");
    fs::write(
        &config_path,
        format!(
            "[source]\nkind = \"images\"\n\n[source.images]\ndir = {:?}\nfps = 50\nloop_forever = false\n\n[graph]\nprofile = \"image_to_image\"\n",
            dir.path().to_string_lossy()
        ),
    )
    .unwrap();

    let config = PipelineConfig::load(&config_path).unwrap();
    assert_eq!(config.source.kind, SourceKind::Images);

    let presenter = CountingPresenter::default();
    let graph = GraphDescription::new(PASSTHROUGH_GRAPH).unwrap();
    let mut pipeline = Pipeline::start(
        &config,
        &graph,
        Box::new(PassthroughEngine::new()),
        presenter.clone(),
    )
    .unwrap();
    pipeline.attach_source(&config.source).unwrap();

    wait_until(|| pipeline.source_finished());
    wait_until(|| presenter.frames.load(Ordering::SeqCst) >= 1);
    let stats = pipeline.stop();

    assert!(stats.throttle.submitted >= 1);
    assert_eq!(
        stats.throttle.submitted + stats.throttle.throttled + stats.throttle.failed,
        3
    );
    assert_eq!(stats.dispatch.malformed, 0);
}
