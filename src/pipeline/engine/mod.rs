//! Adapter around the external graph engine.
//!
//! The engine itself is opaque: it loads a [`GraphDescription`], accepts
//! frames, and reports results asynchronously through a [`ResultSink`] from
//! its own worker threads. [`GraphEngineClient`] owns the engine handle and
//! enforces the lifecycle (load → start → submit* → stop).

#[cfg(feature = "engine-ort")]
pub mod ort;
pub mod passthrough;

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::{Mutex, RwLock};

use crate::{
    config::{EngineBackend, EngineConfig},
    error::{EngineStartError, GraphLoadError, SubmissionError},
    graph::GraphDescription,
    types::{EngineResult, Frame, FrameTimestamp, ResultPayload},
};

pub trait GraphEngine: Send + 'static {
    fn name(&self) -> &'static str;

    /// Validates and loads the graph. Called once, before [`GraphEngine::start`].
    fn load(&mut self, graph: &GraphDescription) -> Result<(), GraphLoadError>;

    fn start(&mut self, sink: ResultSink) -> anyhow::Result<()>;

    /// Hands a frame to the engine without waiting for it to be processed.
    fn process_frame(&mut self, frame: Frame) -> Result<(), SubmissionError>;

    /// Stops the engine's workers. Results emitted afterwards are discarded by the sink.
    fn shutdown(&mut self);
}

/// Consumer of engine results, invoked on engine threads.
pub trait ResultHandler: Send + Sync {
    fn handle(&self, result: EngineResult);
}

struct SinkShared {
    closed: RwLock<bool>,
    handler: Arc<dyn ResultHandler>,
    discarded: AtomicU64,
}

/// Callback surface handed to the engine. Cheap to clone and safe to call
/// from any thread. Once closed, no handler call starts and any call in
/// progress has finished.
#[derive(Clone)]
pub struct ResultSink {
    shared: Arc<SinkShared>,
}

impl ResultSink {
    fn new(handler: Arc<dyn ResultHandler>) -> Self {
        Self {
            shared: Arc::new(SinkShared {
                closed: RwLock::new(false),
                handler,
                discarded: AtomicU64::new(0),
            }),
        }
    }

    pub fn emit(&self, timestamp: FrameTimestamp, payload: ResultPayload) {
        let closed = self.shared.closed.read();
        if *closed {
            self.shared.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.shared.handler.handle(EngineResult { timestamp, payload });
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.read()
    }

    fn close(&self) {
        *self.shared.closed.write() = true;
    }

    fn discarded(&self) -> u64 {
        self.shared.discarded.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Initialized,
    Running,
    Stopped,
}

struct ClientInner {
    engine: Box<dyn GraphEngine>,
    state: EngineState,
    last_timestamp: Option<FrameTimestamp>,
}

pub struct GraphEngineClient {
    inner: Mutex<ClientInner>,
    sink: ResultSink,
}

impl GraphEngineClient {
    pub fn new(engine: Box<dyn GraphEngine>, handler: Arc<dyn ResultHandler>) -> Self {
        Self {
            inner: Mutex::new(ClientInner {
                engine,
                state: EngineState::Created,
                last_timestamp: None,
            }),
            sink: ResultSink::new(handler),
        }
    }

    pub fn initialize(&self, graph: &GraphDescription) -> Result<(), GraphLoadError> {
        let mut inner = self.inner.lock();
        if inner.state != EngineState::Created {
            return Err(GraphLoadError::AlreadyLoaded);
        }

        inner.engine.load(graph)?;
        inner.state = EngineState::Initialized;
        log::info!(
            "{} engine loaded graph with {} nodes",
            inner.engine.name(),
            graph.calculators().len()
        );
        Ok(())
    }

    pub fn start(&self) -> Result<(), EngineStartError> {
        let mut inner = self.inner.lock();
        match inner.state {
            EngineState::Created => return Err(EngineStartError::NotInitialized),
            EngineState::Running => return Err(EngineStartError::AlreadyStarted),
            EngineState::Stopped => return Err(EngineStartError::Stopped),
            EngineState::Initialized => {}
        }

        inner
            .engine
            .start(self.sink.clone())
            .map_err(|err| EngineStartError::Engine(format!("{err:#}")))?;
        inner.state = EngineState::Running;
        log::info!("{} engine running", inner.engine.name());
        Ok(())
    }

    /// Forwards one admitted frame. Timestamps must strictly increase.
    pub fn submit(&self, frame: Frame) -> Result<(), SubmissionError> {
        let mut inner = self.inner.lock();
        if inner.state != EngineState::Running {
            return Err(SubmissionError::NotStarted);
        }
        if let Some(previous) = inner.last_timestamp {
            if frame.timestamp <= previous {
                return Err(SubmissionError::NonMonotonicTimestamp {
                    previous,
                    got: frame.timestamp,
                });
            }
        }

        let timestamp = frame.timestamp;
        inner.engine.process_frame(frame)?;
        inner.last_timestamp = Some(timestamp);
        Ok(())
    }

    /// Closes the result sink, then shuts the engine down. Idempotent.
    pub fn stop(&self) {
        self.sink.close();

        let mut inner = self.inner.lock();
        if inner.state == EngineState::Stopped {
            return;
        }
        let was_running = inner.state == EngineState::Running;
        inner.state = EngineState::Stopped;
        if was_running {
            inner.engine.shutdown();
        }
        log::info!(
            "{} engine stopped ({} late results discarded)",
            inner.engine.name(),
            self.sink.discarded()
        );
    }

    pub fn state(&self) -> EngineState {
        self.inner.lock().state
    }

    /// Results the engine emitted after the sink was closed.
    pub fn discarded_results(&self) -> u64 {
        self.sink.discarded()
    }
}

pub fn build_engine(config: &EngineConfig) -> anyhow::Result<Box<dyn GraphEngine>> {
    match config.backend {
        EngineBackend::Passthrough => {
            let engine = match &config.replay_path {
                Some(path) => passthrough::PassthroughEngine::from_replay_file(path)?,
                None => passthrough::PassthroughEngine::new(),
            };
            Ok(Box::new(engine))
        }
        #[cfg(feature = "engine-ort")]
        EngineBackend::Ort => Ok(Box::new(ort::OrtHandEngine::new(
            config
                .model_path
                .clone()
                .unwrap_or_else(crate::model_download::default_hand_landmark_model_path),
        ))),
        #[cfg(not(feature = "engine-ort"))]
        EngineBackend::Ort => Err(anyhow::anyhow!(
            "the ort backend is not compiled in (enable the `engine-ort` feature)"
        )),
    }
}

/// Graph loaded when no description file is configured.
pub fn default_graph(backend: EngineBackend) -> &'static str {
    match backend {
        EngineBackend::Passthrough => passthrough::PASSTHROUGH_GRAPH,
        EngineBackend::Ort => HAND_LANDMARK_GRAPH,
    }
}

pub const HAND_LANDMARK_GRAPH: &str = r#"# Single-hand landmarks on CPU.
input_stream: "input_video"
output_stream: "output_video"
output_stream: "hand_landmarks"

node {
  calculator: "FlowLimiterCalculator"
  input_stream: "input_video"
  input_stream: "FINISHED:output_video"
  input_stream_info: {
    tag_index: "FINISHED"
    back_edge: true
  }
  output_stream: "throttled_input_video"
}

node {
  calculator: "HandLandmarkCpu"
  input_stream: "IMAGE:throttled_input_video"
  output_stream: "LANDMARKS:hand_landmarks"
  output_stream: "IMAGE:output_video"
}
"#;

/// Checks every calculator of `graph` against the set an engine can run.
pub(crate) fn require_calculators(
    engine: &str,
    graph: &GraphDescription,
    supported: &[&str],
) -> Result<(), GraphLoadError> {
    match graph
        .calculators()
        .into_iter()
        .find(|calculator| !supported.contains(calculator))
    {
        Some(calculator) => Err(GraphLoadError::UnsupportedCalculator {
            engine: engine.to_string(),
            calculator: calculator.to_string(),
        }),
        None => Ok(()),
    }
}
