//! Engine that runs no model: every frame comes back as the pixel output,
//! optionally preceded by recorded payloads replayed from a JSON file.
//!
//! Replay files hold one array of payloads per frame and are cycled:
//!
//! ```json
//! [
//!   [{"kind": "landmark_set", "entity": 0, "coords": [0.5, 0.5, 0.0]}],
//!   []
//! ]
//! ```

use std::{fs, path::Path, thread};

use anyhow::{Context, anyhow};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use super::{GraphEngine, ResultSink, require_calculators};
use crate::{
    error::{GraphLoadError, SubmissionError},
    graph::GraphDescription,
    types::{Frame, ResultPayload},
};

pub const PASSTHROUGH_GRAPH: &str = r#"# Frames in, frames out.
input_stream: "input_video"
output_stream: "output_video"

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
  calculator: "PassThroughCalculator"
  input_stream: "throttled_input_video"
  output_stream: "output_video"
}
"#;

const SUPPORTED_CALCULATORS: &[&str] = &["FlowLimiterCalculator", "PassThroughCalculator"];

pub struct PassthroughEngine {
    replay: Vec<Vec<ResultPayload>>,
    loaded: bool,
    frame_tx: Option<Sender<Frame>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl PassthroughEngine {
    pub fn new() -> Self {
        Self::with_replay(Vec::new())
    }

    pub fn with_replay(replay: Vec<Vec<ResultPayload>>) -> Self {
        Self {
            replay,
            loaded: false,
            frame_tx: None,
            worker: None,
        }
    }

    pub fn from_replay_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read replay file {}", path.display()))?;
        let replay: Vec<Vec<ResultPayload>> = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse replay file {}", path.display()))?;
        log::info!(
            "loaded {} recorded frames from {}",
            replay.len(),
            path.display()
        );
        Ok(Self::with_replay(replay))
    }
}

impl Default for PassthroughEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphEngine for PassthroughEngine {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn load(&mut self, graph: &GraphDescription) -> Result<(), GraphLoadError> {
        require_calculators(self.name(), graph, SUPPORTED_CALCULATORS)?;
        self.loaded = true;
        Ok(())
    }

    fn start(&mut self, sink: ResultSink) -> anyhow::Result<()> {
        if !self.loaded {
            return Err(anyhow!("no graph loaded"));
        }

        let (frame_tx, frame_rx) = bounded(1);
        let replay = std::mem::take(&mut self.replay);
        let worker = thread::Builder::new()
            .name("passthrough-engine".into())
            .spawn(move || run_worker(frame_rx, sink, replay))
            .context("failed to spawn passthrough worker")?;

        self.frame_tx = Some(frame_tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn process_frame(&mut self, frame: Frame) -> Result<(), SubmissionError> {
        let Some(frame_tx) = self.frame_tx.as_ref() else {
            return Err(SubmissionError::NotStarted);
        };
        match frame_tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SubmissionError::Rejected(
                "passthrough worker is still busy".into(),
            )),
            Err(TrySendError::Disconnected(_)) => Err(SubmissionError::NotStarted),
        }
    }

    fn shutdown(&mut self) {
        // Dropping the sender ends the worker loop.
        self.frame_tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for PassthroughEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(frame_rx: Receiver<Frame>, sink: ResultSink, replay: Vec<Vec<ResultPayload>>) {
    let mut processed = 0usize;
    while let Ok(frame) = frame_rx.recv() {
        if let Some(recorded) = replay.get(processed % replay.len().max(1)) {
            for payload in recorded {
                sink.emit(frame.timestamp, payload.clone());
            }
        }
        processed += 1;

        // The pixel output is the graph's FINISHED stream, so it goes last.
        sink.emit(frame.timestamp, ResultPayload::PixelFrame(frame.image));
    }
    log::debug!("passthrough worker exiting after {processed} frames");
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        pipeline::engine::{
            GraphEngineClient,
            testing::{CountingHandler, passthrough_graph},
        },
        types::{FrameTimestamp, PixelFormat, PixelFrame, ResultChannel},
    };

    fn frame(micros: u64) -> Frame {
        Frame {
            image: PixelFrame {
                width: 2,
                height: 1,
                format: PixelFormat::Rgba,
                data: vec![7; 8],
            },
            timestamp: FrameTimestamp(micros),
        }
    }

    fn wait_for(handler: &CountingHandler, count: usize) {
        for _ in 0..200 {
            if handler.results.lock().len() >= count {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("timed out waiting for {count} results");
    }

    #[test]
    fn graph_must_only_use_passthrough_nodes() {
        let mut engine = PassthroughEngine::new();
        let graph =
            GraphDescription::new("node {\n  calculator: \"FaceGeometryPipelineGpu\"\n}\n").unwrap();
        assert!(matches!(
            engine.load(&graph),
            Err(GraphLoadError::UnsupportedCalculator { .. })
        ));
        engine.load(&passthrough_graph()).unwrap();
    }

    #[test]
    fn echoes_frame_after_recorded_payloads() {
        let replay = vec![vec![ResultPayload::LandmarkSet {
            entity: 0,
            coords: vec![0.0, 1.0, 2.0],
        }]];
        let handler = Arc::new(CountingHandler::default());
        let client = GraphEngineClient::new(
            Box::new(PassthroughEngine::with_replay(replay)),
            handler.clone(),
        );
        client.initialize(&passthrough_graph()).unwrap();
        client.start().unwrap();

        client.submit(frame(1)).unwrap();
        wait_for(&handler, 2);
        client.stop();

        let results = handler.results.lock();
        let channels: Vec<_> = results.iter().map(|r| r.payload.channel()).collect();
        assert_eq!(channels, vec![ResultChannel::Landmarks, ResultChannel::Pixel]);
        assert!(results.iter().all(|r| r.timestamp == FrameTimestamp(1)));
    }

    #[test]
    fn parses_replay_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.json");
        fs::write(
            &path,
            r#"[[{"kind":"transform_matrix","entity":0,"matrix":[1,0,0,0,0,1,0,0,0,0,1,0,0,0,0,1]}],[]]"#,
        )
        .unwrap();
        let engine = PassthroughEngine::from_replay_file(&path).unwrap();
        assert_eq!(engine.replay.len(), 2);
        assert_eq!(engine.replay[0][0].channel(), ResultChannel::Transform);

        fs::write(&path, "not json").unwrap();
        assert!(PassthroughEngine::from_replay_file(&path).is_err());
    }

    #[test]
    fn process_before_start_is_rejected() {
        let mut engine = PassthroughEngine::new();
        assert_eq!(
            engine.process_frame(frame(1)),
            Err(SubmissionError::NotStarted)
        );
    }
}
