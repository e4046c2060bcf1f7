//! Hand landmark graph backed by an ONNX Runtime session.
//!
//! Only the `HandLandmarkCpu` node is executed; the flow limiter in front of
//! it is already enforced by the host's frame throttle.

pub mod letterbox;

use std::{
    path::{Path, PathBuf},
    thread,
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::Tensor,
};

use super::{GraphEngine, ResultSink, require_calculators};
use crate::{
    error::{GraphLoadError, SubmissionError},
    graph::GraphDescription,
    model_download::{HAND_LANDMARK_MODEL, ensure_model_ready},
    types::{Frame, PixelFrame, ResultPayload},
};

const SUPPORTED_CALCULATORS: &[&str] = &["FlowLimiterCalculator", "HandLandmarkCpu"];

/// Detections below this confidence are reported as "no hand".
pub const MIN_HAND_CONFIDENCE: f32 = 0.2;

#[derive(Clone, Debug, PartialEq)]
pub struct HandLandmarks {
    /// Frame-normalized `x, y, z` per landmark.
    pub coords: Vec<f32>,
    pub confidence: f32,
    pub handedness: f32,
}

impl HandLandmarks {
    pub fn is_detection(&self) -> bool {
        self.confidence >= MIN_HAND_CONFIDENCE && !self.coords.is_empty()
    }

    pub fn wrist(&self) -> Option<[f32; 3]> {
        match self.coords.get(..3) {
            Some(&[x, y, z]) => Some([x, y, z]),
            _ => None,
        }
    }
}

pub(crate) trait LandmarkModel: Send + 'static {
    fn infer(&mut self, image: &PixelFrame) -> Result<HandLandmarks>;
}

pub struct OrtHandEngine {
    model_path: PathBuf,
    loaded: bool,
    frame_tx: Option<Sender<Frame>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl OrtHandEngine {
    pub fn new(model_path: PathBuf) -> Self {
        Self {
            model_path,
            loaded: false,
            frame_tx: None,
            worker: None,
        }
    }
}

impl GraphEngine for OrtHandEngine {
    fn name(&self) -> &'static str {
        "ort"
    }

    fn load(&mut self, graph: &GraphDescription) -> Result<(), GraphLoadError> {
        require_calculators(self.name(), graph, SUPPORTED_CALCULATORS)?;
        self.loaded = true;
        Ok(())
    }

    fn start(&mut self, sink: ResultSink) -> Result<()> {
        if !self.loaded {
            return Err(anyhow!("no graph loaded"));
        }

        ensure_model_ready(&HAND_LANDMARK_MODEL, &self.model_path, |event| {
            if let Some(summary) = event.summary() {
                log::debug!("{} model: {summary}", HAND_LANDMARK_MODEL.label);
            }
        })?;
        let model = OrtLandmarkModel::new(&self.model_path)?;
        log::info!(
            "hand landmark ORT backend ready using {}",
            self.model_path.display()
        );

        let (frame_tx, frame_rx) = bounded(1);
        let worker = thread::Builder::new()
            .name("ort-hand-engine".into())
            .spawn(move || run_worker_loop(model, frame_rx, sink))
            .context("failed to spawn ORT worker")?;

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
            Err(TrySendError::Full(_)) => {
                Err(SubmissionError::Rejected("inference still running".into()))
            }
            Err(TrySendError::Disconnected(_)) => Err(SubmissionError::NotStarted),
        }
    }

    fn shutdown(&mut self) {
        self.frame_tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for OrtHandEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs inference on every frame and reports landmarks, the wrist transform
/// and finally the frame itself as the graph's output video.
pub(crate) fn run_worker_loop<M: LandmarkModel>(
    mut model: M,
    frame_rx: Receiver<Frame>,
    sink: ResultSink,
) {
    while let Ok(frame) = frame_rx.recv() {
        match model.infer(&frame.image) {
            Ok(hand) if hand.is_detection() => {
                if let Some([x, y, z]) = hand.wrist() {
                    sink.emit(
                        frame.timestamp,
                        ResultPayload::TransformMatrix {
                            entity: 0,
                            matrix: translation_matrix(x, y, z),
                        },
                    );
                }
                sink.emit(
                    frame.timestamp,
                    ResultPayload::LandmarkSet {
                        entity: 0,
                        coords: hand.coords,
                    },
                );
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!("hand landmark inference failed: {err:?}");
            }
        }

        sink.emit(frame.timestamp, ResultPayload::PixelFrame(frame.image));
    }
}

fn translation_matrix(x: f32, y: f32, z: f32) -> Vec<f32> {
    vec![
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        x, y, z, 1.0,
    ]
}

struct OrtLandmarkModel {
    session: Session,
}

impl OrtLandmarkModel {
    fn new(model_path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load ORT session from {}", model_path.display()))?;

        Ok(Self { session })
    }
}

impl LandmarkModel for OrtLandmarkModel {
    fn infer(&mut self, image: &PixelFrame) -> Result<HandLandmarks> {
        let (input, placement) = letterbox::prepare_frame_with_size(image, letterbox::INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run ORT session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("model returned no outputs"));
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flattened: Vec<f32> = coords.iter().copied().collect();
        let landmarks = letterbox::decode_landmarks(&flattened)?;

        let scalar_output = |idx: usize| {
            if outputs.len() > idx {
                outputs[idx]
                    .try_extract_array::<f32>()
                    .ok()
                    .and_then(|arr| arr.iter().next().copied())
                    .unwrap_or(0.0)
            } else {
                0.0
            }
        };
        let confidence = scalar_output(1);
        let handedness = scalar_output(2);

        Ok(HandLandmarks {
            coords: letterbox::normalize_landmarks(&landmarks, &placement),
            confidence: confidence.clamp(0.0, 1.0),
            handedness,
        })
    }
}
