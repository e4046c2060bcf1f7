//! Error taxonomy for the capture → engine → presentation pipeline.
//!
//! Startup errors ([`GraphLoadError`], [`EngineStartError`],
//! [`DeviceConfigurationError`]) halt pipeline start. Per-frame errors
//! ([`SubmissionError`], [`MalformedPayloadError`]) are logged and the
//! offending frame or payload is dropped.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::FrameTimestamp;

#[derive(Error, Debug)]
pub enum GraphLoadError {
    #[error("graph description is empty")]
    Empty,

    #[error("graph description is malformed: {0}")]
    Malformed(String),

    #[error("graph description declares no nodes")]
    NoNodes,

    #[error("calculator `{calculator}` is not available in the {engine} engine")]
    UnsupportedCalculator { engine: String, calculator: String },

    #[error("failed to read graph description from {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a graph is already loaded")]
    AlreadyLoaded,

    #[error("engine failed to load graph: {0:#}")]
    Engine(anyhow::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EngineStartError {
    #[error("engine started before a graph was loaded")]
    NotInitialized,

    #[error("engine already started")]
    AlreadyStarted,

    #[error("engine was stopped and cannot be restarted")]
    Stopped,

    #[error("engine failed to start: {0}")]
    Engine(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("engine is not running")]
    NotStarted,

    #[error("timestamp {got:?} is not after the previous submission {previous:?}")]
    NonMonotonicTimestamp {
        previous: FrameTimestamp,
        got: FrameTimestamp,
    },

    #[error("engine rejected frame: {0}")]
    Rejected(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MalformedPayloadError {
    #[error("flat vertex array of length {len} is not a multiple of stride {stride}")]
    StrideMismatch { len: usize, stride: usize },

    #[error("triangle index list of length {0} is not a multiple of 3")]
    PartialTriangle(usize),

    #[error("index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },

    #[error("transform matrix needs 16 floats, got {0}")]
    TransformLength(usize),

    #[error("pixel buffer of {got} bytes does not match {width}x{height} (expected {expected})")]
    PixelBufferSize {
        width: u32,
        height: u32,
        expected: usize,
        got: usize,
    },

    #[error("vertex layout is invalid: {0}")]
    Layout(String),
}

#[derive(Error, Debug)]
pub enum DeviceConfigurationError {
    #[error("no camera available at index {0}")]
    CameraUnavailable(u32),

    #[error("failed to open camera: {0:#}")]
    CameraOpen(anyhow::Error),

    #[error("camera capture support is not compiled in (enable the `camera-nokhwa` feature)")]
    CameraDisabled,

    #[error("image directory {0} contains no readable images")]
    NoImages(PathBuf),

    #[error("failed to read image source {path}")]
    ImageSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid capture configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    GraphLoad(#[from] GraphLoadError),

    #[error(transparent)]
    EngineStart(#[from] EngineStartError),

    #[error(transparent)]
    Device(#[from] DeviceConfigurationError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to spawn {name} thread")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
