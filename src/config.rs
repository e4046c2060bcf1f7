//! Pipeline configuration.
//!
//! One [`PipelineConfig`] is built at startup (from TOML or defaults) and
//! passed down explicitly to the capture source, engine and presenter.
//!
//! ```toml
//! [source]
//! kind = "camera"
//!
//! [source.camera]
//! facing = "front"
//! resolution = "vga640x480"
//! orientation = "portrait"
//!
//! [graph]
//! profile = "pose"
//! gate_channel = "pixel"
//!
//! [engine]
//! backend = "passthrough"
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, Result},
    profile::GraphProfile,
    types::{PixelFormat, ResultChannel},
};

pub const DEFAULT_IN_FLIGHT_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_PRESENTATION_QUEUE: usize = 2;
pub const DEFAULT_IMAGE_FPS: u32 = 30;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub graph: GraphConfig,
    pub engine: EngineConfig,
    pub presenter: PresenterConfig,
    pub pipeline: RuntimeConfig,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| {
            PipelineError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(text).map_err(|err| PipelineError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.images.fps == 0 {
            return Err(PipelineError::Config("source.images.fps must be > 0".into()));
        }
        if self.pipeline.presentation_queue == 0 {
            return Err(PipelineError::Config(
                "pipeline.presentation_queue must be > 0".into(),
            ));
        }
        if self.pipeline.in_flight_timeout_ms == 0 {
            return Err(PipelineError::Config(
                "pipeline.in_flight_timeout_ms must be > 0".into(),
            ));
        }
        if self.presenter.viewport_width == 0 || self.presenter.viewport_height == 0 {
            return Err(PipelineError::Config("presenter viewport must be non-empty".into()));
        }
        if !self.graph.profile.emits(self.graph.gate_channel) {
            return Err(PipelineError::Config(format!(
                "gate channel `{}` is never emitted by the {} graph",
                self.graph.gate_channel.label(),
                self.graph.profile.label()
            )));
        }
        if self.engine.backend == EngineBackend::Ort {
            // The hand model emits pixels alone when no hand is found.
            if self.graph.profile != GraphProfile::Hand {
                return Err(PipelineError::Config(format!(
                    "ort engine emits hand landmarks, graph.profile must be `hand` (got `{}`)",
                    self.graph.profile.label()
                )));
            }
            if self.graph.gate_channel != ResultChannel::Pixel {
                return Err(PipelineError::Config(format!(
                    "ort engine requires gate channel `pixel` (got `{}`)",
                    self.graph.gate_channel.label()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Camera,
    Images,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub camera: CameraConfig,
    pub images: ImageSourceConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    #[default]
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionPreset {
    #[default]
    Vga640x480,
    Hd1280x720,
    Hd1920x1080,
    /// Keep whatever the device delivers.
    Native,
}

impl ResolutionPreset {
    /// Landscape dimensions before orientation is applied.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            ResolutionPreset::Vga640x480 => Some((640, 480)),
            ResolutionPreset::Hd1280x720 => Some((1280, 720)),
            ResolutionPreset::Hd1920x1080 => Some((1920, 1080)),
            ResolutionPreset::Native => None,
        }
    }
}

/// Rotation applied to sensor-native (landscape) frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Landscape,
    Portrait,
    LandscapeFlipped,
    PortraitUpsideDown,
}

impl Orientation {
    pub fn clockwise_degrees(&self) -> u32 {
        match self {
            Orientation::Landscape => 0,
            Orientation::Portrait => 90,
            Orientation::LandscapeFlipped => 180,
            Orientation::PortraitUpsideDown => 270,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device_index: u32,
    pub facing: CameraFacing,
    pub resolution: ResolutionPreset,
    pub pixel_format: PixelFormat,
    pub orientation: Orientation,
    /// Defaults to mirroring front-facing cameras.
    pub mirrored: Option<bool>,
}

impl CameraConfig {
    pub fn is_mirrored(&self) -> bool {
        self.mirrored.unwrap_or(self.facing == CameraFacing::Front)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            facing: CameraFacing::Front,
            resolution: ResolutionPreset::Vga640x480,
            pixel_format: PixelFormat::Bgra,
            orientation: Orientation::Landscape,
            mirrored: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSourceConfig {
    pub dir: PathBuf,
    pub fps: u32,
    pub loop_forever: bool,
}

impl ImageSourceConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.fps.max(1)))
    }
}

impl Default for ImageSourceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("frames"),
            fps: DEFAULT_IMAGE_FPS,
            loop_forever: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub profile: GraphProfile,
    /// Falls back to the engine backend's built-in graph when unset.
    pub description_path: Option<PathBuf>,
    /// Result channel whose arrival completes a frame and frees the in-flight slot.
    pub gate_channel: ResultChannel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineBackend {
    #[default]
    Passthrough,
    Ort,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: EngineBackend,
    pub model_path: Option<PathBuf>,
    /// JSON file of recorded payloads the passthrough engine replays per frame.
    pub replay_path: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenterConfig {
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            viewport_width: 390,
            viewport_height: 844,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub in_flight_timeout_ms: u64,
    pub presentation_queue: usize,
    /// Stop after this many seconds instead of waiting for Enter.
    pub run_for_secs: Option<u64>,
}

impl RuntimeConfig {
    pub fn in_flight_timeout(&self) -> Duration {
        Duration::from_millis(self.in_flight_timeout_ms)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            in_flight_timeout_ms: DEFAULT_IN_FLIGHT_TIMEOUT_MS,
            presentation_queue: DEFAULT_PRESENTATION_QUEUE,
            run_for_secs: None,
        }
    }
}
