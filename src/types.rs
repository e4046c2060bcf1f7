use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Capture timestamp in microseconds since the capture clock origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameTimestamp(pub u64);

impl FrameTimestamp {
    pub fn as_micros(self) -> u64 {
        self.0
    }
}

/// Monotonic clock shared by a capture stream. Every call to [`CaptureClock::stamp`]
/// returns a timestamp strictly greater than the previous one.
#[derive(Debug)]
pub struct CaptureClock {
    origin: Instant,
    last: Option<u64>,
}

impl CaptureClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: None,
        }
    }

    pub fn stamp(&mut self) -> FrameTimestamp {
        let elapsed = self.origin.elapsed().as_micros() as u64;
        let next = match self.last {
            Some(last) if elapsed <= last => last + 1,
            _ => elapsed,
        };
        self.last = Some(next);
        FrameTimestamp(next)
    }
}

impl Default for CaptureClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Bgra,
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        4
    }
}

/// Packed 4-byte-per-pixel image, row stride equal to `width * 4`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PixelFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl PixelFrame {
    pub fn expected_len(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(self.format.bytes_per_pixel())
    }

    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.expected_len()
    }
}

#[derive(Clone, Debug)]
pub struct Frame {
    pub image: PixelFrame,
    pub timestamp: FrameTimestamp,
}

/// Index of a tracked entity (face, hand, person) inside one frame's results.
pub type EntityIndex = usize;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultPayload {
    PixelFrame(PixelFrame),
    /// 4x4 column-major rigid transform.
    TransformMatrix {
        entity: EntityIndex,
        matrix: Vec<f32>,
    },
    LandmarkSet {
        entity: EntityIndex,
        coords: Vec<f32>,
    },
    IndexedGeometry {
        entity: EntityIndex,
        vertices: Vec<f32>,
        indices: Vec<u32>,
    },
}

impl ResultPayload {
    pub fn channel(&self) -> ResultChannel {
        match self {
            ResultPayload::PixelFrame(_) => ResultChannel::Pixel,
            ResultPayload::TransformMatrix { .. } => ResultChannel::Transform,
            ResultPayload::LandmarkSet { .. } => ResultChannel::Landmarks,
            ResultPayload::IndexedGeometry { .. } => ResultChannel::Geometry,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultChannel {
    #[default]
    Pixel,
    Transform,
    Landmarks,
    Geometry,
}

impl ResultChannel {
    pub fn label(&self) -> &'static str {
        match self {
            ResultChannel::Pixel => "pixel",
            ResultChannel::Transform => "transform",
            ResultChannel::Landmarks => "landmarks",
            ResultChannel::Geometry => "geometry",
        }
    }
}

/// One payload emitted by the graph engine, tagged with the frame it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineResult {
    pub timestamp: FrameTimestamp,
    pub payload: ResultPayload,
}
