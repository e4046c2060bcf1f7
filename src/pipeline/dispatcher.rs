//! Routes engine results onto the presentation thread.
//!
//! Results arrive on engine threads, one payload at a time. Each payload is
//! converted in place (texture, transform, or reconstructed geometry) and
//! collected into a [`SceneBatch`] for its frame. The batch is handed to the
//! presentation thread once the gate channel's result for that frame arrives,
//! which also frees the in-flight slot for the next camera frame.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;

use super::{engine::ResultHandler, texture::Texture, throttle::InFlightToken};
use crate::{
    error::MalformedPayloadError,
    geometry::{
        PoseLandmark, ReconstructedGeometry, RigidTransform, decode_records, reconstruct_mesh,
    },
    profile::GraphProfile,
    types::{EngineResult, EntityIndex, FrameTimestamp, ResultChannel, ResultPayload},
};

#[derive(Clone, Debug, PartialEq)]
pub struct GeometryUpdate {
    pub entity: EntityIndex,
    pub channel: ResultChannel,
    pub geometry: ReconstructedGeometry,
    /// Where a skeleton is pinned in the scene, e.g. the pose hip center.
    pub anchor: Option<[f32; 3]>,
}

/// Everything one frame produced, applied by the presenter in field order.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneBatch {
    pub timestamp: FrameTimestamp,
    pub texture: Option<Texture>,
    pub transforms: Vec<(EntityIndex, RigidTransform)>,
    pub geometries: Vec<GeometryUpdate>,
}

impl SceneBatch {
    fn new(timestamp: FrameTimestamp) -> Self {
        Self {
            timestamp,
            texture: None,
            transforms: Vec::new(),
            geometries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.texture.is_none() && self.transforms.is_empty() && self.geometries.is_empty()
    }

    fn apply(&mut self, update: Update) {
        match update {
            Update::Texture(texture) => self.texture = Some(texture),
            Update::Transform(entity, transform) => self.transforms.push((entity, transform)),
            Update::Geometry(geometry) => self.geometries.push(geometry),
        }
    }
}

enum Update {
    Texture(Texture),
    Transform(EntityIndex, RigidTransform),
    Geometry(GeometryUpdate),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub routed: u64,
    pub malformed: u64,
    /// Results for a frame that is older than the one being collected or
    /// whose batch was already sent.
    pub out_of_order: u64,
    pub batches_sent: u64,
    /// Batches dropped because the presentation thread fell behind.
    pub batches_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    routed: AtomicU64,
    malformed: AtomicU64,
    out_of_order: AtomicU64,
    batches_sent: AtomicU64,
    batches_dropped: AtomicU64,
}

/// The batch being filled and the newest frame already sent on.
#[derive(Debug, Default)]
struct Collector {
    pending: Option<SceneBatch>,
    last_flushed: Option<FrameTimestamp>,
}

impl Collector {
    fn is_behind(&self, timestamp: FrameTimestamp) -> bool {
        self.last_flushed.is_some_and(|flushed| timestamp <= flushed)
            || self
                .pending
                .as_ref()
                .is_some_and(|batch| timestamp < batch.timestamp)
    }

    fn flush(&mut self) -> Option<SceneBatch> {
        let batch = self.pending.take()?;
        self.last_flushed = Some(batch.timestamp);
        Some(batch)
    }
}

pub struct ResultDispatcher {
    profile: GraphProfile,
    gate: ResultChannel,
    viewport: (u32, u32),
    token: Arc<InFlightToken>,
    collector: Mutex<Collector>,
    batch_tx: Sender<SceneBatch>,
    counters: Counters,
}

impl ResultDispatcher {
    pub fn new(
        profile: GraphProfile,
        gate: ResultChannel,
        viewport: (u32, u32),
        token: Arc<InFlightToken>,
        batch_tx: Sender<SceneBatch>,
    ) -> Self {
        Self {
            profile,
            gate,
            viewport,
            token,
            collector: Mutex::new(Collector::default()),
            batch_tx,
            counters: Counters::default(),
        }
    }

    /// Entry point for engine callbacks. Never blocks on the presentation thread.
    pub fn dispatch(&self, result: EngineResult) {
        let EngineResult { timestamp, payload } = result;
        let channel = payload.channel();

        let update = match self.route(payload) {
            Ok(update) => Some(update),
            Err(err) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "dropping malformed {} payload for frame {timestamp:?}: {err}",
                    channel.label()
                );
                None
            }
        };

        let mut ready = Vec::with_capacity(2);
        {
            let mut collector = self.collector.lock();
            if collector.is_behind(timestamp) {
                self.counters.out_of_order.fetch_add(1, Ordering::Relaxed);
                log::debug!("result for frame {timestamp:?} arrived after its batch left");
                drop(collector);
                if channel == self.gate {
                    self.token.release(timestamp);
                }
                return;
            }
            if collector
                .pending
                .as_ref()
                .is_some_and(|batch| batch.timestamp < timestamp)
            {
                // The older frame never produced its gate result.
                ready.extend(collector.flush());
            }

            let batch = collector
                .pending
                .get_or_insert_with(|| SceneBatch::new(timestamp));
            if let Some(update) = update {
                self.counters.routed.fetch_add(1, Ordering::Relaxed);
                batch.apply(update);
            }
            if channel == self.gate {
                ready.extend(collector.flush());
            }
        }

        for batch in ready {
            self.send(batch);
        }
        if channel == self.gate {
            self.token.release(timestamp);
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            routed: self.counters.routed.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            out_of_order: self.counters.out_of_order.load(Ordering::Relaxed),
            batches_sent: self.counters.batches_sent.load(Ordering::Relaxed),
            batches_dropped: self.counters.batches_dropped.load(Ordering::Relaxed),
        }
    }

    fn send(&self, batch: SceneBatch) {
        let timestamp = batch.timestamp;
        match self.batch_tx.try_send(batch) {
            Ok(()) => {
                self.counters.batches_sent.fetch_add(1, Ordering::Relaxed);
                log::debug!("batch for frame {timestamp:?} queued for presentation");
            }
            Err(TrySendError::Full(_)) => {
                self.counters.batches_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("presentation busy, dropped batch for frame {timestamp:?}");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.batches_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn route(&self, payload: ResultPayload) -> Result<Update, MalformedPayloadError> {
        match payload {
            ResultPayload::PixelFrame(frame) => {
                Texture::from_frame(frame, self.viewport).map(Update::Texture)
            }
            ResultPayload::TransformMatrix { entity, matrix } => {
                RigidTransform::from_column_major(&matrix)
                    .map(|transform| Update::Transform(entity, transform))
            }
            ResultPayload::LandmarkSet { entity, coords } => {
                let (layout, topology) = self.profile.landmark_layout().ok_or_else(|| {
                    MalformedPayloadError::Layout(format!(
                        "{} graph has no landmark layout",
                        self.profile.label()
                    ))
                })?;
                let geometry = reconstruct_mesh(&coords, &[], &layout, Some(topology))?;
                let anchor = match self.profile {
                    GraphProfile::Pose | GraphProfile::MultiPose => {
                        PoseLandmark::hip_center(&decode_records::<PoseLandmark>(&coords)?)
                    }
                    _ => None,
                };
                Ok(Update::Geometry(GeometryUpdate {
                    entity,
                    channel: ResultChannel::Landmarks,
                    geometry,
                    anchor,
                }))
            }
            ResultPayload::IndexedGeometry {
                entity,
                vertices,
                indices,
            } => {
                let layout = self.profile.geometry_layout().ok_or_else(|| {
                    MalformedPayloadError::Layout(format!(
                        "{} graph has no mesh layout",
                        self.profile.label()
                    ))
                })?;
                let geometry = reconstruct_mesh(&vertices, &indices, &layout, None)?;
                Ok(Update::Geometry(GeometryUpdate {
                    entity,
                    channel: ResultChannel::Geometry,
                    geometry,
                    anchor: None,
                }))
            }
        }
    }
}

impl ResultHandler for ResultDispatcher {
    fn handle(&self, result: EngineResult) {
        self.dispatch(result);
    }
}
