//! Single-slot admission between the capture thread and the graph engine.
//!
//! At most one frame is in flight. Frames offered while the slot is held are
//! dropped on the spot; the next camera frame supersedes them. The slot is
//! freed when the gating result for the admitted frame comes back, when
//! submission fails, when it goes stale, or at teardown.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::{
    error::SubmissionError,
    types::{Frame, FrameTimestamp},
};

use super::{capture::FrameSink, engine::GraphEngineClient};

const FREE: u64 = u64::MAX;

/// The in-flight slot: either free or holding the timestamp of the admitted frame.
#[derive(Debug)]
pub struct InFlightToken {
    slot: AtomicU64,
}

impl InFlightToken {
    pub fn new() -> Self {
        Self {
            slot: AtomicU64::new(FREE),
        }
    }

    pub fn try_acquire(&self, timestamp: FrameTimestamp) -> bool {
        debug_assert_ne!(timestamp.as_micros(), FREE);
        self.slot
            .compare_exchange(FREE, timestamp.as_micros(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Frees the slot only if it is still held by `timestamp`.
    pub fn release(&self, timestamp: FrameTimestamp) -> bool {
        self.slot
            .compare_exchange(timestamp.as_micros(), FREE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn force_release(&self) -> Option<FrameTimestamp> {
        decode(self.slot.swap(FREE, Ordering::AcqRel))
    }

    pub fn holder(&self) -> Option<FrameTimestamp> {
        decode(self.slot.load(Ordering::Acquire))
    }

    /// Frees the slot if its holder was captured at least `timeout` before `now`.
    /// Capture timestamps share one clock, so the age needs no second atomic.
    pub fn reclaim_if_stale(
        &self,
        now: FrameTimestamp,
        timeout: Duration,
    ) -> Option<FrameTimestamp> {
        let held = self.holder()?;
        let age = now.as_micros().saturating_sub(held.as_micros());
        if age < timeout.as_micros() as u64 {
            return None;
        }
        self.release(held).then_some(held)
    }
}

impl Default for InFlightToken {
    fn default() -> Self {
        Self::new()
    }
}

fn decode(raw: u64) -> Option<FrameTimestamp> {
    (raw != FREE).then_some(FrameTimestamp(raw))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Submitted,
    Throttled,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThrottleStats {
    pub submitted: u64,
    pub throttled: u64,
    pub reclaimed: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    throttled: AtomicU64,
    reclaimed: AtomicU64,
    failed: AtomicU64,
}

pub struct FrameThrottle {
    token: Arc<InFlightToken>,
    client: Arc<GraphEngineClient>,
    stale_after: Duration,
    counters: Counters,
}

impl FrameThrottle {
    pub fn new(
        token: Arc<InFlightToken>,
        client: Arc<GraphEngineClient>,
        stale_after: Duration,
    ) -> Self {
        Self {
            token,
            client,
            stale_after,
            counters: Counters::default(),
        }
    }

    pub fn token(&self) -> &Arc<InFlightToken> {
        &self.token
    }

    /// Admits `frame` if the slot is free and forwards it to the engine.
    pub fn offer_frame(&self, frame: Frame) -> Result<Admission, SubmissionError> {
        let timestamp = frame.timestamp;

        if !self.admit(timestamp) {
            self.counters.throttled.fetch_add(1, Ordering::Relaxed);
            log::debug!("frame {timestamp:?} dropped, {:?} in flight", self.token.holder());
            return Ok(Admission::Throttled);
        }

        match self.client.submit(frame) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(Admission::Submitted)
            }
            Err(err) => {
                self.token.release(timestamp);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            throttled: self.counters.throttled.load(Ordering::Relaxed),
            reclaimed: self.counters.reclaimed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    fn admit(&self, timestamp: FrameTimestamp) -> bool {
        if self.token.try_acquire(timestamp) {
            return true;
        }

        match self.token.reclaim_if_stale(timestamp, self.stale_after) {
            Some(stale) => {
                self.counters.reclaimed.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "no result for frame {stale:?} after {:?}, reclaiming in-flight slot",
                    self.stale_after
                );
                self.token.try_acquire(timestamp)
            }
            None => false,
        }
    }
}

impl FrameSink for FrameThrottle {
    fn offer(&self, frame: Frame) -> bool {
        match self.offer_frame(frame) {
            Ok(Admission::Submitted) => true,
            Ok(Admission::Throttled) => false,
            Err(SubmissionError::NotStarted) => {
                log::debug!("frame dropped, engine not running");
                false
            }
            Err(err) => {
                log::warn!("frame submission failed: {err}");
                false
            }
        }
    }
}
