use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use crate::types::Frame;

/// Receiver of captured frames. Called on the capture thread; must not block.
pub trait FrameSink: Send + Sync {
    /// Returns whether the frame was accepted.
    fn offer(&self, frame: Frame) -> bool;
}

/// Handle to a running capture thread. Dropping it stops and joins the thread.
#[derive(Debug)]
pub struct CaptureStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CaptureStream {
    pub(crate) fn new(stop: Arc<AtomicBool>, handle: thread::JoinHandle<()>) -> Self {
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// True once the capture thread has exited on its own (end of input or device loss).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}
