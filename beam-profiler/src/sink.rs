//! Drop-if-busy admission gate in front of the pipeline.
//!
//! At most one frame is in flight: [`FrameSink::submit`] forwards a frame
//! only while no other frame is being processed and drops it otherwise.
//! Dropping is normal backpressure and is only counted, never reported as
//! an error.

use crossbeam_channel::{bounded, Receiver, Sender};
use shared::Frame;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct SinkState {
    processing: AtomicBool,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

/// Admission counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkStats {
    pub accepted: u64,
    pub dropped: u64,
}

#[derive(Clone)]
pub struct FrameSink {
    state: Arc<SinkState>,
    downstream: Sender<Frame>,
}

impl FrameSink {
    /// Create a sink and the receiver the pipeline worker reads from.
    pub fn new() -> (Self, Receiver<Frame>) {
        let (downstream, receiver) = bounded(1);
        (
            Self {
                state: Arc::new(SinkState::default()),
                downstream,
            },
            receiver,
        )
    }

    /// Forward `frame` if the pipeline is idle. Returns whether it was accepted.
    pub fn submit(&self, frame: Frame) -> bool {
        let admitted = self
            .state
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if !admitted {
            self.state.dropped.fetch_add(1, Ordering::Relaxed);
            log::trace!("pipeline busy, frame dropped");
            return false;
        }

        if self.downstream.try_send(frame).is_err() {
            // Receiver gone or still holding an unread frame
            self.state.processing.store(false, Ordering::Release);
            self.state.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.state.accepted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Signal that the in-flight frame has left the pipeline.
    pub fn done(&self) {
        self.state.processing.store(false, Ordering::Release);
    }

    pub fn is_processing(&self) -> bool {
        self.state.processing.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            accepted: self.state.accepted.load(Ordering::Relaxed),
            dropped: self.state.dropped.load(Ordering::Relaxed),
        }
    }
}
