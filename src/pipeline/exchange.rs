//! Single-slot frame exchange between ingestion and the output writer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam::utils::CachePadded;

use crate::capture::DecodedFrame;

/// Capacity-1 hand-off buffer with drop-oldest admission
pub struct FrameExchange {
    slot: Mutex<Slot>,
    ready: Condvar,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Slot {
    frame: Option<DecodedFrame>,
    closed: bool,
}

#[derive(Default)]
struct Stats {
    frames_offered: AtomicU64,
    frames_taken: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Result of offering a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Slot was empty
    Stored,
    /// A pending frame was discarded to make room
    Replaced { dropped: u64 },
    /// Exchange has been closed, frame discarded
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeStats {
    pub offered: u64,
    pub taken: u64,
    pub dropped: u64,
}

impl Default for FrameExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameExchange {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            ready: Condvar::new(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer: store a frame, replacing any pending one. Never blocks on the consumer.
    pub fn offer(&self, frame: DecodedFrame) -> Offer {
        let outcome = {
            let mut slot = self.lock();
            if slot.closed {
                return Offer::Closed;
            }
            match slot.frame.replace(frame) {
                Some(old) => Offer::Replaced {
                    dropped: old.sequence(),
                },
                None => Offer::Stored,
            }
        };
        self.ready.notify_one();

        self.stats.frames_offered.fetch_add(1, Ordering::Relaxed);
        if let Offer::Replaced { dropped } = outcome {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("camrelay_frames_dropped").increment(1);
            tracing::debug!("Frame {} superseded before pickup", dropped);
        }
        outcome
    }

    /// Consumer: wait up to `timeout` for a frame and empty the slot.
    ///
    /// Returns `None` on timeout or once the exchange is closed.
    pub fn take(&self, timeout: Duration) -> Option<DecodedFrame> {
        let guard = self.lock();
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |s| s.frame.is_none() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);

        let frame = slot.frame.take()?;
        self.stats.frames_taken.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Discard any pending frame, reject further offers and wake the consumer.
    pub fn close(&self) {
        {
            let mut slot = self.lock();
            slot.closed = true;
            slot.frame = None;
        }
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frame.is_none()
    }

    pub fn stats(&self) -> ExchangeStats {
        ExchangeStats {
            offered: self.stats.frames_offered.load(Ordering::Relaxed),
            taken: self.stats.frames_taken.load(Ordering::Relaxed),
            dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
        }
    }
}
