//! Live handle accounting for demuxers and decoders
//!
//! Every demuxer and decoder holds a [`HandleGuard`] for its lifetime, so
//! the counters drop back to zero once all sources are released.

use std::sync::atomic::{AtomicUsize, Ordering};

static LIVE_DEMUXERS: AtomicUsize = AtomicUsize::new(0);
static LIVE_DECODERS: AtomicUsize = AtomicUsize::new(0);

/// Number of demuxers currently alive in this process
pub fn live_demuxers() -> usize {
    LIVE_DEMUXERS.load(Ordering::Acquire)
}

/// Number of decoders currently alive in this process
pub fn live_decoders() -> usize {
    LIVE_DECODERS.load(Ordering::Acquire)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleKind {
    Demuxer,
    Decoder,
}

impl HandleKind {
    fn counter(self) -> &'static AtomicUsize {
        match self {
            HandleKind::Demuxer => &LIVE_DEMUXERS,
            HandleKind::Decoder => &LIVE_DECODERS,
        }
    }
}

/// Counts one live handle until dropped
#[derive(Debug)]
pub(crate) struct HandleGuard {
    kind: HandleKind,
}

impl HandleGuard {
    pub(crate) fn new(kind: HandleKind) -> Self {
        kind.counter().fetch_add(1, Ordering::AcqRel);
        Self { kind }
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.kind.counter().fetch_sub(1, Ordering::AcqRel);
    }
}

/// Serialises tests that assert on the global counters
#[cfg(test)]
pub(crate) fn counter_lock() -> parking_lot::MutexGuard<'static, ()> {
    static LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());
    LOCK.lock()
}
