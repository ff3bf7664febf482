// Replaces the ambient globals (peer-id generator, shared RNG, progress
// persistence) a naive port would reach for with state that is created once
// at startup and threaded explicitly through the torrent and its sessions.
use std::{
    path::PathBuf,
    sync::Mutex,
    time::Instant,
};

use rand::{rngs::StdRng, SeedableRng};

use crate::{progress::Progress, Bitfield};

pub trait Clock: std::fmt::Debug + Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

// Persists which pieces are verified so a restart can skip re-hashing.
pub trait ProgressSink: std::fmt::Debug + Send + Sync {
    fn persist(&self, have: &Bitfield);
}

#[derive(Debug)]
pub struct FileProgressSink {
    path: PathBuf,
}

impl FileProgressSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ProgressSink for FileProgressSink {
    fn persist(&self, have: &Bitfield) {
        if let Err(e) = Progress::from_bitfield(have).save(&self.path) {
            tracing::warn!("failed to persist progress file: {}", e);
        }
    }
}

#[derive(Debug)]
pub struct Context {
    pub peer_id: [u8; 20],
    pub clock: Box<dyn Clock>,
    pub rng: Mutex<StdRng>,
    pub progress_sink: Box<dyn ProgressSink>,
}

impl Context {
    pub fn new(peer_id: [u8; 20], progress_path: PathBuf) -> Self {
        Self {
            peer_id,
            clock: Box::new(SystemClock),
            rng: Mutex::new(StdRng::from_entropy()),
            progress_sink: Box::new(FileProgressSink::new(progress_path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_reports_monotonic_time() {
        let ctx = Context::new([0u8; 20], PathBuf::from("unused.progress"));
        let a = ctx.clock.now();
        let b = ctx.clock.now();
        assert!(b >= a);
    }
}
