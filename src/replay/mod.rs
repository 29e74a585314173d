//! Live replay: per-stream worker threads, the shared pacing clock, and
//! the MySQL client wrapper.

pub mod client;
pub mod worker;

pub use client::{ReplayClient, ReplayOpts};
pub use worker::{ReplayHandle, WorkerItem};

use crate::protocol::mysql::WireTime;
use crate::stats::SharedStats;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// State every replay worker shares: target options, the replay epoch
/// for pacing, and the statistics sinks.
#[derive(Debug)]
pub struct ReplayShared {
    pub opts: ReplayOpts,
    /// Wall-clock instant replay started; pacing offsets are relative
    /// to this.
    pub start: Instant,
    /// Capture timestamp of the first payload byte seen; set once by
    /// the dispatch thread before any worker receives an item.
    pub first_capture_ts: OnceLock<WireTime>,
    pub stats: Arc<SharedStats>,
}

impl ReplayShared {
    pub fn new(opts: ReplayOpts, stats: Arc<SharedStats>) -> Arc<Self> {
        Arc::new(ReplayShared {
            opts,
            start: Instant::now(),
            first_capture_ts: OnceLock::new(),
            stats,
        })
    }
}
