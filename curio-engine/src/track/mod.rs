//! Unified track cache and sync queue sweep

pub mod cache;

pub use cache::{SyncSweepReport, TrackCache};
