//! # Curio Engine
//!
//! Pipeline graph resolution and the local-first track cache and
//! synchronization engine behind the Curio curation client:
//! - Pipeline graph resolver (ordered topology from stage records)
//! - Movement log (append-only album stage history)
//! - Status cache (request deduplication with TTL memoization)
//! - Unified track cache with a durable retry queue
//! - Playback threshold evaluator (scrobble-style play counting)
//!
//! This crate is a library consumed by a presentation layer; it owns no
//! CLI, server, or wire protocol.

pub mod db;
pub mod movement;
pub mod pipeline;
pub mod playback;
pub mod remote;
pub mod state;
pub mod status;
pub mod track;

pub use curio_common::{CurioEvent, Error, Result};
pub use movement::{MovementLog, StagePlacement};
pub use pipeline::{resolve, OrderedStage};
pub use playback::{ListeningSession, PlaybackSample, ThresholdEvaluator};
pub use state::CurioSession;
pub use status::StatusCache;
pub use track::{SyncSweepReport, TrackCache};
