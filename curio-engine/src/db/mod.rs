//! Database access layer
//!
//! Queries for stages, movement history, and the sync queue.

pub mod movement;
pub mod stages;
pub mod sync_queue;
