//! Album movement history

pub mod log;

pub use log::{MovementLog, StagePlacement};
