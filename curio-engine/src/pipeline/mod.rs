//! Pipeline topology resolution

pub mod resolver;

pub use resolver::{resolve, OrderedStage, ORPHAN_POSITION_BASE};
