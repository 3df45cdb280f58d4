//! # Curio Common Library
//!
//! Shared code for the Curio curation engine:
//! - Database models and initialization
//! - Event types (CurioEvent enum)
//! - Configuration loading
//! - Common error type

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use config::CurioConfig;
pub use error::{Error, Result};
pub use events::CurioEvent;
