//! Playback session evaluation

pub mod threshold;

pub use threshold::{ListeningSession, PlaybackSample, ThresholdEvaluator};
