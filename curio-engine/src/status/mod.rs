//! Request deduplication and short-TTL memoization

pub mod cache;

pub use cache::StatusCache;
