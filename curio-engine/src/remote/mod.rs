//! Remote collaborators: scrobble service, streaming provider, and the
//! credential/health plumbing in front of them
//!
//! The engine depends on the `ScrobbleService` and `StreamingProvider`
//! traits; the REST clients here are the production implementations.

pub mod health;
pub mod provider;
pub mod scrobble;
pub mod token;

pub use health::{ConnectionHealth, ConnectionMonitor};
pub use provider::{Page, ProviderAlbum, ProviderClient, ProviderTrack, StreamingProvider, TokenPair};
pub use scrobble::{LovedTrack, LovedTracksPage, RemoteTrackInfo, ScrobbleClient, ScrobbleService};
pub use token::TokenManager;
