//! HLS request interception and playlist rewriting.
//!
//! Playlists are fetched on the player's behalf with an auth header
//! attached and rewritten so that every child playlist and key request comes
//! back through the [`loader::Interceptor`]. Media segments are redirected
//! to their real URL.

pub mod config;
pub mod error;
pub mod hls;
pub mod loader;
pub mod metrics;
pub mod server;
pub mod transport;

pub use error::{FetchFailure, InterceptError};
pub use hls::{InterceptedUrl, LinkStyle, ResourceKind, rewrite_playlist};
pub use loader::{
    Credentials, Delivery, DeliveryQueue, Interceptor, LoadingRequest, Outcome, RequestId,
};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportResponse};
