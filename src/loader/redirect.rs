//! Segment requests are never fetched here. They fail on purpose with a
//! redirect carrying the real URL, and the player's own transport fetches
//! the bytes with its range requests, buffering and retries intact.

use crate::hls::codec::{InterceptedUrl, ResourceKind};
use crate::loader::delivery::Outcome;
use tracing::debug;

/// Redirect outcome for a segment request.
pub fn respond(target: InterceptedUrl) -> Outcome {
    debug_assert_eq!(target.kind(), ResourceKind::Segment);
    let (real, _) = target.into_parts();
    debug!("Redirecting segment request to {}", real);
    Outcome::Redirect(real)
}
