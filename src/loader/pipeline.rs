//! Fetch pipeline for playlists and keys.

use crate::error::{InterceptError, Result};
use crate::hls::codec::{InterceptedUrl, ResourceKind};
use crate::hls::rewriter::{LinkStyle, rewrite_playlist};
use crate::loader::Shared;
use crate::loader::credentials::Credentials;
use crate::loader::delivery::{OCTET_STREAM, Outcome, PLAYLIST_CONTENT_TYPE};
use crate::loader::registry::RequestId;
use crate::metrics;
use crate::transport::{Transport, TransportResponse};
use bytes::Bytes;
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Fetch `url` with the auth header from `credentials`, if any.
///
/// # Errors
/// [`InterceptError::Fetch`] for transport failures and non-2xx statuses,
/// classified as auth, not-found or transient.
pub async fn fetch(
    transport: &dyn Transport,
    url: &Url,
    credentials: Option<&Credentials>,
) -> Result<TransportResponse> {
    let headers = credentials.map(Credentials::headers).unwrap_or_else(HeaderMap::new);

    let response = transport
        .fetch(url, headers)
        .await
        .map_err(|e| InterceptError::transport(e.to_string()))?;

    if !response.is_success() {
        warn!("Upstream returned {} for {}", response.status, url);
        return Err(InterceptError::from_status(
            response.status,
            format!("{} returned HTTP {}", url, response.status),
        ));
    }

    Ok(response)
}

/// Turn a successful fetch into the outcome delivered to the player.
///
/// Playlists are rewritten against the URL they were finally served from;
/// key material passes through untouched.
pub fn process(kind: ResourceKind, response: TransportResponse, links: &LinkStyle) -> Outcome {
    if kind.is_playlist() {
        match rewrite_playlist(&response.body, &response.url, links) {
            Ok(rewritten) => Outcome::Data {
                body: Bytes::from(rewritten.body),
                content_type: PLAYLIST_CONTENT_TYPE.to_string(),
            },
            Err(e) => {
                warn!("Rewriting {} failed: {}", response.url, e);
                Outcome::Error(e)
            }
        }
    } else {
        Outcome::Data {
            body: response.body,
            content_type: response
                .content_type
                .unwrap_or_else(|| OCTET_STREAM.to_string()),
        }
    }
}

/// Fetch and process one intercepted resource.
pub async fn resolve(
    transport: &dyn Transport,
    links: &LinkStyle,
    target: &InterceptedUrl,
    credentials: Option<&Credentials>,
) -> Outcome {
    let kind = target.kind();
    let start = Instant::now();

    let result = fetch(transport, target.real_url(), credentials).await;
    metrics::record_fetch_duration(kind, start);

    match result {
        Ok(response) => process(kind, response, links),
        Err(e) => Outcome::Error(e),
    }
}

/// Body of the task spawned for each playlist or key request.
///
/// The cancellation token is checked before the network call is issued and
/// raced against it while in flight; dropping the fetch future aborts the
/// underlying request. A result that loses the race with cancellation is
/// discarded by [`Shared::finish`].
pub(crate) async fn run(
    shared: Arc<Shared>,
    id: RequestId,
    target: InterceptedUrl,
    credentials: Option<Credentials>,
    token: CancellationToken,
) {
    let kind = target.kind();
    info!("Fetching {} for request {}: {}", kind, id, target.real_url());

    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!("Request {} cancelled before its {} fetch finished", id, kind);
            metrics::record_outcome(Some(kind), "cancelled");
            return;
        }
        outcome = resolve(
            shared.transport.as_ref(),
            &shared.links,
            &target,
            credentials.as_ref(),
        ) => outcome,
    };

    shared.finish(id, Some(kind), target.real_url().as_str(), outcome);
}
