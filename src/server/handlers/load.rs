use crate::{
    error::{InterceptError, Result},
    hls::codec::{InterceptedUrl, ResourceKind, is_intercepted},
    loader::{Interceptor, LoadingRequest, Outcome, RequestId},
    server::state::{AppState, PendingResponses},
};
use axum::{
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Deserialize)]
pub struct LoadParams {
    /// Intercepted URL, e.g. `cplp:https%3A%2F%2Fcdn%2Fv.m3u8`
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct PlayParams {
    /// Real master playlist URL, or one already in intercepted form
    pub src: String,
}

/// Cancels the loading request if the handler future is dropped before
/// the outcome arrives, i.e. the player hung up.
struct CancelOnDrop {
    id: RequestId,
    interceptor: Interceptor,
    pending: PendingResponses,
    armed: bool,
}

impl CancelOnDrop {
    fn new(state: &AppState, id: RequestId) -> Self {
        Self {
            id,
            interceptor: state.interceptor.clone(),
            pending: state.pending.clone(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            debug!("Client dropped request {}", self.id);
            self.interceptor.cancel(self.id);
            self.pending.forget(self.id);
        }
    }
}

/// Resolve one intercepted URL through the interceptor.
///
/// Data is returned as-is, segment redirects become `302 Found` to the real
/// URL, errors map to the status in [`InterceptError`]'s response impl.
pub async fn load(
    State(state): State<AppState>,
    Query(params): Query<LoadParams>,
) -> Result<Response> {
    let id = state.next_request_id();
    let waiter = state.pending.wait(id);
    let mut guard = CancelOnDrop::new(&state, id);

    if let Err(e) = state
        .interceptor
        .load(LoadingRequest::new(id, params.url))
    {
        guard.disarm();
        state.pending.forget(id);
        return Err(e);
    }

    let outcome = waiter.await.map_err(|_| InterceptError::Cancelled)?;
    guard.disarm();

    Ok(outcome_response(outcome))
}

/// Entry point for players: redirects to the bridged master playlist.
pub async fn play(
    State(state): State<AppState>,
    Query(params): Query<PlayParams>,
) -> Result<Response> {
    let target = if is_intercepted(&params.src) {
        InterceptedUrl::decode(&params.src)?
    } else {
        let real = Url::parse(&params.src).map_err(|e| {
            InterceptError::MalformedUrl(format!("invalid src {:?}: {}", params.src, e))
        })?;
        InterceptedUrl::encode(real, ResourceKind::MasterPlaylist)?
    };
    let link = state.interceptor.links().link(&target);

    info!("Starting playback of {}", target.real_url());
    Ok((StatusCode::FOUND, [(header::LOCATION, link)]).into_response())
}

fn outcome_response(outcome: Outcome) -> Response {
    match outcome {
        Outcome::Data { body, content_type } => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, "no-cache".to_string()),
            ],
            body,
        )
            .into_response(),
        Outcome::Redirect(url) => {
            (StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response()
        }
        Outcome::Error(e) => e.into_response(),
    }
}
