use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use tracing::warn;

/// Why an upstream fetch failed, as far as the player needs to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailure {
    /// Network trouble, timeout, or an upstream status worth trying again later
    Transient,
    /// 401/403: the credentials were missing, stale or rejected
    Auth,
    /// 404/410: the resource does not exist upstream
    NotFound,
}

impl FetchFailure {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth,
            404 | 410 => Self::NotFound,
            _ => Self::Transient,
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Transient => "transient",
            Self::Auth => "auth",
            Self::NotFound => "not found",
        };
        f.write_str(label)
    }
}

/// Every failure a loading request can end with.
///
/// Errors are delivered by value to the player and kept in the last-error
/// snapshot, so the type is `Clone` and carries messages rather than
/// source errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InterceptError {
    #[error("Malformed intercepted URL: {0}")]
    MalformedUrl(String),

    #[error("Unparsable playlist: {0}")]
    UnparsablePlaylist(String),

    #[error("Fetch failed ({kind}){}: {message}", status_suffix(.status))]
    Fetch {
        kind: FetchFailure,
        status: Option<u16>,
        message: String,
    },

    #[error("Loading request {0} is already registered")]
    DuplicateRequest(u64),

    #[error("Loading request was cancelled")]
    Cancelled,

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
}

impl InterceptError {
    /// Build a fetch error from a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::Fetch {
            kind: FetchFailure::from_status(status),
            status: Some(status),
            message: message.into(),
        }
    }

    /// Build a fetch error for a transport failure that produced no status.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Fetch {
            kind: FetchFailure::Transient,
            status: None,
            message: message.into(),
        }
    }

    /// Whether the player may reasonably retry the same request.
    ///
    /// This system never retries on its own; the flag is advisory.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Fetch {
                kind: FetchFailure::Transient,
                ..
            }
        )
    }

    /// Short label used for metrics and diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MalformedUrl(_) => "malformed_url",
            Self::UnparsablePlaylist(_) => "unparsable_playlist",
            Self::Fetch {
                kind: FetchFailure::Auth,
                ..
            } => "fetch_auth",
            Self::Fetch {
                kind: FetchFailure::NotFound,
                ..
            } => "fetch_not_found",
            Self::Fetch { .. } => "fetch_transient",
            Self::DuplicateRequest(_) => "duplicate_request",
            Self::Cancelled => "cancelled",
            Self::InvalidCredentials(_) => "invalid_credentials",
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {s}")).unwrap_or_default()
}

pub type Result<T, E = InterceptError> = std::result::Result<T, E>;

impl IntoResponse for InterceptError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::MalformedUrl(_) | Self::InvalidCredentials(_) => StatusCode::BAD_REQUEST,
            Self::UnparsablePlaylist(_) => StatusCode::BAD_GATEWAY,
            Self::Fetch { kind, .. } => match kind {
                FetchFailure::Auth => StatusCode::UNAUTHORIZED,
                FetchFailure::NotFound => StatusCode::NOT_FOUND,
                FetchFailure::Transient => StatusCode::BAD_GATEWAY,
            },
            Self::DuplicateRequest(_) => StatusCode::CONFLICT,
            // Only reachable if the bridge lost its delivery, which clients see as unavailability
            Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        };

        warn!("Responding {} for error: {}", status, self);

        let body = serde_json::json!({
            "error": self.label(),
            "message": self.to_string(),
            "retriable": self.is_retriable(),
        });

        (status, axum::Json(body)).into_response()
    }
}
