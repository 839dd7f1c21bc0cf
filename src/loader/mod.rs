//! Request interception state machine.
//!
//! A loading request moves through
//!
//! ```text
//! Received -> Classified -> Fetching -> Delivering -> Fulfilled | Failed
//!                        \-> RedirectFailing -> Failed(Redirect)
//! ```
//!
//! Received/Classified happen synchronously in [`Interceptor::load`].
//! Playlist and key requests are fetched on a spawned task; segment
//! requests and malformed URLs resolve immediately. Every terminal outcome
//! is claimed through the [`InFlightRegistry`] and pushed onto the
//! [`DeliveryQueue`].

pub mod credentials;
pub mod delivery;
pub mod pipeline;
pub mod redirect;
pub mod registry;

pub use credentials::{CredentialStore, Credentials};
pub use delivery::{Delivery, DeliveryQueue, Outcome};
pub use registry::{InFlightRegistry, RequestId};

use crate::error::{InterceptError, Result};
use crate::hls::codec::{InterceptedUrl, ResourceKind};
use crate::hls::rewriter::LinkStyle;
use crate::metrics;
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use delivery::DeliverySender;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// One resource fetch the player is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadingRequest {
    id: RequestId,
    url: String,
}

impl LoadingRequest {
    pub fn new(id: impl Into<RequestId>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// The most recent failure, kept for host diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorSnapshot {
    pub request: RequestId,
    pub kind: Option<ResourceKind>,
    pub url: String,
    pub code: &'static str,
    pub message: String,
    pub at: DateTime<Utc>,
    #[serde(skip)]
    pub error: InterceptError,
}

/// State shared by the interceptor handles and their fetch tasks.
pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) links: LinkStyle,
    credentials: CredentialStore,
    registry: InFlightRegistry,
    deliveries: DeliverySender,
    last_error: Mutex<Option<ErrorSnapshot>>,
}

impl Shared {
    /// Claim the request and hand its outcome to the delivery queue.
    ///
    /// Returns `false` if the outcome was discarded because the request was
    /// cancelled first.
    pub(crate) fn finish(
        &self,
        id: RequestId,
        kind: Option<ResourceKind>,
        url: &str,
        outcome: Outcome,
    ) -> bool {
        if !self.registry.complete(id) {
            info!("Discarding late outcome for cancelled request {}", id);
            metrics::record_outcome(kind, "cancelled");
            return false;
        }

        if let Outcome::Error(e) = &outcome {
            warn!("Request {} failed: {}", id, e);
            self.record_error(id, kind, url, e.clone());
        }
        metrics::record_outcome(kind, outcome.label());

        if !self.deliveries.send(Delivery {
            request: id,
            outcome,
        }) {
            error!("Delivery queue is closed, outcome for request {} was lost", id);
        }
        true
    }

    fn record_error(
        &self,
        id: RequestId,
        kind: Option<ResourceKind>,
        url: &str,
        error: InterceptError,
    ) {
        *self.last_error.lock() = Some(ErrorSnapshot {
            request: id,
            kind,
            url: url.to_string(),
            code: error.label(),
            message: error.to_string(),
            at: Utc::now(),
            error,
        });
    }
}

/// Resource-loader for intercepted HLS requests.
///
/// Cheap to clone; all clones share one registry, credential store and
/// delivery queue. Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct Interceptor {
    shared: Arc<Shared>,
}

impl Interceptor {
    /// Create an interceptor and the queue its outcomes are delivered on.
    pub fn new(transport: impl Transport, links: LinkStyle) -> (Self, DeliveryQueue) {
        Self::with_transport(Arc::new(transport), links)
    }

    /// Like [`Interceptor::new`] for a transport that is already shared.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        links: LinkStyle,
    ) -> (Self, DeliveryQueue) {
        let (deliveries, queue) = delivery::channel();
        let shared = Shared {
            transport,
            links,
            credentials: CredentialStore::default(),
            registry: InFlightRegistry::new(),
            deliveries,
            last_error: Mutex::new(None),
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            queue,
        )
    }

    /// Replace (or clear) the auth header for requests dispatched from now on.
    pub fn set_credentials(&self, credentials: Option<Credentials>) {
        self.shared.credentials.set(credentials);
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.shared.credentials.snapshot()
    }

    /// Accept a loading request.
    ///
    /// On `Ok` exactly one [`Delivery`] for the request will appear on the
    /// queue, unless it is cancelled first. Segment redirects and malformed
    /// URLs are delivered before this returns.
    ///
    /// # Errors
    /// [`InterceptError::DuplicateRequest`] if a request with the same id is
    /// still in flight. Nothing is delivered for the rejected request and the
    /// original one is unaffected.
    pub fn load(&self, request: LoadingRequest) -> Result<()> {
        let LoadingRequest { id, url } = request;

        let registration = match self.shared.registry.register(id) {
            Ok(registration) => registration,
            Err(e) => {
                warn!("Rejected loading request {}: {}", id, e);
                self.shared.record_error(id, None, &url, e.clone());
                metrics::record_outcome(None, e.label());
                return Err(e);
            }
        };

        let target = match InterceptedUrl::decode(&url) {
            Ok(target) => target,
            Err(e) => {
                self.shared.finish(id, None, &url, Outcome::Error(e));
                return Ok(());
            }
        };

        if target.kind().needs_fetch() {
            let credentials = self.shared.credentials.snapshot();
            let task = tokio::spawn(pipeline::run(
                Arc::clone(&self.shared),
                id,
                target,
                credentials,
                registration.token,
            ));
            self.shared.registry.attach_task(id, task.abort_handle());
        } else {
            let real = target.real_url().to_string();
            self.shared
                .finish(id, Some(target.kind()), &real, redirect::respond(target));
        }

        Ok(())
    }

    /// The player abandoned `id`.
    ///
    /// Returns `true` if the request was in flight; its fetch is told to stop
    /// and no delivery will be made. `false` means it was unknown or its
    /// outcome is already on the delivery queue.
    pub fn cancel(&self, id: RequestId) -> bool {
        let cancelled = self.shared.registry.cancel(id);
        if cancelled {
            info!("Loading request {} cancelled by player", id);
        }
        cancelled
    }

    /// Cancel every in-flight request. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let cancelled = self.shared.registry.cancel_all();
        if cancelled > 0 {
            info!("Cancelled {} in-flight loading requests", cancelled);
        }
        cancelled
    }

    pub fn in_flight(&self) -> usize {
        self.shared.registry.len()
    }

    /// Age of the oldest unresolved request, for spotting stuck fetches.
    pub fn oldest_in_flight(&self) -> Option<Duration> {
        self.shared.registry.oldest_age()
    }

    pub fn links(&self) -> &LinkStyle {
        &self.shared.links
    }

    /// Snapshot of the last error delivered (or registration rejected).
    pub fn last_error(&self) -> Option<ErrorSnapshot> {
        self.shared.last_error.lock().clone()
    }

    pub fn clear_last_error(&self) {
        *self.shared.last_error.lock() = None;
    }
}
