use crate::{
    config::Config,
    hls::rewriter::LinkStyle,
    loader::{Delivery, DeliveryQueue, Interceptor, Outcome, RequestId},
    transport::{ReqwestTransport, Transport},
};
use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// HTTP handlers waiting for the outcome of their loading request.
#[derive(Clone, Debug, Default)]
pub struct PendingResponses {
    waiters: Arc<DashMap<RequestId, oneshot::Sender<Outcome>>>,
}

impl PendingResponses {
    /// Register interest in `id` before the request is handed to the interceptor
    pub fn wait(&self, id: RequestId) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id, tx);
        rx
    }

    /// Hand a delivery to its waiting handler, if it is still around
    pub fn resolve(&self, delivery: Delivery) {
        match self.waiters.remove(&delivery.request) {
            Some((_, tx)) => {
                if tx.send(delivery.outcome).is_err() {
                    debug!("Client for request {} went away before delivery", delivery.request);
                }
            }
            None => debug!("No handler waiting for request {}", delivery.request),
        }
    }

    pub fn forget(&self, id: RequestId) {
        self.waiters.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Interceptor resolving every `/load` request
    pub interceptor: Interceptor,
    /// Handlers waiting on the delivery queue
    pub pending: PendingResponses,
    /// Rendered by `/metrics` when a recorder is installed
    pub metrics: Option<PrometheusHandle>,
    pub started_at: Instant,
    next_id: Arc<AtomicU64>,
}

impl AppState {
    /// Create state backed by a pooled reqwest transport
    pub fn new(config: Config) -> Result<Self, reqwest::Error> {
        let transport = ReqwestTransport::new(config.fetch_timeout())?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create state over any transport and start draining the delivery queue
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        let (interceptor, queue) =
            Interceptor::with_transport(transport, LinkStyle::bridge(config.base_url.as_str()));

        match config.credentials() {
            Ok(credentials) => interceptor.set_credentials(credentials),
            Err(e) => warn!("Ignoring configured credentials: {}", e),
        }

        let pending = PendingResponses::default();
        spawn_delivery_pump(queue, pending.clone());

        Self {
            config: Arc::new(config),
            interceptor,
            pending,
            metrics: None,
            started_at: Instant::now(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Allocate a fresh id for an incoming HTTP request
    pub fn next_request_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Single consumer of the delivery queue: outcomes reach handlers in the
/// order the interceptor decided them.
fn spawn_delivery_pump(mut queue: DeliveryQueue, pending: PendingResponses) {
    tokio::spawn(async move {
        while let Some(delivery) = queue.recv().await {
            pending.resolve(delivery);
        }
        debug!("Delivery queue closed, pump exiting");
    });
}
