use crate::error::{InterceptError, Result};
use crate::metrics;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identity of a player-issued loading request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bookkeeping for one request between acceptance and its terminal outcome.
#[derive(Debug)]
struct InFlightEntry {
    token: CancellationToken,
    task: Option<AbortHandle>,
    registered_at: Instant,
}

/// What [`InFlightRegistry::register`] hands back to the dispatcher.
#[derive(Debug, Clone)]
pub struct Registration {
    pub id: RequestId,
    /// Fired when the player cancels; observed by the fetch pipeline
    pub token: CancellationToken,
}

/// Table of accepted, unresolved loading requests.
///
/// Only the interceptor mutates it; hosts can observe its size.
///
/// Every mutation is a single atomic DashMap operation on the request's key,
/// and both [`complete`](Self::complete) and [`cancel`](Self::cancel)
/// remove the entry. Whichever removes it first wins; the loser sees
/// `false`. That is what guarantees at most one delivery per request and no
/// delivery after cancellation.
#[derive(Clone, Debug, Default)]
pub struct InFlightRegistry {
    entries: Arc<DashMap<RequestId, InFlightEntry>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a request for processing.
    ///
    /// # Errors
    /// [`InterceptError::DuplicateRequest`] if `id` is already in flight; the
    /// existing entry is left untouched.
    pub(crate) fn register(&self, id: RequestId) -> Result<Registration> {
        let token = match self.entries.entry(id) {
            Entry::Occupied(_) => return Err(InterceptError::DuplicateRequest(id.0)),
            Entry::Vacant(vacant) => {
                let token = CancellationToken::new();
                vacant.insert(InFlightEntry {
                    token: token.clone(),
                    task: None,
                    registered_at: Instant::now(),
                });
                token
            }
        };

        metrics::set_in_flight(self.entries.len());
        debug!("Registered loading request {}", id);
        Ok(Registration { id, token })
    }

    /// Associate the task fulfilling `id`. Returns `false` if the request
    /// already reached a terminal state.
    pub(crate) fn attach_task(&self, id: RequestId, task: AbortHandle) -> bool {
        match self.entries.get_mut(&id) {
            Some(mut entry) => {
                entry.task = Some(task);
                true
            }
            None => false,
        }
    }

    /// Claim the right to deliver the outcome of `id`.
    ///
    /// Returns `false` if the request was cancelled (or already completed),
    /// in which case the outcome must be discarded.
    pub(crate) fn complete(&self, id: RequestId) -> bool {
        match self.entries.remove(&id) {
            Some((_, entry)) => {
                metrics::set_in_flight(self.entries.len());
                debug!(
                    "Completed loading request {} after {:?}",
                    id,
                    entry.registered_at.elapsed()
                );
                true
            }
            None => false,
        }
    }

    /// Cancel `id`: remove it and signal its fetch to stop.
    ///
    /// Returns `false` if the request is unknown or its outcome was already
    /// claimed for delivery.
    pub(crate) fn cancel(&self, id: RequestId) -> bool {
        match self.entries.remove(&id) {
            Some((_, entry)) => {
                entry.token.cancel();
                metrics::set_in_flight(self.entries.len());
                debug!(
                    "Cancelled loading request {} after {:?}",
                    id,
                    entry.registered_at.elapsed()
                );
                true
            }
            None => false,
        }
    }

    /// Cancel everything, aborting tasks outright. Used on shutdown.
    pub(crate) fn cancel_all(&self) -> usize {
        let ids: Vec<RequestId> = self.entries.iter().map(|e| *e.key()).collect();
        let mut cancelled = 0;
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                entry.token.cancel();
                if let Some(task) = entry.task {
                    task.abort();
                }
                cancelled += 1;
            }
        }
        metrics::set_in_flight(self.entries.len());
        cancelled
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Age of the oldest in-flight request, for spotting stuck fetches.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.entries
            .iter()
            .map(|e| e.registered_at.elapsed())
            .max()
    }
}
