//! The designated delivery queue.
//!
//! Fetches run concurrently, but the player expects its loading requests to
//! be resolved one at a time on a context it chooses. Every terminal outcome
//! is therefore pushed onto a single channel, and the host drains that
//! channel wherever its player callbacks must run.

use crate::error::InterceptError;
use crate::loader::registry::RequestId;
use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

/// Content type of rewritten playlists.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Content type of keys when upstream does not send one.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// The terminal outcome of one loading request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Respond with this body
    Data { body: Bytes, content_type: String },
    /// Fail with a redirect: the player fetches this URL itself
    Redirect(Url),
    /// Fail with an error
    Error(InterceptError),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Data { .. } => "data",
            Self::Redirect(_) => "redirect",
            Self::Error(e) => e.label(),
        }
    }
}

/// An outcome addressed to its request.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub request: RequestId,
    pub outcome: Outcome,
}

/// Receiving end of the delivery queue, owned by the host.
#[derive(Debug)]
pub struct DeliveryQueue {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl DeliveryQueue {
    /// Wait for the next delivery. `None` once every interceptor handle is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Take a delivery if one is ready, without waiting.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DeliverySender {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl DeliverySender {
    /// Returns `false` if the host dropped its [`DeliveryQueue`].
    pub(crate) fn send(&self, delivery: Delivery) -> bool {
        self.tx.send(delivery).is_ok()
    }
}

pub(crate) fn channel() -> (DeliverySender, DeliveryQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DeliverySender { tx }, DeliveryQueue { rx })
}
