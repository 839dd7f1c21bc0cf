//! Marker-scheme URL codec.
//!
//! Requests for playlists and keys must reach the interception point rather
//! than the player's own networking stack, so their URLs are rewritten to a
//! custom scheme the player cannot fetch by itself. The scheme names the
//! resource kind; the rest of the URL is the percent-encoded real URL:
//!
//! ```text
//! https://cdn.example.com/v/720p.m3u8
//!   -> cplp:https%3A%2F%2Fcdn.example.com%2Fv%2F720p.m3u8
//! ```

use crate::error::{InterceptError, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// The four kinds of resource an HLS presentation references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Top-level playlist listing the variant streams
    MasterPlaylist,
    /// Variant (media) playlist or alternate rendition
    ChildPlaylist,
    /// Encryption key referenced by `EXT-X-KEY`
    Key,
    /// Media segment, resolved by the player itself
    Segment,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::MasterPlaylist,
        ResourceKind::ChildPlaylist,
        ResourceKind::Key,
        ResourceKind::Segment,
    ];

    /// Marker scheme carried by intercepted URLs of this kind.
    pub fn scheme(self) -> &'static str {
        match self {
            Self::MasterPlaylist => "mplp",
            Self::ChildPlaylist => "cplp",
            Self::Key => "ckey",
            Self::Segment => "rdtp",
        }
    }

    /// Reverse of [`ResourceKind::scheme`], ASCII case-insensitive.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.scheme().eq_ignore_ascii_case(scheme))
    }

    /// Playlists are fetched and rewritten before delivery.
    pub fn is_playlist(self) -> bool {
        matches!(self, Self::MasterPlaylist | Self::ChildPlaylist)
    }

    /// Everything except segments goes through the fetch pipeline.
    pub fn needs_fetch(self) -> bool {
        !matches!(self, Self::Segment)
    }

    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MasterPlaylist => "master_playlist",
            Self::ChildPlaylist => "child_playlist",
            Self::Key => "key",
            Self::Segment => "segment",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A real URL tagged with the kind of resource it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedUrl {
    kind: ResourceKind,
    real: Url,
}

impl InterceptedUrl {
    /// Tag `real` with `kind`.
    ///
    /// # Errors
    /// [`InterceptError::MalformedUrl`] if `real` is not an `http`/`https` URL.
    pub fn encode(real: Url, kind: ResourceKind) -> Result<Self> {
        ensure_http(&real)?;
        Ok(Self { kind, real })
    }

    /// Decode an intercepted URL string back into its kind and real URL.
    ///
    /// # Errors
    /// [`InterceptError::MalformedUrl`] when the scheme is not one of the
    /// marker schemes, the payload is not valid percent-encoding, or the
    /// decoded URL is not an absolute `http`/`https` URL.
    pub fn decode(intercepted: &str) -> Result<Self> {
        let (scheme, payload) = intercepted.split_once(':').ok_or_else(|| {
            InterceptError::MalformedUrl(format!("No scheme in URL: {intercepted}"))
        })?;

        let kind = ResourceKind::from_scheme(scheme).ok_or_else(|| {
            InterceptError::MalformedUrl(format!("Unrecognized scheme '{scheme}'"))
        })?;

        if payload.is_empty() {
            return Err(InterceptError::MalformedUrl(format!(
                "Empty payload in URL: {intercepted}"
            )));
        }

        let decoded = urlencoding::decode(payload).map_err(|e| {
            InterceptError::MalformedUrl(format!("Invalid percent-encoding: {e}"))
        })?;

        let real = Url::parse(&decoded).map_err(|e| {
            InterceptError::MalformedUrl(format!("Invalid real URL '{decoded}': {e}"))
        })?;
        ensure_http(&real)?;

        Ok(Self { kind, real })
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn real_url(&self) -> &Url {
        &self.real
    }

    pub fn into_parts(self) -> (Url, ResourceKind) {
        (self.real, self.kind)
    }
}

impl fmt::Display for InterceptedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.kind.scheme(),
            urlencoding::encode(self.real.as_str())
        )
    }
}

impl FromStr for InterceptedUrl {
    type Err = InterceptError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

/// Whether `url` already carries one of the marker schemes.
pub fn is_intercepted(url: &str) -> bool {
    url.split_once(':')
        .is_some_and(|(scheme, _)| ResourceKind::from_scheme(scheme).is_some())
}

fn ensure_http(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(()),
        "http" | "https" => Err(InterceptError::MalformedUrl(format!(
            "No host in URL: {url}"
        ))),
        scheme => Err(InterceptError::MalformedUrl(format!(
            "Scheme '{scheme}' not allowed, only http/https can be intercepted"
        ))),
    }
}
