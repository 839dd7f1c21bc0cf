//! M3U8 rewriting.
//!
//! m3u8-rs tells master from media, but a parse-serialize round trip drops
//! and reorders tags, so the output is produced line by line from the raw
//! text. Only the URI substring of a line ever changes; comments, blank
//! lines, unknown tags and line endings are copied through byte-for-byte.

use crate::error::{InterceptError, Result};
use crate::hls::codec::{InterceptedUrl, ResourceKind};
use m3u8_rs::is_master_playlist;
use std::ops::Range;
use tracing::debug;
use url::Url;

const BOM: char = '\u{feff}';

/// Whether a playlist lists variants or segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistType {
    Master,
    Media,
}

/// How rewritten URIs are written into the playlist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LinkStyle {
    /// Marker-scheme URLs (`cplp:…`) for players with a custom-scheme loader
    #[default]
    Scheme,
    /// `<base>/load?url=<intercepted>` for players that only speak HTTP
    Bridge(String),
}

impl LinkStyle {
    /// Bridge links rooted at `base`, e.g. `http://127.0.0.1:3000`.
    pub fn bridge(base: impl Into<String>) -> Self {
        Self::Bridge(base.into().trim_end_matches('/').to_string())
    }

    /// Render the link the player will request for `target`.
    pub fn link(&self, target: &InterceptedUrl) -> String {
        match self {
            Self::Scheme => target.to_string(),
            Self::Bridge(base) => format!(
                "{}/load?url={}",
                base,
                urlencoding::encode(&target.to_string())
            ),
        }
    }
}

/// Count of URIs rewritten per resource kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteSummary {
    pub child_playlists: usize,
    pub keys: usize,
    pub segments: usize,
    /// URIs left alone because they resolve to a non-HTTP scheme
    pub untouched: usize,
}

impl RewriteSummary {
    fn record(&mut self, kind: ResourceKind) {
        match kind {
            ResourceKind::MasterPlaylist | ResourceKind::ChildPlaylist => self.child_playlists += 1,
            ResourceKind::Key => self.keys += 1,
            ResourceKind::Segment => self.segments += 1,
        }
    }
}

/// Result of a successful rewrite.
#[derive(Debug, Clone)]
pub struct RewrittenPlaylist {
    pub body: String,
    pub playlist_type: PlaylistType,
    pub summary: RewriteSummary,
}

/// Working state for one rewrite: the base URL relative URIs resolve
/// against and the output accumulated so far.
struct RewriteContext<'a> {
    base: &'a Url,
    links: &'a LinkStyle,
    out: String,
    summary: RewriteSummary,
}

impl<'a> RewriteContext<'a> {
    fn new(base: &'a Url, links: &'a LinkStyle, capacity: usize) -> Self {
        Self {
            base,
            links,
            out: String::with_capacity(capacity),
            summary: RewriteSummary::default(),
        }
    }

    /// Resolve `uri`, encode it as `kind` and return the replacement text.
    ///
    /// Returns `Ok(None)` when the URI is not fetchable over HTTP (FairPlay
    /// `skd://`, `data:`) and must stay as written.
    fn rewrite_uri(&mut self, uri: &str, kind: ResourceKind) -> Result<Option<String>> {
        if uri.is_empty() {
            return Err(InterceptError::UnparsablePlaylist(format!(
                "Empty {kind} URI"
            )));
        }

        let resolved = self.base.join(uri).map_err(|e| {
            InterceptError::UnparsablePlaylist(format!("Cannot resolve {kind} URI '{uri}': {e}"))
        })?;

        if !matches!(resolved.scheme(), "http" | "https") {
            debug!("Leaving non-HTTP {} URI untouched: {}", kind, uri);
            self.summary.untouched += 1;
            return Ok(None);
        }

        let target = InterceptedUrl::encode(resolved, kind)?;
        self.summary.record(kind);
        Ok(Some(self.links.link(&target)))
    }

    /// Copy `line` with `range` replaced by the rewritten URI, or unchanged.
    fn push_replaced(
        &mut self,
        line: &str,
        range: Range<usize>,
        kind: ResourceKind,
    ) -> Result<()> {
        match self.rewrite_uri(&line[range.clone()], kind)? {
            Some(new_uri) => {
                self.out.push_str(&line[..range.start]);
                self.out.push_str(&new_uri);
                self.out.push_str(&line[range.end..]);
            }
            None => self.out.push_str(line),
        }
        Ok(())
    }

    fn push_verbatim(&mut self, line: &str) {
        self.out.push_str(line);
    }
}

/// Rewrite every fetchable URI in `content` to its intercepted form.
///
/// `base` is the real URL the playlist was fetched from; relative URIs are
/// resolved against it before encoding.
///
/// # Errors
/// [`InterceptError::UnparsablePlaylist`] if the content is not UTF-8, is not
/// an M3U8 playlist, or contains a URI field that cannot be located or
/// resolved. A single bad URI fails the whole playlist.
pub fn rewrite_playlist(
    content: &[u8],
    base: &Url,
    links: &LinkStyle,
) -> Result<RewrittenPlaylist> {
    let text = std::str::from_utf8(content).map_err(|e| {
        InterceptError::UnparsablePlaylist(format!("Playlist is not valid UTF-8: {e}"))
    })?;

    let playlist_type = detect_playlist_type(text)?;
    let mut ctx = RewriteContext::new(base, links, text.len() + text.len() / 2);

    for raw_line in text.split_inclusive('\n') {
        let content_end = raw_line
            .strip_suffix("\r\n")
            .or_else(|| raw_line.strip_suffix('\n'))
            .map_or(raw_line.len(), str::len);
        let (line, ending) = raw_line.split_at(content_end);

        rewrite_line(&mut ctx, line, playlist_type)?;
        ctx.push_verbatim(ending);
    }

    debug!(
        "Rewrote {:?} playlist from {}: {} child playlists, {} keys, {} segments, {} untouched",
        playlist_type,
        base,
        ctx.summary.child_playlists,
        ctx.summary.keys,
        ctx.summary.segments,
        ctx.summary.untouched
    );

    Ok(RewrittenPlaylist {
        body: ctx.out,
        playlist_type,
        summary: ctx.summary,
    })
}

/// Check the M3U8 header and report whether the playlist is master or media.
pub fn detect_playlist_type(text: &str) -> Result<PlaylistType> {
    let stripped = text.trim_start_matches(BOM).trim_start();
    if !stripped.starts_with("#EXTM3U") {
        return Err(InterceptError::UnparsablePlaylist(
            "Missing #EXTM3U header".to_string(),
        ));
    }

    if is_master_playlist(stripped.as_bytes()) {
        Ok(PlaylistType::Master)
    } else {
        Ok(PlaylistType::Media)
    }
}

fn rewrite_line(
    ctx: &mut RewriteContext<'_>,
    line: &str,
    playlist_type: PlaylistType,
) -> Result<()> {
    // `str::trim` leaves U+FEFF in place
    let body = line.trim_start_matches(BOM);
    let trimmed = body.trim();

    if trimmed.is_empty() || (trimmed.starts_with('#') && !trimmed.starts_with("#EXT")) {
        ctx.push_verbatim(line);
        return Ok(());
    }

    if !trimmed.starts_with('#') {
        // URI line: a variant playlist in a master, a segment in a media playlist
        let kind = match playlist_type {
            PlaylistType::Master => ResourceKind::ChildPlaylist,
            PlaylistType::Media => ResourceKind::Segment,
        };
        let start = line.len() - body.trim_start().len();
        return ctx.push_replaced(line, start..start + trimmed.len(), kind);
    }

    match tag_uri_kind(trimmed, playlist_type) {
        Some(kind) => {
            let attrs_start = line.find(':').map_or(line.len(), |i| i + 1);
            let attrs = &line[attrs_start..];
            let method_none = is_method_none(attrs)?;
            match find_attribute(attrs, "URI")? {
                Some(range) if !method_none => {
                    let range = attrs_start + range.start..attrs_start + range.end;
                    ctx.push_replaced(line, range, kind)
                }
                _ => {
                    ctx.push_verbatim(line);
                    Ok(())
                }
            }
        }
        None => {
            ctx.push_verbatim(line);
            Ok(())
        }
    }
}

/// Which kind of resource a tag's `URI` attribute points at, if the tag
/// carries one worth rewriting.
fn tag_uri_kind(tag: &str, playlist_type: PlaylistType) -> Option<ResourceKind> {
    const MASTER_TAGS: [(&str, ResourceKind); 3] = [
        ("#EXT-X-MEDIA:", ResourceKind::ChildPlaylist),
        ("#EXT-X-I-FRAME-STREAM-INF:", ResourceKind::ChildPlaylist),
        ("#EXT-X-SESSION-KEY:", ResourceKind::Key),
    ];
    const MEDIA_TAGS: [(&str, ResourceKind); 5] = [
        ("#EXT-X-KEY:", ResourceKind::Key),
        ("#EXT-X-MAP:", ResourceKind::Segment),
        ("#EXT-X-PART:", ResourceKind::Segment),
        ("#EXT-X-PRELOAD-HINT:", ResourceKind::Segment),
        ("#EXT-X-RENDITION-REPORT:", ResourceKind::ChildPlaylist),
    ];

    let table: &[(&str, ResourceKind)] = match playlist_type {
        PlaylistType::Master => &MASTER_TAGS,
        PlaylistType::Media => &MEDIA_TAGS,
    };

    table
        .iter()
        .find(|(prefix, _)| tag.starts_with(prefix))
        .map(|(_, kind)| *kind)
}

fn is_method_none(attrs: &str) -> Result<bool> {
    Ok(find_attribute(attrs, "METHOD")?.is_some_and(|range| &attrs[range] == "NONE"))
}

/// Locate the value of attribute `name` in an HLS attribute list.
///
/// Returns the byte range of the value (inside the quotes for quoted
/// strings). Commas inside quoted strings do not split attributes.
///
/// # Errors
/// [`InterceptError::UnparsablePlaylist`] on an unterminated quoted string.
fn find_attribute(attrs: &str, name: &str) -> Result<Option<Range<usize>>> {
    let bytes = attrs.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        let Some(eq) = attrs[pos..].find('=') else {
            return Ok(None);
        };
        let attr_name = attrs[pos..pos + eq].trim();
        let value_start = pos + eq + 1;

        let (value, next) = if bytes.get(value_start) == Some(&b'"') {
            let inner_start = value_start + 1;
            let close = attrs[inner_start..].find('"').ok_or_else(|| {
                InterceptError::UnparsablePlaylist(format!(
                    "Unterminated quoted value for attribute {attr_name}"
                ))
            })?;
            let inner_end = inner_start + close;
            (inner_start..inner_end, inner_end + 1)
        } else {
            let end = attrs[value_start..]
                .find(',')
                .map_or(attrs.len(), |i| value_start + i);
            (value_start..end, end)
        };

        if attr_name == name {
            return Ok(Some(value));
        }

        // Skip the separating comma
        pos = match attrs[next..].find(',') {
            Some(i) => next + i + 1,
            None => return Ok(None),
        };
    }

    Ok(None)
}
