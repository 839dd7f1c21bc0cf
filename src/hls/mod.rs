pub mod codec;
pub mod rewriter;

pub use codec::{InterceptedUrl, ResourceKind};
pub use rewriter::{LinkStyle, PlaylistType, RewriteSummary, RewrittenPlaylist, rewrite_playlist};
