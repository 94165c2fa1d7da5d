use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ArchiveError;

pub const EXPECTED_FORMAT: &str =
    "Invalid Bluesky URL. Expected: https://bsky.app/profile/handle/post/rkey";

static POST_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://bsky\.app/profile/([^/]+)/post/([^/?#]+)").expect("valid post url regex")
});

/// The `(handle, rkey)` pair addressing a root post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRef {
    pub handle: String,
    pub rkey: String,
}

impl PostRef {
    /// AT-URI of the post once its author's handle has been resolved to a DID.
    pub fn at_uri(&self, did: &str) -> String {
        format!("at://{}/app.bsky.feed.post/{}", did, self.rkey)
    }
}

pub fn parse_post_url(url: &str) -> Result<PostRef, ArchiveError> {
    let caps = POST_URL
        .captures(url.trim())
        .ok_or_else(|| ArchiveError::InvalidInput(EXPECTED_FORMAT.to_string()))?;
    Ok(PostRef {
        handle: caps[1].to_string(),
        rkey: caps[2].to_string(),
    })
}

/// Record key at the end of an AT-URI (`at://did/collection/rkey`).
pub fn rkey_of(uri: &str) -> Option<&str> {
    uri.rsplit('/').next().filter(|rkey| !rkey.is_empty())
}
