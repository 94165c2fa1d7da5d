//! Wire model of `app.bsky.feed.getPostThread`.
//!
//! The API tags every node with a `$type` discriminant. Only the three thread
//! variants below are accepted; anything else fails decoding instead of being
//! mistaken for a leaf.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum ThreadNode {
    #[serde(rename = "app.bsky.feed.defs#threadViewPost")]
    Post(ThreadViewPost),
    #[serde(rename = "app.bsky.feed.defs#notFoundPost")]
    NotFound { uri: String },
    #[serde(rename = "app.bsky.feed.defs#blockedPost")]
    Blocked { uri: String },
}

impl ThreadNode {
    pub fn post(&self) -> Option<&Post> {
        match self {
            ThreadNode::Post(view) => Some(&view.post),
            ThreadNode::NotFound { .. } | ThreadNode::Blocked { .. } => None,
        }
    }

    /// Direct replies in server order; empty for non-post variants and for
    /// posts whose replies were never returned.
    pub fn replies(&self) -> &[ThreadNode] {
        match self {
            ThreadNode::Post(view) => view.replies.as_deref().unwrap_or_default(),
            ThreadNode::NotFound { .. } | ThreadNode::Blocked { .. } => &[],
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            ThreadNode::Post(view) => &view.post.uri,
            ThreadNode::NotFound { uri } | ThreadNode::Blocked { uri } => uri,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadViewPost {
    pub post: Post,
    /// `None` when the server sent no reply list at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replies: Option<Vec<ThreadNode>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub uri: String,
    #[serde(default)]
    pub cid: String,
    pub author: Author,
    #[serde(default)]
    pub record: Record,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repost_count: Option<u64>,
}

impl Post {
    /// Reply count as declared by the server, which may exceed the replies it
    /// actually returned.
    pub fn declared_replies(&self) -> u64 {
        self.reply_count.unwrap_or(0)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.record.created_at.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    #[serde(default)]
    pub did: String,
    #[serde(default)]
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum Embed {
    #[serde(rename = "app.bsky.embed.images#view")]
    Images {
        #[serde(default)]
        images: Vec<ImageView>,
    },
    #[serde(rename = "app.bsky.embed.external#view")]
    External { external: ExternalView },
    #[serde(rename = "app.bsky.embed.record#view")]
    Record {
        #[serde(default)]
        record: serde_json::Value,
    },
    #[serde(rename = "app.bsky.embed.recordWithMedia#view")]
    RecordWithMedia { media: Box<Embed> },
    #[serde(rename = "app.bsky.embed.video#view")]
    Video {
        #[serde(default)]
        thumbnail: Option<String>,
        #[serde(default)]
        playlist: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl Embed {
    /// Images carried directly or as the media half of a quote-with-media.
    pub fn images(&self) -> &[ImageView] {
        match self {
            Embed::Images { images } => images,
            Embed::RecordWithMedia { media } => match media.as_ref() {
                Embed::Images { images } => images,
                _ => &[],
            },
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageView {
    pub thumb: String,
    pub fullsize: String,
    pub alt: String,
}

impl ImageView {
    /// Preferred download URL: full size, falling back to the thumbnail.
    pub fn url(&self) -> Option<&str> {
        [self.fullsize.as_str(), self.thumb.as_str()]
            .into_iter()
            .find(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalView {
    pub uri: String,
    pub title: String,
    pub description: String,
}
