//! Markdown rendering of an archived thread.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::ThreadData;
use crate::media::ImageMap;
use crate::thread::{Embed, Post};

const QUOTE: &str = "> ";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum MediaMode {
    /// Leave images and link cards out.
    None,
    /// Link images at their CDN URLs.
    #[default]
    Inline,
    /// Link images at `./images/…` and bundle them in a zip.
    Download,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Minimal,
    /// Front matter, timestamps and engagement counts.
    #[default]
    Rich,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RenderOptions {
    #[serde(default)]
    pub media: MediaMode,
    #[serde(default)]
    pub format: Format,
}

pub fn render(data: &ThreadData, options: &RenderOptions, images: Option<&ImageMap>) -> String {
    render_on(data, options, images, Utc::now().date_naive())
}

/// Like [`render`], with `today` used for the archive date.
pub fn render_on(
    data: &ThreadData,
    options: &RenderOptions,
    images: Option<&ImageMap>,
    today: NaiveDate,
) -> String {
    let mut lines: Vec<String> = Vec::new();
    let handle = &data.handle;

    if options.format == Format::Rich {
        let post_date = data
            .root()
            .and_then(Post::created_at)
            .map(|ts| ts.date_naive())
            .unwrap_or(today);
        lines.push("---".into());
        lines.push(format!("title: \"Thread by @{handle}\""));
        lines.push(format!("author: {handle}"));
        lines.push(format!("date: {}", post_date.format("%Y-%m-%d")));
        lines.push(format!("source: {}", data.url));
        lines.push(format!("archived: {}", today.format("%Y-%m-%d")));
        lines.push("tags: [bluesky-archive]".into());
        lines.push("---".into());
        lines.push(String::new());
    }

    lines.push(format!("# Thread by @{handle}"));
    lines.push(String::new());
    if options.format == Format::Minimal {
        lines.push(format!("Source: {}", data.url));
        lines.push(String::new());
    }

    for post in &data.posts {
        lines.push(render_post(post, options, images));
        lines.push(String::new());
        lines.push("---".into());
        lines.push(String::new());
    }

    // drop the separator after the last post
    for trailing in ["", "---", ""] {
        if lines.last().is_some_and(|line| line == trailing) {
            lines.pop();
        }
    }

    lines.join("\n")
}

fn render_post(post: &Post, options: &RenderOptions, images: Option<&ImageMap>) -> String {
    let blank = QUOTE.trim_end();
    let mut lines: Vec<String> = post
        .record
        .text
        .split('\n')
        .map(|line| format!("{QUOTE}{line}"))
        .collect();

    for media in media_lines(post, options.media, images) {
        lines.push(blank.to_string());
        lines.push(format!("{QUOTE}{media}"));
    }

    let handle = if post.author.handle.is_empty() {
        "unknown"
    } else {
        post.author.handle.as_str()
    };
    lines.push(blank.to_string());
    match post.created_at() {
        Some(created) if options.format == Format::Rich => {
            let stats = match (post.like_count, post.repost_count) {
                (Some(likes), Some(reposts)) => format!(" · ♡ {likes} · ↻ {reposts}"),
                _ => String::new(),
            };
            lines.push(format!(
                "{QUOTE}— @{handle} · {}{stats}",
                created.format("%Y-%m-%d %H:%M")
            ));
        }
        _ => lines.push(format!("{QUOTE}— @{handle}")),
    }

    lines.join("\n")
}

/// Markdown for a post's images and link card, without the quote prefix.
pub fn media_lines(post: &Post, mode: MediaMode, images: Option<&ImageMap>) -> Vec<String> {
    if mode == MediaMode::None {
        return Vec::new();
    }
    let Some(embed) = post.embed.as_ref() else {
        return Vec::new();
    };

    let resolve = |url: &str| -> String {
        match (mode, images) {
            (MediaMode::Download, Some(map)) => map.get(url).cloned().unwrap_or_else(|| url.to_string()),
            _ => url.to_string(),
        }
    };

    let mut lines: Vec<String> = embed
        .images()
        .iter()
        .filter_map(|image| {
            image
                .url()
                .map(|url| format!("![{}]({})", image.alt, resolve(url)))
        })
        .collect();

    if let Embed::External { external } = embed {
        if !external.uri.is_empty() {
            let title = if external.title.is_empty() {
                &external.uri
            } else {
                &external.title
            };
            lines.push(format!("[{}]({})", title, external.uri));
        }
    }

    lines
}
