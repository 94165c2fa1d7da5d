use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use serde_json::error::Category;
use tracing::debug;

use crate::error::ArchiveError;
use crate::source::ThreadSource;
use crate::thread::ThreadNode;

pub const BSKY_API_BASE: &str = "https://public.api.bsky.app/xrpc";

/// Largest `depth` / `parentHeight` the thread endpoint accepts. The server
/// still applies its own, smaller, cap below this.
pub const MAX_THREAD_DEPTH: u32 = 1000;
pub const MAX_PARENT_HEIGHT: u32 = 1000;

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// XRPC base URL; empty means the public AppView.
    pub base_url: String,
    pub user_agent: String,
    /// Per-request timeout; zero keeps the default.
    pub timeout: Duration,
    pub http_client: Option<HttpClient>,
}

/// Unauthenticated client for the public Bluesky AppView.
pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: String,
}

#[derive(Deserialize)]
struct ResolveHandleResponse {
    #[serde(default)]
    did: Option<String>,
}

#[derive(Deserialize)]
struct GetPostThreadResponse {
    #[serde(default)]
    thread: Option<ThreadNode>,
}

/// Decode a `getPostThread` body. With `parentHeight` at its maximum the
/// ancestor chain nests once per level, so the parser runs without serde_json's
/// recursion limit and on a growable stack.
fn decode_thread_page(body: &str) -> Result<ThreadNode, ArchiveError> {
    let protocol = |err: serde_json::Error| match err.classify() {
        Category::Data => ArchiveError::Protocol(format!("malformed thread: {err}")),
        _ => ArchiveError::Protocol(format!("invalid json: {err}")),
    };

    let mut deserializer = serde_json::Deserializer::from_str(body);
    deserializer.disable_recursion_limit();
    let page = GetPostThreadResponse::deserialize(serde_stacker::Deserializer::new(
        &mut deserializer,
    ))
    .map_err(protocol)?;
    deserializer.end().map_err(protocol)?;

    page.thread
        .ok_or_else(|| ArchiveError::Protocol("no thread field".to_string()))
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("bluesky client user agent required");
        }

        let timeout = if config.timeout.is_zero() {
            Duration::from_secs(20)
        } else {
            config.timeout
        };
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(timeout)
                .build()
                .context("build bluesky http client")?,
        };

        let base_url = if config.base_url.trim().is_empty() {
            BSKY_API_BASE.to_string()
        } else {
            config.base_url.trim().trim_end_matches('/').to_string()
        };
        url::Url::parse(&base_url).with_context(|| format!("invalid api base url {base_url:?}"))?;

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn call(&self, method: &str, query: &[(&str, String)]) -> Result<Response, ArchiveError> {
        let url = format!("{}/{}", self.base_url, method);
        debug!(%url, ?query, "xrpc request");
        let response = self
            .http
            .get(&url)
            .header(USER_AGENT, &self.user_agent)
            .query(query)
            .send()?;
        Ok(response)
    }
}

impl ThreadSource for Client {
    fn resolve_handle(&self, handle: &str) -> Result<String, ArchiveError> {
        let response = self.call(
            "com.atproto.identity.resolveHandle",
            &[("handle", handle.to_string())],
        )?;
        let status = response.status();
        let unresolved = || ArchiveError::Resolution {
            handle: handle.to_string(),
            status,
        };
        if !status.is_success() {
            return Err(unresolved());
        }

        let body: ResolveHandleResponse = response.json().map_err(|_| unresolved())?;
        match body.did {
            Some(did) if !did.trim().is_empty() => Ok(did),
            _ => Err(unresolved()),
        }
    }

    fn get_post_thread(&self, uri: &str) -> Result<ThreadNode, ArchiveError> {
        let response = self.call(
            "app.bsky.feed.getPostThread",
            &[
                ("uri", uri.to_string()),
                ("depth", MAX_THREAD_DEPTH.to_string()),
                ("parentHeight", MAX_PARENT_HEIGHT.to_string()),
            ],
        )?;
        let status = response.status();
        if !status.is_success() {
            return Err(ArchiveError::Fetch { status });
        }

        let body = response.text()?;
        decode_thread_page(&body)
    }
}
