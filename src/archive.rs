use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::ArchiveError;
use crate::expand::Expander;
use crate::post_url::{self, parse_post_url};
use crate::source::ThreadSource;
use crate::thread::Post;
use crate::walk::walk_main_thread;

/// Result of one archive run: the author's chain of posts, detached from the
/// tree it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadData {
    pub handle: String,
    pub url: String,
    pub posts: Vec<Post>,
}

impl ThreadData {
    pub fn root(&self) -> Option<&Post> {
        self.posts.first()
    }

    pub fn root_rkey(&self) -> Option<&str> {
        self.root().and_then(|post| post_url::rkey_of(&post.uri))
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Upper bound on subtrees healed at the same time.
    pub workers: usize,
    /// Budget for the whole run; `None` waits as long as the fetches take.
    pub timeout: Option<Duration>,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            timeout: None,
        }
    }
}

pub struct Archiver<S> {
    source: S,
    options: ArchiveOptions,
}

impl<S: ThreadSource> Archiver<S> {
    pub fn new(source: S, options: ArchiveOptions) -> Self {
        Self { source, options }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// URL → handle → DID → root page → healed tree → main thread.
    pub fn archive_thread(&self, url: &str) -> Result<ThreadData, ArchiveError> {
        let post_ref = parse_post_url(url)?;
        let deadline = self.options.timeout.map(|budget| Instant::now() + budget);

        let did = self.source.resolve_handle(&post_ref.handle)?;
        debug!(handle = %post_ref.handle, %did, "resolved handle");

        let expander = Expander::new(&self.source)
            .workers(self.options.workers)
            .deadline(deadline);
        let root = expander.fetch(&post_ref.at_uri(&did))?;
        let expanded = expander.expand(root)?;
        let posts = walk_main_thread(&expanded.root);

        info!(
            handle = %post_ref.handle,
            posts = posts.len(),
            refetches = expanded.refetches,
            "archived thread"
        );

        Ok(ThreadData {
            handle: post_ref.handle,
            url: url.trim().to_string(),
            posts,
        })
    }
}
