//! Healing of server-truncated thread trees.
//!
//! `getPostThread` stops returning replies below an internal depth limit even
//! when `depth` asks for more. Posts cut off this way still report a non-zero
//! `replyCount` but carry no replies; each of them is fetched again as the
//! root of a new page and that page's replies are spliced in. A re-fetched
//! page can itself be truncated further down, so healing continues until the
//! data runs out, never to a fixed depth.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::ArchiveError;
use crate::source::ThreadSource;
use crate::thread::{ThreadNode, ThreadViewPost};

/// A post that reports replies but came back without any.
pub fn is_truncated(node: &ThreadNode) -> bool {
    match node {
        ThreadNode::Post(view) => is_view_truncated(view),
        ThreadNode::NotFound { .. } | ThreadNode::Blocked { .. } => false,
    }
}

fn is_view_truncated(view: &ThreadViewPost) -> bool {
    view.post.declared_replies() > 0 && view.replies.as_ref().map_or(true, Vec::is_empty)
}

#[derive(Debug)]
pub struct Expanded {
    pub root: ThreadNode,
    /// Pages fetched to heal truncated posts (the root page not included).
    pub refetches: usize,
}

/// Rebuilds a thread tree with every truncated branch re-fetched.
///
/// With `workers > 1` sibling subtrees are healed on scoped threads, at most
/// `workers` at a time across the whole tree. Results are merged back by
/// child index, so the outcome does not depend on completion order.
pub struct Expander<'a, S: ThreadSource + ?Sized> {
    source: &'a S,
    deadline: Option<Instant>,
    spare_workers: AtomicUsize,
    refetches: AtomicUsize,
    failure: Mutex<Option<ArchiveError>>,
}

impl<'a, S: ThreadSource + ?Sized> Expander<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            deadline: None,
            spare_workers: AtomicUsize::new(0),
            refetches: AtomicUsize::new(0),
            failure: Mutex::new(None),
        }
    }

    pub fn workers(self, workers: usize) -> Self {
        self.spare_workers
            .store(workers.saturating_sub(1), Ordering::SeqCst);
        self
    }

    pub fn deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Fetch a single page, honouring the deadline and any earlier failure.
    pub fn fetch(&self, uri: &str) -> Result<ThreadNode, ArchiveError> {
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(self.fail(ArchiveError::Timeout));
        }
        self.source
            .get_post_thread(uri)
            .map_err(|err| self.fail(err))
    }

    pub fn expand(&self, root: ThreadNode) -> Result<Expanded, ArchiveError> {
        let before = self.refetches.load(Ordering::SeqCst);
        let root = self.heal(root)?;
        Ok(Expanded {
            root,
            refetches: self.refetches.load(Ordering::SeqCst) - before,
        })
    }

    /// Keeps the first failure so concurrent branches stop fetching and all
    /// report the same error.
    fn fail(&self, err: ArchiveError) -> ArchiveError {
        let mut slot = self.failure.lock();
        slot.get_or_insert(err).clone()
    }

    fn heal(&self, node: ThreadNode) -> Result<ThreadNode, ArchiveError> {
        let mut view = match node {
            ThreadNode::Post(view) => view,
            leaf @ (ThreadNode::NotFound { .. } | ThreadNode::Blocked { .. }) => return Ok(leaf),
        };

        if is_view_truncated(&view) {
            debug!(
                uri = %view.post.uri,
                reply_count = view.post.declared_replies(),
                "re-fetching truncated subtree"
            );
            let page = self.fetch(&view.post.uri)?;
            self.refetches.fetch_add(1, Ordering::SeqCst);
            let replies = match page {
                ThreadNode::Post(fetched) => fetched.replies.unwrap_or_default(),
                ThreadNode::NotFound { .. } | ThreadNode::Blocked { .. } => Vec::new(),
            };
            view.replies = Some(replies);
        }

        if let Some(replies) = view.replies.take() {
            view.replies = Some(self.heal_all(replies)?);
        }
        Ok(ThreadNode::Post(view))
    }

    fn heal_all(&self, children: Vec<ThreadNode>) -> Result<Vec<ThreadNode>, ArchiveError> {
        if children.len() < 2 || self.spare_workers.load(Ordering::SeqCst) == 0 {
            return children.into_iter().map(|child| self.heal(child)).collect();
        }

        thread::scope(|scope| {
            let mut slots = Vec::with_capacity(children.len());
            for child in children {
                if matches!(child, ThreadNode::Post(_)) && self.claim_worker() {
                    slots.push(Slot::Spawned(scope.spawn(move || {
                        let healed = self.heal(child);
                        self.spare_workers.fetch_add(1, Ordering::SeqCst);
                        healed
                    })));
                } else {
                    slots.push(Slot::Done(self.heal(child)));
                }
            }

            let mut healed = Vec::with_capacity(slots.len());
            let mut first_err = None;
            for slot in slots {
                let result = match slot {
                    Slot::Done(result) => result,
                    Slot::Spawned(handle) => handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
                };
                match result {
                    Ok(node) => healed.push(node),
                    Err(err) => {
                        first_err.get_or_insert(err);
                    }
                }
            }
            match first_err {
                Some(err) => Err(err),
                None => Ok(healed),
            }
        })
    }

    fn claim_worker(&self) -> bool {
        self.spare_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

enum Slot<'scope, T> {
    Done(T),
    Spawned(thread::ScopedJoinHandle<'scope, T>),
}
