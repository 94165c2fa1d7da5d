use crate::error::ArchiveError;
use crate::thread::ThreadNode;

/// The two read-only calls the archiver makes against the remote service.
///
/// `bsky::Client` is the network implementation; everything above this seam
/// (expansion, orchestration) only sees the trait.
pub trait ThreadSource: Send + Sync {
    /// Resolve a handle such as `alice.bsky.social` to the account's DID.
    fn resolve_handle(&self, handle: &str) -> Result<String, ArchiveError>;

    /// Fetch one thread page rooted at `uri`, as deep and wide as the server
    /// allows.
    fn get_post_thread(&self, uri: &str) -> Result<ThreadNode, ArchiveError>;
}
