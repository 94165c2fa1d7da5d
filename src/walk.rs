use crate::thread::{Post, ThreadNode};

/// The root post followed by the author's own continuation: at each level the
/// first reply (in server order) written by the root's author. Ends at the
/// first level without such a reply. A root without an author DID yields
/// nothing.
pub fn walk_main_thread(root: &ThreadNode) -> Vec<Post> {
    let mut posts = Vec::new();
    let Some(root_did) = root
        .post()
        .map(|post| post.author.did.as_str())
        .filter(|did| !did.is_empty())
    else {
        return posts;
    };

    let mut current = Some(root);
    while let Some(post) = current.and_then(ThreadNode::post) {
        posts.push(post.clone());
        current = current.and_then(|node| {
            node.replies()
                .iter()
                .find(|reply| reply.post().is_some_and(|p| p.author.did == root_did))
        });
    }
    posts
}
