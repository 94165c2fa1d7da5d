#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod archive;
pub mod bsky;
pub mod config;
pub mod error;
pub mod expand;
pub mod markdown;
pub mod media;
pub mod post_url;
pub mod source;
pub mod thread;
pub mod walk;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, Cli};
pub use archive::{ArchiveOptions, Archiver, ThreadData};
pub use error::ArchiveError;
pub use source::ThreadSource;
