//! Sync request handling, independent of HTTP extraction.

mod pull;
mod push;

pub use pull::handle_pull;
pub use push::handle_push;
