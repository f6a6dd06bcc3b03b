//! Aggregates several remote RSS feeds into one combined feed per user.
//!
//! Each user is described by a JSON file in a watched directory
//! ([`storage::ConfigStore`]). A request for a user's feed fetches every
//! configured source on the shared [`feed::FetchPool`], skips the ones that
//! fail or stall, and streams the surviving items into one RSS 2.0 document
//! ([`feed::combine`]). [`Catnapper`] ties the pieces together.

pub mod config;
pub mod context;
pub mod feed;
pub mod storage;
pub mod util;

pub use config::{ConfigError, Settings};
pub use context::{Catnapper, StartError};
