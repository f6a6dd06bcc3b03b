//! Fetch-and-combine pipeline for RSS 2.0 feeds.
//!
//! - [`parser`] - Pull parser for single-channel RSS 2.0 documents
//! - [`fetcher`] - One HTTP fetch with redirect, timeout and size limits
//! - [`scatter`] - Shared fetch budget and the deadline-bounded result cursor
//! - [`combinator`] - Streams the merged document
//!
//! # Example
//!
//! ```ignore
//! let pool = FetchPool::new(fetcher, 8, settings.poll_deadline(), Handle::current());
//! let mut results = pool.scatter(&urls);
//! let bytes = combine(Vec::new(), &header, &mut results).await?;
//! ```

mod combinator;
mod fetcher;
mod parser;
mod scatter;

pub use combinator::{anchor, combine, CombineError, FeedHeader};
pub use fetcher::{
    FetchError, FetchFailure, FetchLimits, FetchOutcome, Fetcher, DEFAULT_USER_AGENT,
};
pub use parser::{parse_feed, Item, ParseError, ParsedFeed};
pub use scatter::{FetchPool, FetchResults, ResultsExhausted};
