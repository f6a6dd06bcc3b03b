//! Per-user feed configuration storage backed by a directory of JSON files.

mod json_store;
mod types;

pub use json_store::{parse_file, ConfigStore, Snapshot, CONFIG_EXTENSION};
pub use types::{ConfigFile, FeedConfiguration, StoreError, UrlsUpdate};
