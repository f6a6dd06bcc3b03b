use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by the configuration store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON in config file: {0}")]
    Json(#[from] serde_json::Error),

    /// The top-level JSON value is an array, string or number.
    #[error("Config file {} is not a JSON object", .0.display())]
    NotAnObject(PathBuf),

    /// The file parsed but has no usable `identifier`.
    #[error("Config file {} does not declare an identifier", .0.display())]
    MissingIdentifier(PathBuf),

    #[error("No feed configuration with identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("Failed to watch config directory: {0}")]
    Watch(#[from] notify::Error),

    /// The store was created outside of a Tokio runtime.
    #[error("Config store requires a running Tokio runtime")]
    NoRuntime,
}

// ============================================================================
// On-disk format
// ============================================================================

/// Wire format of one per-user JSON file.
///
/// Exactly four fields are recognized; anything else in the file is ignored.
/// `title`, `description` and `urls` fall back to empty values when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub urls: Vec<String>,
}

// ============================================================================
// Domain types
// ============================================================================

/// One user's aggregate feed definition.
///
/// Built once from a parsed file and never mutated; a reload replaces the
/// whole snapshot it lives in.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfiguration {
    identifier: String,
    pub title: String,
    pub description: String,
    pub urls: Vec<String>,
    source: PathBuf,
}

impl FeedConfiguration {
    /// Validates a decoded file. Fails when the identifier is missing or blank.
    pub fn from_file(file: ConfigFile, source: &Path) -> Result<Self, StoreError> {
        if file.identifier.trim().is_empty() {
            return Err(StoreError::MissingIdentifier(source.to_path_buf()));
        }

        Ok(Self {
            identifier: file.identifier,
            title: file.title,
            description: file.description,
            urls: file.urls,
            source: source.to_path_buf(),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// File this configuration was loaded from; the write path rewrites it.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Pretty-printed JSON array of the source URLs, as shown for editing.
    pub fn urls_json(&self) -> String {
        serde_json::to_string_pretty(&self.urls).unwrap_or_else(|_| "[]".to_string())
    }

    /// Source URLs minus any that point back at `self_link`.
    ///
    /// A user feed that lists its own published address would otherwise
    /// recursively fetch itself.
    pub fn urls_excluding(&self, self_link: &str) -> Vec<String> {
        if self_link.is_empty() {
            return self.urls.clone();
        }

        let mut kept = Vec::with_capacity(self.urls.len());
        for url in &self.urls {
            if url.contains(self_link) {
                tracing::warn!(
                    identifier = %self.identifier,
                    url = %url,
                    "Self-reference detected in user feed, dropping source"
                );
            } else {
                kept.push(url.clone());
            }
        }
        kept
    }

    pub(crate) fn to_file(&self, urls: Vec<String>) -> ConfigFile {
        ConfigFile {
            identifier: self.identifier.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            urls,
        }
    }
}

/// Outcome of a settings write.
///
/// Both variants carry the text to show back to the user: the normalized URL
/// list on success, the untouched input on rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlsUpdate {
    Saved(String),
    Rejected { input: String, reason: String },
}

impl UrlsUpdate {
    pub fn text(&self) -> &str {
        match self {
            UrlsUpdate::Saved(text) => text,
            UrlsUpdate::Rejected { input, .. } => input,
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self, UrlsUpdate::Saved(_))
    }
}
