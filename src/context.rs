//! Process-wide service context.
//!
//! One [`Catnapper`] owns the shared fetch pool and the watched
//! configuration store. It is created once at startup and passed by
//! reference (or `Arc`) to whatever serves requests.

use crate::config::{ConfigError, Settings};
use crate::feed::{combine, CombineError, FeedHeader, FetchError, FetchLimits, FetchPool, Fetcher};
use crate::storage::{ConfigStore, FeedConfiguration, StoreError, UrlsUpdate};
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;

#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub struct Catnapper {
    settings: Settings,
    store: ConfigStore,
    pool: FetchPool,
}

impl Catnapper {
    /// Validates `settings`, scans the feeds directory and starts watching it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(settings: Settings) -> Result<Self, StartError> {
        settings.validate()?;

        let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;
        let store = ConfigStore::open(settings.feeds_dir.clone(), settings.rescan_quiet())?;
        let fetcher = Fetcher::new(FetchLimits::from(&settings))?;
        let pool = FetchPool::new(
            fetcher,
            settings.max_concurrent_fetches,
            settings.poll_deadline(),
            runtime,
        );

        tracing::info!(
            feeds_dir = %settings.feeds_dir.display(),
            configurations = store.snapshot().len(),
            pool = pool.size(),
            poll_deadline_ms = settings.poll_deadline().as_millis() as u64,
            client_cache_secs = settings.client_cache().as_secs(),
            "Catnapper started"
        );

        Ok(Self {
            settings,
            store,
            pool,
        })
    }

    /// Stops watching the feeds directory and closes the fetch pool.
    ///
    /// Fetches already running finish; queued ones are cancelled.
    pub fn stop(&self) {
        self.store.close();
        self.pool.close();
        tracing::info!("Catnapper stopped");
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn pool(&self) -> &FetchPool {
        &self.pool
    }

    pub fn lookup_configuration(&self, identifier: &str) -> Option<Arc<FeedConfiguration>> {
        self.store.get(identifier)
    }

    /// Builds the combined document for `configuration` in memory.
    ///
    /// `self_link` is the address the combined feed is published at; source
    /// URLs containing it are dropped.
    pub async fn combined_feed(
        &self,
        configuration: &FeedConfiguration,
        self_link: &str,
    ) -> Result<Vec<u8>, CombineError> {
        self.combine_into(Vec::new(), configuration, self_link).await
    }

    /// Streams the combined document for `configuration` into `output`.
    pub async fn combine_into<W: Write>(
        &self,
        output: W,
        configuration: &FeedConfiguration,
        self_link: &str,
    ) -> Result<W, CombineError> {
        let urls = configuration.urls_excluding(self_link);
        let header = FeedHeader {
            title: configuration.title.clone(),
            link: self_link.to_string(),
            description: configuration.description.clone(),
        };

        tracing::debug!(
            identifier = configuration.identifier(),
            sources = urls.len(),
            "Combining feed"
        );
        let mut results = self.pool.scatter(&urls);
        combine(output, &header, &mut results).await
    }

    /// Validates and persists a new URL list for `identifier`.
    ///
    /// The running snapshot picks the change up on the next rescan.
    pub fn persist_new_urls(&self, identifier: &str, raw: &str) -> Result<UrlsUpdate, StoreError> {
        self.store.write(identifier, raw)
    }
}

impl Drop for Catnapper {
    fn drop(&mut self) {
        self.store.close();
        self.pool.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn settings(dir: &std::path::Path) -> Settings {
        Settings {
            feeds_dir: dir.to_path_buf(),
            max_concurrent_fetches: 2,
            ..Settings::default()
        }
    }

    #[test]
    fn test_start_requires_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let err = Catnapper::start(settings(dir.path())).unwrap_err();
        assert!(matches!(err, StartError::Store(StoreError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = settings(dir.path());
        bad.max_concurrent_fetches = 0;
        assert!(matches!(
            Catnapper::start(bad).unwrap_err(),
            StartError::Config(ConfigError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_lookup_and_empty_combined_feed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"identifier":"a","title":"T","description":"D","urls":[]}"#,
        )
        .unwrap();

        let app = Catnapper::start(settings(dir.path())).unwrap();
        assert!(app.lookup_configuration("missing").is_none());

        let config = app.lookup_configuration("a").unwrap();
        let bytes = app.combined_feed(&config, "http://me/a").await.unwrap();
        let feed = crate::feed::parse_feed(&bytes).unwrap();
        assert_eq!(feed.title, "T");
        assert_eq!(feed.link, "http://me/a");
        assert!(feed.items.is_empty());
    }

    #[tokio::test]
    async fn test_stop_closes_pool_and_watch() {
        let dir = tempfile::tempdir().unwrap();
        let app = Catnapper::start(settings(dir.path())).unwrap();
        assert!(app.store().is_watching());

        app.stop();
        assert!(app.pool().is_closed());
        assert!(!app.store().is_watching());
        assert_eq!(app.settings().poll_deadline(), Duration::from_millis(8500));
    }

    #[tokio::test]
    async fn test_persist_new_urls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"identifier":"a","title":"T","urls":[]}"#,
        )
        .unwrap();
        let app = Catnapper::start(settings(dir.path())).unwrap();

        let rejected = app.persist_new_urls("a", "not json").unwrap();
        assert!(!rejected.is_saved());
        assert_eq!(rejected.text(), "not json");

        let saved = app
            .persist_new_urls("a", r#"["http://example.com/rss"]"#)
            .unwrap();
        assert!(saved.is_saved());

        app.store().rescan_now();
        let config = app.lookup_configuration("a").unwrap();
        assert_eq!(config.urls, vec!["http://example.com/rss".to_string()]);
        assert_eq!(config.title, "T");
    }
}
