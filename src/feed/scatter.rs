//! Scatter-gather over the shared fetch budget.
//!
//! [`FetchPool::scatter`] submits one fetch per URL and returns a
//! [`FetchResults`] cursor that yields successfully parsed feeds in
//! completion order. The pool is shared by every concurrent aggregation: a
//! semaphore caps how many fetches run at once and everything else queues.
//!
//! # Stall handling
//!
//! Each wait for the next completion is bounded by the poll deadline
//! (connect + read timeout + slack). When nothing completes within it the
//! cursor assumes the remaining sources are stuck and reports exhaustion.
//!
//! # Cancellation
//!
//! Outstanding fetches belong to the cursor. When it stops on a stall, or is
//! dropped before being drained, all of them are aborted; tasks still
//! waiting for a permit never start.

use super::fetcher::{FetchError, FetchFailure, FetchOutcome, Fetcher};
use super::parser::ParsedFeed;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Returned by [`FetchResults::next`] when no further feed is available.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("No further feeds available")]
pub struct ResultsExhausted;

/// Process-wide bounded fetch budget. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FetchPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    fetcher: Fetcher,
    permits: Arc<Semaphore>,
    size: usize,
    poll_deadline: Duration,
    runtime: Handle,
}

impl FetchPool {
    /// Creates a pool running at most `size` fetches at once on `runtime`.
    pub fn new(fetcher: Fetcher, size: usize, poll_deadline: Duration, runtime: Handle) -> Self {
        let size = size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                fetcher,
                permits: Arc::new(Semaphore::new(size)),
                size,
                poll_deadline,
                runtime,
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Number of fetch slots currently free.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }

    /// Stops accepting work. Queued and future fetches fail with
    /// [`FetchError::Cancelled`]; running ones finish.
    pub fn close(&self) {
        self.inner.permits.close();
    }

    /// Starts fetching every URL and returns a cursor over the results.
    ///
    /// Never blocks: when the pool is saturated the new fetches queue behind
    /// the running ones.
    pub fn scatter(&self, urls: &[String]) -> FetchResults {
        let mut tasks = JoinSet::new();

        for url in urls {
            let fetcher = self.inner.fetcher.clone();
            let permits = Arc::clone(&self.inner.permits);
            let url = url.clone();
            tasks.spawn_on(
                async move {
                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return Err(FetchFailure::new(url, FetchError::Cancelled)),
                    };
                    fetcher.fetch(&url).await
                },
                &self.inner.runtime,
            );
        }

        tracing::debug!(
            sources = urls.len(),
            available = self.available(),
            "Scattered feed fetches"
        );
        FetchResults::new(tasks, urls.len(), self.inner.poll_deadline)
    }
}

/// Single-consumer cursor over the outcomes of one scatter.
///
/// Failures are logged and skipped; only parsed feeds are surfaced. Not
/// restartable: once it reports exhaustion it stays exhausted.
#[derive(Debug)]
pub struct FetchResults {
    tasks: JoinSet<FetchOutcome>,
    remaining: usize,
    poll_deadline: Duration,
    current: Option<ParsedFeed>,
    closed: bool,
}

impl FetchResults {
    fn new(tasks: JoinSet<FetchOutcome>, remaining: usize, poll_deadline: Duration) -> Self {
        Self {
            tasks,
            remaining,
            poll_deadline,
            current: None,
            closed: false,
        }
    }

    /// Waits until a parsed feed is available or the results are exhausted.
    ///
    /// Calling it again before [`next`](Self::next) does not consume another
    /// result.
    pub async fn has_next(&mut self) -> bool {
        if self.current.is_some() {
            return true;
        }
        if self.closed {
            return false;
        }

        while self.remaining > 0 {
            let joined = match tokio::time::timeout(self.poll_deadline, self.tasks.join_next()).await {
                Err(_) => {
                    tracing::warn!(
                        outstanding = self.remaining,
                        deadline_ms = self.poll_deadline.as_millis() as u64,
                        "Timeout reached, abandoning outstanding feeds"
                    );
                    break;
                }
                Ok(None) => break,
                Ok(Some(joined)) => joined,
            };
            self.remaining -= 1;

            match joined {
                Ok(Ok(feed)) => {
                    self.current = Some(feed);
                    return true;
                }
                Ok(Err(failure)) => {
                    tracing::warn!(url = %failure.url, error = %failure.error, "RSS could not be fetched");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Fetch task ended abnormally");
                }
            }
        }

        self.close();
        false
    }

    /// Takes the feed found by the last successful [`has_next`](Self::has_next),
    /// waiting for one if needed.
    pub async fn next(&mut self) -> Result<ParsedFeed, ResultsExhausted> {
        if self.current.is_none() && !self.has_next().await {
            return Err(ResultsExhausted);
        }
        self.current.take().ok_or(ResultsExhausted)
    }

    /// Fetches submitted but not yet observed.
    pub fn outstanding(&self) -> usize {
        self.remaining
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        self.closed = true;
        if !self.tasks.is_empty() {
            self.tasks.abort_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FetchLimits;
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss(items: usize) -> String {
        let items: String = (0..items)
            .map(|i| format!("<item><title>t{i}</title><link>http://x/{i}</link></item>"))
            .collect();
        format!(r#"<rss version="2.0"><channel><title>c</title>{items}</channel></rss>"#)
    }

    fn pool(size: usize, poll_deadline: Duration) -> FetchPool {
        let fetcher = Fetcher::new(FetchLimits {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(5),
            ..FetchLimits::default()
        })
        .unwrap();
        FetchPool::new(fetcher, size, poll_deadline, Handle::current())
    }

    async fn drain(results: &mut FetchResults) -> Vec<ParsedFeed> {
        let mut feeds = Vec::new();
        while results.has_next().await {
            feeds.push(results.next().await.unwrap());
        }
        feeds
    }

    #[tokio::test]
    async fn test_empty_scatter_is_exhausted() {
        let mut results = pool(2, Duration::from_secs(1)).scatter(&[]);
        assert!(!results.has_next().await);
        assert_eq!(results.next().await, Err(ResultsExhausted));
    }

    #[tokio::test]
    async fn test_failures_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(path("/ok1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(2)))
            .mount(&server)
            .await;
        Mock::given(path("/ok2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(1)))
            .mount(&server)
            .await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(path("/junk"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let base = server.uri();
        let urls: Vec<String> = ["/ok1", "/missing", "/junk", "/ok2"]
            .iter()
            .map(|p| format!("{base}{p}"))
            .chain(std::iter::once("gopher://nowhere/".to_string()))
            .collect();

        let mut results = pool(4, Duration::from_secs(5)).scatter(&urls);
        let feeds = drain(&mut results).await;

        assert_eq!(feeds.len(), 2);
        let mut item_counts: Vec<usize> = feeds.iter().map(|f| f.items.len()).collect();
        item_counts.sort();
        assert_eq!(item_counts, vec![1, 2]);
        assert_eq!(results.outstanding(), 0);
        assert!(results.is_closed());
    }

    #[tokio::test]
    async fn test_has_next_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(1)))
            .mount(&server)
            .await;

        let mut results = pool(1, Duration::from_secs(5)).scatter(&[format!("{}/a", server.uri())]);
        assert!(results.has_next().await);
        assert!(results.has_next().await);
        assert!(results.next().await.is_ok());
        assert!(!results.has_next().await);
        assert_eq!(results.next().await, Err(ResultsExhausted));
    }

    #[tokio::test]
    async fn test_next_without_has_next_waits() {
        let server = MockServer::start().await;
        Mock::given(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(3)))
            .mount(&server)
            .await;

        let mut results = pool(1, Duration::from_secs(5)).scatter(&[format!("{}/a", server.uri())]);
        assert_eq!(results.next().await.unwrap().items.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stall_stops_iteration_and_cancels() {
        let server = MockServer::start().await;
        Mock::given(path("/fast"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(1)))
            .mount(&server)
            .await;
        Mock::given(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(5))
                    .set_delay(Duration::from_secs(4)),
            )
            .mount(&server)
            .await;

        let base = server.uri();
        let pool = pool(4, Duration::from_millis(400));
        let urls = vec![format!("{base}/slow"), format!("{base}/fast")];

        let started = std::time::Instant::now();
        let mut results = pool.scatter(&urls);
        let feeds = drain(&mut results).await;

        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].items.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(results.outstanding(), 1);

        // The abandoned fetch was aborted and returned its slot.
        let mut freed = false;
        for _ in 0..40 {
            if pool.available() == pool.size() {
                freed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(freed, "aborted fetch did not release its permit");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_saturated_pool_queues() {
        let server = MockServer::start().await;
        Mock::given(path("/a"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(1))
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&server)
            .await;

        let pool = pool(1, Duration::from_secs(5));
        let urls: Vec<String> = (0..5).map(|_| format!("{}/a", server.uri())).collect();
        let mut results = pool.scatter(&urls);
        assert_eq!(drain(&mut results).await.len(), 5);
    }

    #[tokio::test]
    async fn test_closed_pool_cancels_fetches() {
        let pool = pool(2, Duration::from_secs(1));
        pool.close();
        assert!(pool.is_closed());

        let mut results = pool.scatter(&["http://example.invalid/feed".to_string()]);
        assert!(!results.has_next().await);
    }

    #[tokio::test]
    async fn test_pool_shared_between_scatters() {
        let server = MockServer::start().await;
        Mock::given(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(2)))
            .mount(&server)
            .await;

        let pool = pool(2, Duration::from_secs(5));
        let url = vec![format!("{}/a", server.uri()); 3];
        let mut first = pool.scatter(&url);
        let mut second = pool.clone().scatter(&url);

        let (a, b) = tokio::join!(drain(&mut first), drain(&mut second));
        assert_eq!(a.len() + b.len(), 6);
    }
}
