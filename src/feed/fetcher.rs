use crate::config::Settings;
use crate::feed::parser::{parse_feed, ParseError, ParsedFeed};
use crate::util::{validate_url, UrlValidationError};
use futures::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 6.3; WOW64; Trident/7.0; rv:11.0) like Gecko";
const ACCEPT: &str = "application/rss+xml, application/xhtml+xml, text/xml";

/// Errors that can occur while fetching a single source feed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Connect or read exceeded its time budget
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with non-2xx status code
    #[error("Request unsuccessful (HTTP {0})")]
    HttpStatus(u16),
    #[error("Too many redirects (max {0})")]
    TooManyRedirects(usize),
    /// Redirect status without a usable Location header
    #[error("Redirect (HTTP {0}) without Location header")]
    MissingLocation(u16),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    /// The shared pool shut down before the task could run
    #[error("Fetch cancelled")]
    Cancelled,
}

/// A failed fetch, tagged with the URL it was started for (not the final
/// redirect target).
#[derive(Debug, Error)]
#[error("{url}: {error}")]
pub struct FetchFailure {
    pub url: String,
    #[source]
    pub error: FetchError,
}

impl FetchFailure {
    pub fn new(url: impl Into<String>, error: FetchError) -> Self {
        Self {
            url: url.into(),
            error,
        }
    }
}

/// Result of one fetch task: exactly one per submitted URL.
pub type FetchOutcome = Result<ParsedFeed, FetchFailure>;

/// Timeouts and limits applied to every fetch.
#[derive(Debug, Clone)]
pub struct FetchLimits {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_redirects: usize,
    pub max_bytes: usize,
    pub user_agent: String,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for FetchLimits {
    fn from(settings: &Settings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            read_timeout: settings.read_timeout(),
            max_redirects: settings.max_redirects,
            max_bytes: settings.max_feed_bytes,
            user_agent: settings.user_agent.clone(),
        }
    }
}

/// Where a fetch currently stands. Each hop produces a fresh state; nothing
/// is reassigned in place.
enum FetchState {
    Pending(Url),
    Redirected(Url, usize),
    Done(Result<reqwest::Response, FetchError>),
}

/// Performs one HTTP(S) GET per call and parses the body as RSS.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    limits: FetchLimits,
}

impl Fetcher {
    /// Builds the HTTP client. Redirects are followed manually so that the hop
    /// limit and failure attribution stay under our control.
    pub fn new(limits: FetchLimits) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
        headers.insert(header::ACCEPT_CHARSET, HeaderValue::from_static("UTF-8"));
        // No decompression support, ask for the raw body.
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .user_agent(limits.user_agent.as_str())
            .default_headers(headers)
            .connect_timeout(limits.connect_timeout)
            .read_timeout(limits.read_timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, limits })
    }

    /// Fetches and parses one feed. Never panics; every problem becomes a
    /// [`FetchFailure`] carrying `url`.
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        self.fetch_inner(url)
            .await
            .map_err(|error| FetchFailure::new(url, error))
    }

    async fn fetch_inner(&self, url: &str) -> Result<ParsedFeed, FetchError> {
        let mut state = FetchState::Pending(validate_url(url)?);

        let response = loop {
            state = match state {
                FetchState::Pending(target) => self.request(target, 0).await,
                FetchState::Redirected(target, hop) => self.request(target, hop).await,
                FetchState::Done(result) => break result?,
            };
        };

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, self.limits.max_bytes).await?;
        let feed = parse_feed(&bytes)?;

        tracing::debug!(url = %url, items = feed.items.len(), "Fetched feed");
        Ok(feed)
    }

    /// Sends one request and decides the next state.
    async fn request(&self, target: Url, hop: usize) -> FetchState {
        let budget = self.limits.connect_timeout + self.limits.read_timeout;
        let response = match tokio::time::timeout(budget, self.client.get(target.clone()).send()).await
        {
            Err(_) => return FetchState::Done(Err(FetchError::Timeout)),
            Ok(Err(e)) => return FetchState::Done(Err(classify(e))),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if !is_redirect(status) {
            return FetchState::Done(Ok(response));
        }

        if hop >= self.limits.max_redirects {
            return FetchState::Done(Err(FetchError::TooManyRedirects(self.limits.max_redirects)));
        }

        let next = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|location| target.join(location).ok());

        match next {
            Some(next) => {
                tracing::debug!(from = %target, to = %next, hop = hop + 1, "Following redirect");
                match validate_url(next.as_str()) {
                    Ok(next) => FetchState::Redirected(next, hop + 1),
                    Err(e) => FetchState::Done(Err(e.into())),
                }
            }
            None => FetchState::Done(Err(FetchError::MissingLocation(status.as_u16()))),
        }
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn classify(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e)
    }
}

async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(classify)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
