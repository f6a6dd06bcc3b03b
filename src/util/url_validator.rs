use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum UrlValidationError {
    #[error("Not a URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Only http and https sources can be fetched, got {0}://")]
    UnsupportedScheme(String),
}

/// Rejected source list from the settings write path.
#[derive(Error, Debug)]
pub enum UrlListError {
    #[error("Expected a JSON array of URL strings: {0}")]
    NotAnArray(#[from] serde_json::Error),
    #[error("Source '{url}' rejected: {source}")]
    Entry {
        url: String,
        #[source]
        source: UrlValidationError,
    },
}

/// Parses an absolute `http`/`https` source address.
///
/// Surrounding whitespace is ignored. Nothing is fetched, so a URL that
/// passes may still not serve RSS.
///
/// ```
/// use catnapper::util::validate_url;
///
/// assert_eq!(validate_url(" https://example.com/rss ").unwrap().scheme(), "https");
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(raw: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(raw.trim())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(UrlValidationError::UnsupportedScheme(other.to_owned())),
    }
}

/// Decodes user-supplied text as a JSON array of source URLs, checking each
/// with [`validate_url`]. Entries are kept exactly as typed.
pub fn validate_url_list(raw: &str) -> Result<Vec<String>, UrlListError> {
    let urls: Vec<String> = serde_json::from_str(raw)?;
    for url in &urls {
        validate_url(url).map_err(|source| UrlListError::Entry {
            url: url.clone(),
            source,
        })?;
    }
    Ok(urls)
}
