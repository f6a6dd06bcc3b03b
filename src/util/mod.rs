//! Small helpers shared by the fetch pipeline and the configuration store.
//!
//! - [`validate_url`] / [`validate_url_list`]: source address checks, used
//!   before fetching and when a user submits a new URL list
//! - [`Debouncer`]: restartable one-shot timer that coalesces filesystem events

mod debounce;
mod url_validator;

pub use debounce::Debouncer;
pub use url_validator::{validate_url, validate_url_list, UrlListError, UrlValidationError};
