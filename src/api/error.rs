use thiserror::Error;

/// Failure while talking to a list endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  #[error("not signed in: run `propdash login` or set PROPDASH_API_TOKEN")]
  Unauthenticated,

  #[error("invalid endpoint '{0}'")]
  InvalidUrl(String),

  #[error("request to {url} failed: {message}")]
  Network { url: String, message: String },

  #[error("{url} returned HTTP {status}: {detail}")]
  Status {
    url: String,
    status: u16,
    detail: String,
  },

  #[error("failed to parse page {page} of {resource}: {message}")]
  Parse {
    resource: String,
    page: u32,
    message: String,
  },

  /// The server advertised another page but returned nothing on this one.
  #[error("page {page} of {resource} reported a next page but holds no records")]
  EmptyPage { resource: String, page: u32 },
}
