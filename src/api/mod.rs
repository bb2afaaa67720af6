//! Remote REST API: record types, the HTTP client and pagination.

pub mod api_types;
mod cache;
pub mod client;
pub mod error;
pub mod paginate;
pub mod types;

pub use client::{ApiClient, PageRequest, PageSource};
pub use error::FetchError;
pub use paginate::PaginatedFetcher;
pub use types::{ListResource, PropertyRecordCard, Report, ReportRequest, ReportRequestStatus};
