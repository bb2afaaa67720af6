//! Sequential pagination over list endpoints.

use chrono::Utc;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::RecordCollection;

use super::client::{PageRequest, PageSource};
use super::error::FetchError;
use super::types::ListResource;

/// Walks every page of a list endpoint and accumulates the records.
pub struct PaginatedFetcher<P: PageSource> {
  source: Arc<P>,
}

impl<P: PageSource> PaginatedFetcher<P> {
  pub fn new(source: Arc<P>) -> Self {
    Self { source }
  }

  /// Fetch all pages of `T`'s endpoint.
  ///
  /// Pages are requested strictly one after another so record order matches
  /// the server's. The first page's `count` is kept as the total even if later
  /// pages report a different one.
  pub async fn fetch_all<T>(
    &self,
    page_size: u32,
    extra: &[(String, String)],
  ) -> Result<RecordCollection<T>, FetchError>
  where
    T: ListResource + DeserializeOwned,
  {
    let resource = T::endpoint();
    let mut data: Vec<T> = Vec::new();
    let mut count: Option<u64> = None;
    let mut page = 1u32;

    loop {
      let request = PageRequest {
        resource,
        page,
        page_size,
        extra,
      };
      let chunk = self.source.fetch_page(&request).await?;

      let total = *count.get_or_insert(chunk.count);
      let received = chunk.results.len();

      if received == 0 {
        if chunk.next.is_some() {
          return Err(FetchError::EmptyPage {
            resource: resource.to_string(),
            page,
          });
        }
        // Empty page without a successor ends the walk
        break;
      }

      for value in chunk.results {
        let record = serde_json::from_value(value).map_err(|e| FetchError::Parse {
          resource: resource.to_string(),
          page,
          message: e.to_string(),
        })?;
        data.push(record);
      }

      debug!(resource, page, received, total, "accumulated page");

      if chunk.next.is_none() {
        break;
      }
      page += 1;
    }

    let count = count.unwrap_or(0);
    if data.len() as u64 != count {
      debug!(
        resource,
        count,
        fetched = data.len(),
        "server total drifted during pagination"
      );
    }
    info!(resource, pages = page, records = data.len(), "fetched collection");

    Ok(RecordCollection {
      count,
      data,
      last_fetched: Some(Utc::now()),
    })
  }
}

impl<P: PageSource> Clone for PaginatedFetcher<P> {
  fn clone(&self) -> Self {
    Self {
      source: Arc::clone(&self.source),
    }
  }
}
