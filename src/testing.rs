//! In-memory fakes shared by the unit tests.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::api::api_types::ListPage;
use crate::api::{FetchError, PageRequest, PageSource, PropertyRecordCard};
use crate::cache::{CacheStorage, RecordCollection, StorageError};

/// Minimal valid property record card with the given id.
pub fn card(id: u64) -> Value {
  json!({
    "id": id,
    "parcel_number": 4_900_000 + id,
    "county": "marion",
    "township": "center",
    "property_class_code": 510,
    "property_class_description": "RES ONE FAMILY PLATTED LOT",
    "property_street_number": 100 + id,
    "property_street_name": "MAIN ST",
    "property_city": "INDIANAPOLIS",
    "property_zipcode": "46204",
    "owner_name": format!("OWNER {}", id),
    "acreage": 0.25,
    "total_sf": 1500.0,
    "price_per_sf": "100.00",
    "most_recent_valuation": "150000.00",
    "most_recent_land_valuation": "30000.00",
    "most_recent_improvement_valuation": "120000.00",
    "most_recent_sale_date": null,
    "most_recent_sale_amount": null,
    "most_recent_ptaboa_date": null,
    "most_recent_ptaboa_amount": null,
    "latitude": 39.77,
    "longitude": -86.16,
    "created": "2024-01-01T00:00:00Z",
    "updated": "2024-01-01T00:00:00Z"
  })
}

/// Complete collection of cards with the given ids.
pub fn collection(ids: &[u64]) -> RecordCollection<PropertyRecordCard> {
  let data: Vec<PropertyRecordCard> = ids
    .iter()
    .map(|id| serde_json::from_value(card(*id)).unwrap())
    .collect();

  RecordCollection {
    count: data.len() as u64,
    data,
    last_fetched: Some(Utc::now()),
  }
}

enum Pages {
  /// Paginate a record list by the requested page size
  Records(Vec<Value>),
  /// Serve fixed page bodies in order
  Scripted(Vec<Value>),
}

/// Fake list endpoint that records what it was asked for.
pub struct FakePages {
  pages: Pages,
  failing_page: Option<u32>,
  /// Full fetches whose first page fails before the endpoint recovers
  outages: AtomicUsize,
  /// Held until notified by the first request only
  gate: Mutex<Option<Arc<Notify>>>,
  requests: Mutex<Vec<(u32, Vec<(String, String)>)>>,
  first_pages: AtomicUsize,
}

impl FakePages {
  fn with_pages(pages: Pages) -> Self {
    Self {
      pages,
      failing_page: None,
      outages: AtomicUsize::new(0),
      gate: Mutex::new(None),
      requests: Mutex::new(Vec::new()),
      first_pages: AtomicUsize::new(0),
    }
  }

  pub fn from_records(records: Vec<Value>) -> Self {
    Self::with_pages(Pages::Records(records))
  }

  pub fn scripted(pages: Vec<Value>) -> Self {
    Self::with_pages(Pages::Scripted(pages))
  }

  /// Answer `page` (and every later request for it) with HTTP 503.
  pub fn failing_on_page(mut self, page: u32) -> Self {
    self.failing_page = Some(page);
    self
  }

  /// Answer the first page of the next `fetches` full fetches with HTTP 503.
  pub fn failing_first(self, fetches: usize) -> Self {
    self.outages.store(fetches, Ordering::SeqCst);
    self
  }

  /// Block the first request until `gate` is notified.
  pub fn gated(self, gate: Arc<Notify>) -> Self {
    *self.gate.lock().unwrap() = Some(gate);
    self
  }

  pub fn requested_pages(&self) -> Vec<u32> {
    self.requests.lock().unwrap().iter().map(|(p, _)| *p).collect()
  }

  pub fn requested_queries(&self) -> Vec<Vec<(String, String)>> {
    self
      .requests
      .lock()
      .unwrap()
      .iter()
      .map(|(_, q)| q.clone())
      .collect()
  }

  /// Number of full fetches started
  pub fn first_page_requests(&self) -> usize {
    self.first_pages.load(Ordering::SeqCst)
  }

  fn url(request: &PageRequest<'_>) -> String {
    format!(
      "http://fake.test/{}?page={}",
      request.resource, request.page
    )
  }

  fn record_page(records: &[Value], request: &PageRequest<'_>) -> ListPage<Value> {
    let size = request.page_size.max(1) as usize;
    let start = (request.page.saturating_sub(1) as usize) * size;
    let results: Vec<Value> = records.iter().skip(start).take(size).cloned().collect();
    let next = (start + size < records.len()).then(|| format!("?page={}", request.page + 1));

    ListPage {
      count: records.len() as u64,
      next,
      previous: None,
      results,
    }
  }
}

#[async_trait]
impl PageSource for FakePages {
  async fn fetch_page(&self, request: &PageRequest<'_>) -> Result<ListPage<Value>, FetchError> {
    self
      .requests
      .lock()
      .unwrap()
      .push((request.page, request.query_pairs()));
    if request.page == 1 {
      self.first_pages.fetch_add(1, Ordering::SeqCst);
    }

    let gate = self.gate.lock().unwrap().take();
    if let Some(gate) = gate {
      gate.notified().await;
    }

    let outage = request.page == 1
      && self
        .outages
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if outage || self.failing_page == Some(request.page) {
      return Err(FetchError::Status {
        url: Self::url(request),
        status: 503,
        detail: "Service Unavailable".to_string(),
      });
    }

    match &self.pages {
      Pages::Records(records) => Ok(Self::record_page(records, request)),
      Pages::Scripted(pages) => match pages.get(request.page as usize - 1) {
        Some(body) => serde_json::from_value(body.clone()).map_err(|e| FetchError::Parse {
          resource: request.resource.to_string(),
          page: request.page,
          message: e.to_string(),
        }),
        None => Err(FetchError::Status {
          url: Self::url(request),
          status: 404,
          detail: "Invalid page.".to_string(),
        }),
      },
    }
  }
}

/// Storage backed by a HashMap, with switchable failures.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, Vec<u8>>>,
  fail_reads: bool,
  fail_writes: bool,
  gets: AtomicUsize,
  puts: AtomicUsize,
}

impl MemoryStorage {
  pub fn failing_reads(mut self) -> Self {
    self.fail_reads = true;
    self
  }

  pub fn failing_writes(mut self) -> Self {
    self.fail_writes = true;
    self
  }

  pub fn get_count(&self) -> usize {
    self.gets.load(Ordering::SeqCst)
  }

  /// Successful writes only
  pub fn put_count(&self) -> usize {
    self.puts.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
    self.gets.fetch_add(1, Ordering::SeqCst);
    if self.fail_reads {
      return Err(StorageError::Read("unreadable".to_string()));
    }
    Ok(self.entries.lock().unwrap().get(key).cloned())
  }

  async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
    if self.fail_writes {
      return Err(StorageError::Write("quota exceeded".to_string()));
    }
    self
      .entries
      .lock()
      .unwrap()
      .insert(key.to_string(), value.to_vec());
    self.puts.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), StorageError> {
    self.entries.lock().unwrap().remove(key);
    Ok(())
  }

  async fn keys(&self) -> Result<Vec<String>, StorageError> {
    Ok(self.entries.lock().unwrap().keys().cloned().collect())
  }
}
