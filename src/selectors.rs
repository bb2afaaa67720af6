//! Derived views over the session store.
//!
//! Everything here is a pure function of a `SessionState` snapshot and some
//! criteria. `Memo` caches the last result per consumer, keyed on the store
//! version and the criteria.

use std::sync::{Arc, Mutex};

use crate::api::{PropertyRecordCard, ReportRequest, ReportRequestStatus};
use crate::cache::RecordCollection;
use crate::store::{LoadStatus, SessionState, StoreReader};

/// Inclusive numeric range; a missing bound is unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Range {
  pub min: Option<f64>,
  pub max: Option<f64>,
}

impl Range {
  pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
    Self { min, max }
  }

  pub fn is_bounded(&self) -> bool {
    self.min.is_some() || self.max.is_some()
  }

  pub fn contains(&self, value: f64) -> bool {
    is_in_range(value, self.min, self.max)
  }

  /// Whether a possibly unparseable value passes. A value that could not be
  /// parsed only passes an unbounded range.
  pub fn admits(&self, value: Option<f64>) -> bool {
    match value {
      Some(v) => self.contains(v),
      None => !self.is_bounded(),
    }
  }
}

pub fn is_in_range(value: f64, min: Option<f64>, max: Option<f64>) -> bool {
  let min = min.unwrap_or(f64::NEG_INFINITY);
  let max = max.unwrap_or(f64::INFINITY);
  value >= min && value <= max
}

/// Integer prefix of a decimal string: `"123.45"` is 123, `" -7x"` is -7.
pub fn parse_int_prefix(s: &str) -> Option<i64> {
  let s = s.trim_start();
  let (negative, digits) = match s.as_bytes().first() {
    Some(b'-') => (true, &s[1..]),
    Some(b'+') => (false, &s[1..]),
    _ => (false, s),
  };

  let end = digits
    .find(|c: char| !c.is_ascii_digit())
    .unwrap_or(digits.len());
  if end == 0 {
    return None;
  }

  let magnitude: i64 = digits[..end].parse().ok()?;
  Some(if negative { -magnitude } else { magnitude })
}

fn decimal(s: &str) -> Option<f64> {
  parse_int_prefix(s).map(|n| n as f64)
}

/// Advanced search criteria over property record cards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvancedSearch {
  pub parcel_number: Option<u64>,
  pub property_class_code: Option<u32>,
  pub price_per_sf: Range,
  pub total_sf: Range,
  pub acreage: Range,
  pub valuation: Range,
  /// Drop parcels that went before the appeals board
  pub exclude_ptaboa: bool,
}

impl AdvancedSearch {
  pub fn matches(&self, card: &PropertyRecordCard) -> bool {
    if self.parcel_number.is_some_and(|p| p != card.parcel_number) {
      return false;
    }
    if self
      .property_class_code
      .is_some_and(|c| c != card.property_class_code)
    {
      return false;
    }

    self.price_per_sf.admits(decimal(&card.price_per_sf))
      && self.total_sf.contains(card.total_sf)
      && self.acreage.contains(card.acreage)
      && self.valuation.admits(decimal(&card.most_recent_valuation))
      && !(self.exclude_ptaboa && card.most_recent_ptaboa_date.is_some())
  }
}

pub fn advanced_search(
  state: &SessionState<PropertyRecordCard>,
  criteria: &AdvancedSearch,
) -> RecordCollection<PropertyRecordCard> {
  let data: Vec<PropertyRecordCard> = state
    .data
    .data
    .iter()
    .filter(|card| criteria.matches(card))
    .cloned()
    .collect();

  RecordCollection {
    count: data.len() as u64,
    data,
    last_fetched: state.data.last_fetched,
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryStats {
  pub total_parcels: usize,
  pub avg_land_value: f64,
  pub avg_improvement_value: f64,
  pub avg_total_value: f64,
  pub avg_square_feet: f64,
  pub avg_price_per_sf: f64,
}

/// Mean of the values present; 0 when none are.
fn mean(values: impl Iterator<Item = Option<f64>>) -> f64 {
  let (sum, n) = values
    .flatten()
    .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
  if n == 0 {
    0.0
  } else {
    sum / n as f64
  }
}

/// Summary over the whole collection, once it has loaded.
pub fn summary_stats(state: &SessionState<PropertyRecordCard>) -> Option<SummaryStats> {
  if state.status != LoadStatus::Succeeded || state.data.is_empty() {
    return None;
  }

  let cards = &state.data.data;
  Some(SummaryStats {
    total_parcels: cards.len(),
    avg_land_value: mean(cards.iter().map(|c| decimal(&c.most_recent_land_valuation))),
    avg_improvement_value: mean(
      cards
        .iter()
        .map(|c| decimal(&c.most_recent_improvement_valuation)),
    ),
    avg_total_value: mean(cards.iter().map(|c| decimal(&c.most_recent_valuation))),
    avg_square_feet: mean(cards.iter().map(|c| Some(c.total_sf))),
    avg_price_per_sf: mean(cards.iter().map(|c| decimal(&c.price_per_sf))),
  })
}

pub fn report_requests_by_status(
  state: &SessionState<ReportRequest>,
  status: ReportRequestStatus,
) -> RecordCollection<ReportRequest> {
  let data: Vec<ReportRequest> = state
    .data
    .data
    .iter()
    .filter(|r| r.status == status)
    .cloned()
    .collect();

  RecordCollection {
    count: data.len() as u64,
    data,
    last_fetched: state.data.last_fetched,
  }
}

/// Single-entry memoization of a selector.
pub struct Memo<C, O> {
  last: Mutex<Option<(u64, C, Arc<O>)>>,
}

impl<C: Clone + PartialEq, O> Memo<C, O> {
  pub fn new() -> Self {
    Self {
      last: Mutex::new(None),
    }
  }

  /// Return the cached output if neither the state version nor the criteria
  /// changed since the last call; otherwise recompute.
  pub fn get<T>(
    &self,
    state: &SessionState<T>,
    criteria: &C,
    compute: impl FnOnce(&SessionState<T>, &C) -> O,
  ) -> Arc<O> {
    let mut last = self
      .last
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some((version, cached_criteria, output)) = last.as_ref() {
      if *version == state.version && cached_criteria == criteria {
        return Arc::clone(output);
      }
    }

    let output = Arc::new(compute(state, criteria));
    *last = Some((state.version, criteria.clone(), Arc::clone(&output)));
    output
  }
}

impl<C: Clone + PartialEq, O> Default for Memo<C, O> {
  fn default() -> Self {
    Self::new()
  }
}

/// Memoized search and summary over a live property store.
pub struct PropertyViews {
  reader: StoreReader<PropertyRecordCard>,
  search: Memo<AdvancedSearch, RecordCollection<PropertyRecordCard>>,
  summary: Memo<(), Option<SummaryStats>>,
}

impl PropertyViews {
  pub fn new(reader: StoreReader<PropertyRecordCard>) -> Self {
    Self {
      reader,
      search: Memo::new(),
      summary: Memo::new(),
    }
  }

  pub fn state(&self) -> Arc<SessionState<PropertyRecordCard>> {
    self.reader.get_state()
  }

  pub fn search(&self, criteria: &AdvancedSearch) -> Arc<RecordCollection<PropertyRecordCard>> {
    self.search.get(&*self.state(), criteria, advanced_search)
  }

  pub fn summary(&self) -> Arc<Option<SummaryStats>> {
    self.summary.get(&*self.state(), &(), |state, _| summary_stats(state))
  }
}
