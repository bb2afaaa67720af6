//! Caching implementations for API record types.

use crate::cache::Cacheable;

use super::types::{PropertyRecordCard, Report, ReportRequest};

impl Cacheable for PropertyRecordCard {
  fn entity_type() -> &'static str {
    "property_record_card"
  }
}

impl Cacheable for Report {
  fn entity_type() -> &'static str {
    "report"
  }
}

impl Cacheable for ReportRequest {
  fn entity_type() -> &'static str {
    "report_request"
  }
}
