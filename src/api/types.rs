use serde::{Deserialize, Serialize};

/// A record kind served by a paginated list endpoint.
pub trait ListResource {
  /// Endpoint path relative to the API base url (trailing slash included).
  fn endpoint() -> &'static str;
}

/// Tax-parcel record card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecordCard {
  pub id: u64,
  pub parcel_number: u64,
  #[serde(default)]
  pub alt_parcel_number: String,
  #[serde(default)]
  pub county: String,
  #[serde(default)]
  pub township: String,
  #[serde(default)]
  pub property_class_code: u32,
  #[serde(default)]
  pub property_class_description: String,
  pub property_street_number: Option<u32>,
  #[serde(default)]
  pub property_street_name: String,
  #[serde(default)]
  pub property_city: String,
  #[serde(default)]
  pub property_zipcode: String,
  #[serde(default)]
  pub owner_name: String,
  #[serde(default)]
  pub acreage: f64,
  #[serde(default)]
  pub total_sf: f64,
  // Decimal fields arrive as strings to keep their precision
  #[serde(default)]
  pub price_per_sf: String,
  #[serde(default)]
  pub most_recent_valuation: String,
  #[serde(default)]
  pub most_recent_land_valuation: String,
  #[serde(default)]
  pub most_recent_improvement_valuation: String,
  pub most_recent_sale_date: Option<String>,
  pub most_recent_sale_amount: Option<String>,
  /// Date of the latest property tax appeals board determination, if any
  pub most_recent_ptaboa_date: Option<String>,
  pub most_recent_ptaboa_amount: Option<String>,
  pub latitude: Option<f64>,
  pub longitude: Option<f64>,
  #[serde(default)]
  pub created: String,
  #[serde(default)]
  pub updated: String,
}

impl PropertyRecordCard {
  /// Street address as a single line, e.g. "123 MAIN ST"
  pub fn street_address(&self) -> String {
    match self.property_street_number {
      Some(n) => format!("{} {}", n, self.property_street_name),
      None => self.property_street_name.clone(),
    }
  }
}

impl ListResource for PropertyRecordCard {
  fn endpoint() -> &'static str {
    "v0/propertyrecordcards/"
  }
}

/// Peer comparison report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
  pub id: u64,
  pub report_request: u64,
  pub source_parcel_number: u64,
  #[serde(default)]
  pub created: String,
  #[serde(default)]
  pub updated: String,
  /// Serialized comparison rows; absent until the report has results
  pub result: Option<String>,
}

impl ListResource for Report {
  fn endpoint() -> &'static str {
    "v0/reports/"
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportRequestStatus {
  Pending,
  Complete,
  Failed,
}

impl ReportRequestStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Complete => "complete",
      Self::Failed => "failed",
    }
  }
}

/// Request to build a peer comparison report for a source parcel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
  pub id: u64,
  pub source_parcel_number: u64,
  /// Stringified query config, if the request was built with filters
  pub sql: Option<String>,
  pub status: ReportRequestStatus,
  #[serde(default)]
  pub max_number_of_peers: u32,
  #[serde(default)]
  pub max_distance_km: f64,
  #[serde(default)]
  pub created: String,
  #[serde(default)]
  pub updated: String,
}

impl ListResource for ReportRequest {
  fn endpoint() -> &'static str {
    "v0/reportrequests/"
  }
}
