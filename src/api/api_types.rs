//! Serde types matching the REST API envelopes.
//!
//! Records inside a page are kept as raw JSON here; the paginator decodes
//! them into domain types so a malformed record can be reported per page.

use serde::{Deserialize, Serialize};

/// One page of a list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ListPage<T> {
  /// Server-reported total across all pages
  #[serde(default)]
  pub count: u64,
  pub next: Option<String>,
  #[serde(default)]
  #[allow(dead_code)]
  pub previous: Option<String>,
  #[serde(default = "Vec::new")]
  pub results: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
  pub username: &'a str,
  pub password: &'a str,
}

/// Token pair issued by the `token/` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
  pub access: String,
  pub refresh: String,
}

/// Body of a `POST` to the report requests endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewReportRequest {
  pub source_parcel_number: u64,
  /// Stringified peer query config, in the shape the dashboard stores
  pub sql: String,
  pub max_number_of_peers: u32,
  pub max_distance_km: f64,
}

impl NewReportRequest {
  /// Peer report request for one parcel with no extra filter rules.
  pub fn for_parcel(parcel_number: u64, max_number_of_peers: u32, max_distance_km: f64) -> Self {
    let sql = serde_json::json!({
      "condition": "AND",
      "rules": [],
      "valid": true,
      "parcelNumber": parcel_number,
      "maxNumberOfPeers": max_number_of_peers,
      "maxDistanceKm": max_distance_km,
    })
    .to_string();

    Self {
      source_parcel_number: parcel_number,
      sql,
      max_number_of_peers,
      max_distance_km,
    }
  }
}

/// Error body shapes the API uses for failed requests.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
  pub detail: Option<String>,
  pub error: Option<String>,
}

/// Pull a human readable message out of an error response body.
pub fn error_detail(body: &[u8]) -> String {
  if let Ok(parsed) = serde_json::from_slice::<ApiErrorBody>(body) {
    if let Some(msg) = parsed.detail.or(parsed.error) {
      return msg;
    }
  }

  let text = String::from_utf8_lossy(body);
  let text = text.trim();
  if text.is_empty() {
    return "empty response body".to_string();
  }
  text.chars().take(200).collect()
}
