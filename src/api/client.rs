use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::session::SessionProvider;

use super::api_types::{error_detail, ListPage, LoginRequest, LoginResponse, NewReportRequest};
use super::error::FetchError;
use super::types::{ListResource, ReportRequest};

/// Endpoint that exchanges credentials for a token pair
const TOKEN_ENDPOINT: &str = "token/";

/// Parameters for one list page request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
  pub resource: &'a str,
  pub page: u32,
  pub page_size: u32,
  pub extra: &'a [(String, String)],
}

impl PageRequest<'_> {
  /// Query string pairs, paging parameters first.
  pub fn query_pairs(&self) -> Vec<(String, String)> {
    let mut pairs = vec![
      ("page_size".to_string(), self.page_size.to_string()),
      ("page".to_string(), self.page.to_string()),
    ];
    pairs.extend(
      self
        .extra
        .iter()
        .filter(|(k, _)| k != "page" && k != "page_size")
        .cloned(),
    );
    pairs
  }
}

/// Source of raw list pages.
#[async_trait]
pub trait PageSource: Send + Sync {
  async fn fetch_page(&self, request: &PageRequest<'_>) -> Result<ListPage<Value>, FetchError>;
}

/// REST API client wrapper
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  session: Arc<dyn SessionProvider>,
}

impl ApiClient {
  pub fn new(config: &Config, session: Arc<dyn SessionProvider>) -> color_eyre::Result<Self> {
    let base_url = parse_base_url(&config.api.url)?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.api.timeout_secs))
      .user_agent(concat!("propdash/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      session,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// Resolve an endpoint path against the base url.
  pub fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|_| FetchError::InvalidUrl(path.to_string()))
  }

  /// Exchange username and password for a token pair.
  pub async fn obtain_token(
    &self,
    username: &str,
    password: &str,
  ) -> Result<LoginResponse, FetchError> {
    let url = self.endpoint(TOKEN_ENDPOINT)?;
    let request = self
      .http
      .post(url.clone())
      .json(&LoginRequest { username, password });

    let body = self.send(&url, request).await?;
    decode(&body, TOKEN_ENDPOINT, 0)
  }

  /// Fetch one record of `T` by id.
  pub async fn get_by_id<T>(&self, id: u64) -> Result<T, FetchError>
  where
    T: ListResource + DeserializeOwned,
  {
    let token = self.token()?;
    let url = self.endpoint(&format!("{}{}", T::endpoint(), id))?;
    debug!(url = %url, "requesting record");

    let body = self
      .send(&url, self.http.get(url.clone()).bearer_auth(token))
      .await?;
    decode(&body, T::endpoint(), 0)
  }

  /// Submit a new peer report request. The server answers with the created
  /// request, normally still `pending`.
  pub async fn create_report_request(
    &self,
    request: &NewReportRequest,
  ) -> Result<ReportRequest, FetchError> {
    let token = self.token()?;
    let url = self.endpoint(ReportRequest::endpoint())?;
    debug!(url = %url, parcel = request.source_parcel_number, "creating report request");

    let builder = self.http.post(url.clone()).bearer_auth(token).json(request);
    let body = self.send(&url, builder).await?;
    decode(&body, ReportRequest::endpoint(), 0)
  }

  fn token(&self) -> Result<String, FetchError> {
    self
      .session
      .bearer_token()
      .ok_or(FetchError::Unauthenticated)
  }

  /// Send `request` and return the body of a successful response.
  async fn send(&self, url: &Url, request: RequestBuilder) -> Result<Vec<u8>, FetchError> {
    let response = request
      .header(ACCEPT, "application/json")
      .send()
      .await
      .map_err(|e| network_error(url, e))?;

    let status = response.status();
    let body = response
      .bytes()
      .await
      .map_err(|e| network_error(url, e))?;

    if !status.is_success() {
      return Err(FetchError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        detail: error_detail(&body),
      });
    }
    Ok(body.to_vec())
  }
}

#[async_trait]
impl PageSource for ApiClient {
  async fn fetch_page(&self, request: &PageRequest<'_>) -> Result<ListPage<Value>, FetchError> {
    let token = self.token()?;
    let url = self.endpoint(request.resource)?;

    debug!(url = %url, page = request.page, page_size = request.page_size, "requesting page");

    let builder = self
      .http
      .get(url.clone())
      .query(&request.query_pairs())
      .bearer_auth(token);
    let body = self.send(&url, builder).await?;
    decode(&body, request.resource, request.page)
  }
}

fn decode<T: DeserializeOwned>(body: &[u8], resource: &str, page: u32) -> Result<T, FetchError> {
  serde_json::from_slice(body).map_err(|e| FetchError::Parse {
    resource: resource.to_string(),
    page,
    message: e.to_string(),
  })
}

fn network_error(url: &Url, e: reqwest::Error) -> FetchError {
  FetchError::Network {
    url: url.to_string(),
    message: e.to_string(),
  }
}

/// Parse the configured API url, making sure relative joins stay under it.
fn parse_base_url(raw: &str) -> color_eyre::Result<Url> {
  let mut url =
    Url::parse(raw).map_err(|e| color_eyre::eyre::eyre!("Invalid API url '{}': {}", raw, e))?;
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  Ok(url)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::Report;
  use crate::session::TokenSession;
  use tempfile::TempDir;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::{TcpListener, TcpStream};
  use tokio::task::JoinHandle;

  fn client_for(base_url: &str, token: Option<&str>) -> (ApiClient, TempDir) {
    let dir = TempDir::new().unwrap();
    let config: Config = serde_yaml::from_str(&format!("api:\n  url: {}\n", base_url)).unwrap();
    let session = TokenSession::load(dir.path().join("session.json"), token.map(str::to_string)).unwrap();
    let client = ApiClient::new(&config, Arc::new(session)).unwrap();
    (client, dir)
  }

  /// Serve a single response, then hand back the raw request, lowercased.
  async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/api/", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let request = read_request(&mut socket).await;
      let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
      );
      socket.write_all(response.as_bytes()).await.unwrap();
      socket.shutdown().await.unwrap();
      request.to_lowercase()
    });
    (base_url, handle)
  }

  async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
      let n = socket.read(&mut chunk).await.unwrap();
      if n == 0 {
        break;
      }
      buf.extend_from_slice(&chunk[..n]);

      if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
        let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
        let length = head
          .lines()
          .find_map(|line| line.strip_prefix("content-length:"))
          .and_then(|v| v.trim().parse::<usize>().ok())
          .unwrap_or(0);
        if buf.len() >= end + 4 + length {
          break;
        }
      }
    }
    String::from_utf8_lossy(&buf).into_owned()
  }

  fn first_page() -> PageRequest<'static> {
    PageRequest {
      resource: "v0/propertyrecordcards/",
      page: 1,
      page_size: 2,
      extra: &[],
    }
  }

  #[tokio::test]
  async fn test_page_request_sends_bearer_and_paging() {
    let (base_url, server) = serve_once("200 OK", r#"{"count": 1, "next": null, "results": [{"id": 1}]}"#).await;
    let (client, _dir) = client_for(&base_url, Some("tok"));

    let page = client.fetch_page(&first_page()).await.unwrap();
    assert_eq!(page.count, 1);
    assert_eq!(page.results.len(), 1);

    let request = server.await.unwrap();
    assert!(request.starts_with("get /api/v0/propertyrecordcards/?page_size=2&page=1 http/1.1"));
    assert!(request.contains("authorization: bearer tok"));
    assert!(request.contains("accept: application/json"));
  }

  #[tokio::test]
  async fn test_page_without_session_sends_nothing() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/api/", listener.local_addr().unwrap());
    let (client, _dir) = client_for(&base_url, None);

    let err = client.fetch_page(&first_page()).await.unwrap_err();
    assert_eq!(err, FetchError::Unauthenticated);

    let connection = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
    assert!(connection.is_err());
  }

  #[tokio::test]
  async fn test_error_status_carries_server_detail() {
    let (base_url, server) = serve_once(
      "401 Unauthorized",
      r#"{"detail": "Given token not valid for any token type"}"#,
    )
    .await;
    let (client, _dir) = client_for(&base_url, Some("expired"));

    let err = client.fetch_page(&first_page()).await.unwrap_err();
    match err {
      FetchError::Status { url, status, detail } => {
        assert_eq!(status, 401);
        assert_eq!(detail, "Given token not valid for any token type");
        assert!(url.ends_with("/api/v0/propertyrecordcards/"));
      }
      other => panic!("expected status error, got {:?}", other),
    }
    server.await.unwrap();
  }

  #[tokio::test]
  async fn test_malformed_page_is_a_parse_error() {
    let (base_url, server) = serve_once("200 OK", r#"{"count": 3, "results": "nope"}"#).await;
    let (client, _dir) = client_for(&base_url, Some("tok"));

    let err = client.fetch_page(&first_page()).await.unwrap_err();
    assert!(matches!(
      err,
      FetchError::Parse { ref resource, page: 1, .. } if resource == "v0/propertyrecordcards/"
    ));
    server.await.unwrap();
  }

  #[tokio::test]
  async fn test_get_by_id_requests_record_path() {
    let (base_url, server) = serve_once(
      "200 OK",
      r#"{"id": 7, "report_request": 3, "source_parcel_number": 4900001, "result": null}"#,
    )
    .await;
    let (client, _dir) = client_for(&base_url, Some("tok"));

    let report: Report = client.get_by_id(7).await.unwrap();
    assert_eq!(report.id, 7);
    assert_eq!(report.report_request, 3);

    let request = server.await.unwrap();
    assert!(request.starts_with("get /api/v0/reports/7 http/1.1"));
    assert!(request.contains("authorization: bearer tok"));
  }

  #[tokio::test]
  async fn test_create_report_request_posts_body() {
    let (base_url, server) = serve_once(
      "201 Created",
      r#"{"id": 12, "source_parcel_number": 4900001, "sql": "{}", "status": "pending", "max_number_of_peers": 25, "max_distance_km": 2.5}"#,
    )
    .await;
    let (client, _dir) = client_for(&base_url, Some("tok"));

    let created = client
      .create_report_request(&NewReportRequest::for_parcel(4_900_001, 25, 2.5))
      .await
      .unwrap();
    assert_eq!(created.id, 12);
    assert_eq!(created.status, crate::api::ReportRequestStatus::Pending);

    let request = server.await.unwrap();
    assert!(request.starts_with("post /api/v0/reportrequests/ http/1.1"));
    assert!(request.contains("content-type: application/json"));
    assert!(request.contains(r#""source_parcel_number":4900001"#));
    assert!(request.contains(r#""max_number_of_peers":25"#));
  }

  #[test]
  fn test_base_url_gets_trailing_slash() {
    let url = parse_base_url("https://api.example.com/backend").unwrap();
    assert_eq!(url.as_str(), "https://api.example.com/backend/");

    let joined = url.join("v0/reports/").unwrap();
    assert_eq!(joined.as_str(), "https://api.example.com/backend/v0/reports/");
  }

  #[test]
  fn test_invalid_base_url_is_rejected() {
    assert!(parse_base_url("not a url").is_err());
  }

  #[test]
  fn test_query_pairs_keep_paging_authoritative() {
    let extra = vec![
      ("county".to_string(), "marion".to_string()),
      ("page".to_string(), "9".to_string()),
    ];
    let request = PageRequest {
      resource: "v0/propertyrecordcards/",
      page: 2,
      page_size: 300,
      extra: &extra,
    };

    assert_eq!(
      request.query_pairs(),
      vec![
        ("page_size".to_string(), "300".to_string()),
        ("page".to_string(), "2".to_string()),
        ("county".to_string(), "marion".to_string()),
      ]
    );
  }
}
