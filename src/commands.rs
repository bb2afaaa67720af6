//! CLI command handlers.

use clap::ValueEnum;
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{info, warn};

use crate::api::api_types::NewReportRequest;
use crate::api::{ListResource, PropertyRecordCard, Report, ReportRequest, ReportRequestStatus};
use crate::cache::{clear_all, Cacheable, Freshness};
use crate::config::Config;
use crate::context::{AppContext, AppSync};
use crate::selectors::{report_requests_by_status, AdvancedSearch, PropertyViews, Range};
use crate::session::SessionProvider;
use crate::sync::{SyncEvent, SyncPhase};

/// Record collections the CLI can sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Resource {
  Properties,
  Reports,
  ReportRequests,
}

impl Resource {
  pub const ALL: [Resource; 3] = [Resource::Properties, Resource::Reports, Resource::ReportRequests];

  pub fn label(&self) -> &'static str {
    match self {
      Self::Properties => "properties",
      Self::Reports => "reports",
      Self::ReportRequests => "report requests",
    }
  }
}

/// Advanced search filters
#[derive(Debug, Clone, Default, clap::Args)]
pub struct SearchArgs {
  /// Exact parcel number
  #[arg(long)]
  pub parcel: Option<u64>,
  /// Exact property class code (e.g., 510)
  #[arg(long)]
  pub class_code: Option<u32>,
  #[arg(long)]
  pub min_price_per_sf: Option<f64>,
  #[arg(long)]
  pub max_price_per_sf: Option<f64>,
  #[arg(long)]
  pub min_sf: Option<f64>,
  #[arg(long)]
  pub max_sf: Option<f64>,
  #[arg(long)]
  pub min_acreage: Option<f64>,
  #[arg(long)]
  pub max_acreage: Option<f64>,
  #[arg(long)]
  pub min_valuation: Option<f64>,
  #[arg(long)]
  pub max_valuation: Option<f64>,
  /// Skip parcels with appeals board (PTABOA) activity
  #[arg(long)]
  pub exclude_ptaboa: bool,
  /// Maximum rows to print
  #[arg(long, default_value_t = 25)]
  pub limit: usize,
}

/// Parse a `key=value` list query param.
pub fn parse_param(raw: &str) -> Result<(String, String), String> {
  let (key, value) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
  let key = key.trim();
  if key.is_empty() {
    return Err(format!("missing key in '{}'", raw));
  }
  if key == "page" || key == "page_size" {
    return Err(format!("'{}' is set by the paginator", key));
  }
  Ok((key.to_string(), value.trim().to_string()))
}

/// Peer report request to submit
#[derive(Debug, Clone, clap::Args)]
pub struct NewReportRequestArgs {
  /// Source parcel number
  #[arg(long)]
  pub parcel: u64,
  /// Maximum number of peer parcels to compare against
  #[arg(long, default_value_t = 25)]
  pub max_peers: u32,
  /// Search radius around the source parcel
  #[arg(long, default_value_t = 5.0)]
  pub max_distance_km: f64,
}

impl From<&NewReportRequestArgs> for NewReportRequest {
  fn from(args: &NewReportRequestArgs) -> Self {
    NewReportRequest::for_parcel(args.parcel, args.max_peers, args.max_distance_km)
  }
}

impl From<&SearchArgs> for AdvancedSearch {
  fn from(args: &SearchArgs) -> Self {
    AdvancedSearch {
      parcel_number: args.parcel,
      property_class_code: args.class_code,
      price_per_sf: Range::new(args.min_price_per_sf, args.max_price_per_sf),
      total_sf: Range::new(args.min_sf, args.max_sf),
      acreage: Range::new(args.min_acreage, args.max_acreage),
      valuation: Range::new(args.min_valuation, args.max_valuation),
      exclude_ptaboa: args.exclude_ptaboa,
    }
  }
}

pub async fn login(ctx: &AppContext, username: &str) -> Result<()> {
  let password = Config::get_password()?;
  let tokens = ctx
    .client
    .obtain_token(username, &password)
    .await
    .map_err(|e| eyre!("Login failed: {}", e))?;

  ctx.session.sign_in(username, tokens)?;
  println!("Signed in as {}", username);
  if ctx.session.uses_env_token() {
    println!("Note: PROPDASH_API_TOKEN is set and takes precedence over the stored session");
  }
  Ok(())
}

/// Tear down every resource's session, then forget the credentials.
pub async fn logout(ctx: &AppContext) -> Result<()> {
  end_session::<PropertyRecordCard>(ctx).await?;
  end_session::<Report>(ctx).await?;
  end_session::<ReportRequest>(ctx).await?;

  ctx.session.sign_out()?;
  if ctx.config.cache.retain_on_logout {
    println!("Signed out (cache kept)");
  } else {
    println!("Signed out and cleared the local cache");
  }
  Ok(())
}

async fn end_session<T: Cacheable + ListResource>(ctx: &AppContext) -> Result<()> {
  ctx
    .data_sync::<T>()
    .clear()
    .await
    .map_err(|e| eyre!("Failed to clear {} cache: {}", T::entity_type(), e))
}

pub async fn sync(ctx: &AppContext, resource: Resource) -> Result<()> {
  match resource {
    Resource::Properties => {
      let sync = load::<PropertyRecordCard>(ctx, resource).await?;
      report_loaded(resource, &sync);
    }
    Resource::Reports => {
      let sync = load::<Report>(ctx, resource).await?;
      report_loaded(resource, &sync);
    }
    Resource::ReportRequests => {
      let sync = load::<ReportRequest>(ctx, resource).await?;
      report_loaded(resource, &sync);

      let state = sync.reader().get_state();
      for status in [
        ReportRequestStatus::Pending,
        ReportRequestStatus::Complete,
        ReportRequestStatus::Failed,
      ] {
        let matching = report_requests_by_status(&state, status);
        println!("  {:<9} {}", status.as_str(), matching.count);
      }
    }
  }
  Ok(())
}

pub async fn refresh(ctx: &AppContext, resource: Resource) -> Result<()> {
  match resource {
    Resource::Properties => refresh_resource::<PropertyRecordCard>(ctx, resource).await,
    Resource::Reports => refresh_resource::<Report>(ctx, resource).await,
    Resource::ReportRequests => refresh_resource::<ReportRequest>(ctx, resource).await,
  }
}

async fn refresh_resource<T: Cacheable + ListResource>(
  ctx: &AppContext,
  resource: Resource,
) -> Result<()> {
  require_session(ctx)?;

  let sync = ctx.data_sync::<T>();
  sync
    .refresh()
    .await
    .map_err(|e| eyre!("Refresh of {} failed: {}", resource.label(), e))?;

  report_loaded(resource, &sync);
  Ok(())
}

pub async fn status(ctx: &AppContext) -> Result<()> {
  match ctx.session.username() {
    _ if ctx.session.uses_env_token() => println!("Session: token from PROPDASH_API_TOKEN"),
    Some(user) => println!("Session: signed in as {}", user),
    None => println!("Session: signed out"),
  }
  println!("API: {}", ctx.client.base_url());

  if !ctx.config.cache.enabled {
    println!("Cache: disabled");
    return Ok(());
  }
  println!("Cache: {}", ctx.config.cache_path()?.display());

  for resource in Resource::ALL {
    let line = match resource {
      Resource::Properties => cache_status::<PropertyRecordCard>(ctx).await,
      Resource::Reports => cache_status::<Report>(ctx).await,
      Resource::ReportRequests => cache_status::<ReportRequest>(ctx).await,
    };
    println!("  {:<16} {}", resource.label(), line);
  }
  Ok(())
}

async fn cache_status<T: Cacheable>(ctx: &AppContext) -> String {
  match ctx.cache_for::<T>(&ctx.extra_params).read::<T>().await {
    Ok(read) => match (&read.data, read.freshness()) {
      (Some(collection), freshness) => {
        let fetched = collection
          .last_fetched
          .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
          .unwrap_or_else(|| "unknown".to_string());
        format!(
          "{} records, {}, fetched {}",
          collection.len(),
          freshness.as_str(),
          fetched
        )
      }
      (None, _) => "not cached".to_string(),
    },
    Err(e) => format!("unreadable ({})", e),
  }
}

pub async fn search(ctx: &AppContext, args: &SearchArgs) -> Result<()> {
  let sync = load::<PropertyRecordCard>(ctx, Resource::Properties).await?;
  let views = PropertyViews::new(sync.reader());
  let state = views.state();

  let criteria = AdvancedSearch::from(args);
  let results = views.search(&criteria);
  info!(matches = results.count, total = state.data.len(), "advanced search");

  println!("{} of {} parcels match", results.count, state.data.len());
  for card in results.data.iter().take(args.limit) {
    println!(
      "{:>12}  {:<32}  {:>4}  {:>14}  {}",
      card.parcel_number,
      card.street_address(),
      card.property_class_code,
      card.most_recent_valuation,
      card.owner_name
    );
  }
  if results.data.len() > args.limit {
    println!("... {} more", results.data.len() - args.limit);
  }
  Ok(())
}

pub async fn summary(ctx: &AppContext) -> Result<()> {
  let sync = load::<PropertyRecordCard>(ctx, Resource::Properties).await?;
  let views = PropertyViews::new(sync.reader());

  let summary = views.summary();
  let Some(stats) = &*summary else {
    println!("No property data to summarize");
    return Ok(());
  };

  println!("Total parcels:          {}", stats.total_parcels);
  println!("Avg land value:         ${:.2}", stats.avg_land_value);
  println!("Avg improvement value:  ${:.2}", stats.avg_improvement_value);
  println!("Avg total value:        ${:.2}", stats.avg_total_value);
  println!("Avg square feet:        {:.0}", stats.avg_square_feet);
  println!("Avg price per sq ft:    ${:.2}", stats.avg_price_per_sf);
  Ok(())
}

/// Print one record fetched straight from the API.
pub async fn show(ctx: &AppContext, resource: Resource, id: u64) -> Result<()> {
  require_session(ctx)?;
  match resource {
    Resource::Properties => show_record::<PropertyRecordCard>(ctx, resource, id).await,
    Resource::Reports => show_record::<Report>(ctx, resource, id).await,
    Resource::ReportRequests => show_record::<ReportRequest>(ctx, resource, id).await,
  }
}

async fn show_record<T>(ctx: &AppContext, resource: Resource, id: u64) -> Result<()>
where
  T: ListResource + DeserializeOwned + Serialize,
{
  let record: T = ctx
    .client
    .get_by_id(id)
    .await
    .map_err(|e| eyre!("Could not fetch {} #{}: {}", resource.label(), id, e))?;

  let pretty = serde_json::to_string_pretty(&record)
    .map_err(|e| eyre!("Failed to format {} #{}: {}", resource.label(), id, e))?;
  println!("{}", pretty);
  Ok(())
}

/// Submit a peer report request. The cached report request list is dropped
/// so the next sync picks the new request up.
pub async fn create_report_request(ctx: &AppContext, args: &NewReportRequestArgs) -> Result<()> {
  require_session(ctx)?;

  let request = NewReportRequest::from(args);
  let created = ctx
    .client
    .create_report_request(&request)
    .await
    .map_err(|e| eyre!("Failed to create report request: {}", e))?;
  info!(id = created.id, parcel = created.source_parcel_number, "report request created");

  if let Err(e) = ctx.cache_for::<ReportRequest>(&ctx.extra_params).clear().await {
    warn!(error = %e, "cached report requests not invalidated");
  }

  println!(
    "Created report request #{} for parcel {} ({})",
    created.id,
    created.source_parcel_number,
    created.status.as_str()
  );
  Ok(())
}

pub async fn clear(ctx: &AppContext) -> Result<()> {
  let removed = clear_all(ctx.storage.as_ref())
    .await
    .map_err(|e| eyre!("Failed to clear cache: {}", e))?;
  println!("Removed {} cached collection(s)", removed);
  Ok(())
}

fn require_session(ctx: &AppContext) -> Result<()> {
  if ctx.session.is_authenticated() {
    Ok(())
  } else {
    Err(eyre!("Not signed in. Run `propdash login --username <name>` first."))
  }
}

/// Initialize the orchestrator for `T` and wait for it to settle.
async fn load<T: Cacheable + ListResource>(
  ctx: &AppContext,
  resource: Resource,
) -> Result<Arc<AppSync<T>>> {
  let sync = ctx.data_sync::<T>();
  let mut events = sync.subscribe();

  let mut phase = sync.initialize().await;
  println!("{}: {}", resource.label(), phase_message(phase));

  if !phase.is_terminal() {
    if !ctx.session.is_authenticated() {
      warn!(resource = T::entity_type(), "fetching without a session");
    }
    phase = sync.settled().await;
  }

  loop {
    match events.try_recv() {
      Ok(SyncEvent::Cached {
        collection,
        freshness,
      }) if freshness != Freshness::Missing => {
        println!("  served {} cached records ({})", collection.len(), freshness.as_str());
      }
      Ok(SyncEvent::Cached { .. }) => {}
      Ok(SyncEvent::Refreshed(collection)) => {
        println!("  fetched {} records", collection.len());
      }
      Ok(SyncEvent::RefreshFailed(error)) => {
        println!("  refresh failed: {}", error);
      }
      Err(TryRecvError::Lagged(skipped)) => {
        warn!(skipped, "missed sync events");
      }
      Err(TryRecvError::Empty | TryRecvError::Closed) => break,
    }
  }

  if phase == SyncPhase::Failed {
    let error = sync
      .reader()
      .get_state()
      .error
      .clone()
      .unwrap_or_else(|| "unknown error".to_string());
    return Err(eyre!("Could not load {}: {}", resource.label(), error));
  }
  Ok(sync)
}

fn phase_message(phase: SyncPhase) -> &'static str {
  match phase {
    SyncPhase::NotStarted => "not started",
    SyncPhase::Initializing => "initializing",
    SyncPhase::CacheHitFresh | SyncPhase::Ready => "ready",
    SyncPhase::CacheHitStaleRefetching => "cache is stale, refetching",
    SyncPhase::CacheMissFetching => "nothing cached, fetching",
    SyncPhase::Failed => "failed",
  }
}

fn report_loaded<T: Cacheable + ListResource>(resource: Resource, sync: &AppSync<T>) {
  let state = sync.reader().get_state();
  let collection = &state.data;

  println!(
    "{}: {} of {} records ({})",
    resource.label(),
    collection.len(),
    collection.count,
    state.status
  );
  if !collection.is_complete() {
    println!("  server total changed while paging; run `propdash refresh` to resync");
  }
  if let Some(error) = &state.error {
    println!("  last error: {}", error);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_search_args_map_to_criteria() {
    let args = SearchArgs {
      class_code: Some(510),
      min_valuation: Some(100_000.0),
      exclude_ptaboa: true,
      ..SearchArgs::default()
    };
    let criteria = AdvancedSearch::from(&args);

    assert_eq!(criteria.property_class_code, Some(510));
    assert_eq!(criteria.valuation, Range::new(Some(100_000.0), None));
    assert!(!criteria.price_per_sf.is_bounded());
    assert!(criteria.exclude_ptaboa);
  }

  #[test]
  fn test_parse_param() {
    assert_eq!(
      parse_param("county=marion").unwrap(),
      ("county".to_string(), "marion".to_string())
    );
    assert_eq!(
      parse_param(" township = center ").unwrap(),
      ("township".to_string(), "center".to_string())
    );
    assert_eq!(parse_param("owner=").unwrap(), ("owner".to_string(), String::new()));

    assert!(parse_param("county").is_err());
    assert!(parse_param("=marion").is_err());
    assert!(parse_param("page=2").is_err());
  }

  #[test]
  fn test_new_report_request_args() {
    let args = NewReportRequestArgs {
      parcel: 4_900_001,
      max_peers: 10,
      max_distance_km: 1.5,
    };
    let request = NewReportRequest::from(&args);

    assert_eq!(request.source_parcel_number, 4_900_001);
    assert_eq!(request.max_number_of_peers, 10);
    assert_eq!(request.max_distance_km, 1.5);
    assert!(request.sql.contains("\"parcelNumber\":4900001"));
  }

  #[test]
  fn test_resource_names() {
    assert_eq!(
      Resource::from_str("report-requests", true).unwrap(),
      Resource::ReportRequests
    );
    assert_eq!(Resource::Properties.label(), "properties");
  }
}
