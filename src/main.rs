use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use propdash::commands::{self, NewReportRequestArgs, Resource, SearchArgs};
use propdash::{config, context};

#[derive(Parser, Debug)]
#[command(name = "propdash")]
#[command(about = "Offline-first sync for property record cards and peer reports")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/propdash/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Extra list query param (key=value, repeatable); cached separately
  #[arg(long = "param", global = true, value_parser = commands::parse_param)]
  params: Vec<(String, String)>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Sign in; the password is read from PROPDASH_PASSWORD
  Login {
    #[arg(short, long)]
    username: String,
  },
  /// Sign out and apply the logout cache policy
  Logout,
  /// Load a collection, from cache when fresh
  Sync {
    #[arg(short, long, value_enum, default_value_t = Resource::Properties)]
    resource: Resource,
  },
  /// Refetch a collection regardless of cache freshness
  Refresh {
    #[arg(short, long, value_enum, default_value_t = Resource::Properties)]
    resource: Resource,
  },
  /// Show session and cache state
  Status,
  /// Filter the property collection
  Search(SearchArgs),
  /// Summary statistics over the property collection
  Summary,
  /// Fetch one record by id, bypassing the cache
  Show {
    #[arg(short, long, value_enum, default_value_t = Resource::Properties)]
    resource: Resource,
    #[arg(long)]
    id: u64,
  },
  /// Create or inspect peer report requests
  #[command(subcommand)]
  ReportRequest(ReportRequestCommand),
  /// Delete every cached collection
  Clear,
}

#[derive(Subcommand, Debug)]
enum ReportRequestCommand {
  /// Request a peer comparison report for a parcel
  New(NewReportRequestArgs),
  /// Show one report request
  Show {
    #[arg(long)]
    id: u64,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing()?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let ctx = context::AppContext::new(config)?.with_extra_params(args.params.clone());

  match &args.command {
    Command::Login { username } => commands::login(&ctx, username).await,
    Command::Logout => commands::logout(&ctx).await,
    Command::Sync { resource } => commands::sync(&ctx, *resource).await,
    Command::Refresh { resource } => commands::refresh(&ctx, *resource).await,
    Command::Status => commands::status(&ctx).await,
    Command::Search(search) => commands::search(&ctx, search).await,
    Command::Summary => commands::summary(&ctx).await,
    Command::Show { resource, id } => commands::show(&ctx, *resource, *id).await,
    Command::ReportRequest(ReportRequestCommand::New(new)) => {
      commands::create_report_request(&ctx, new).await
    }
    Command::ReportRequest(ReportRequestCommand::Show { id }) => {
      commands::show(&ctx, Resource::ReportRequests, *id).await
    }
    Command::Clear => commands::clear(&ctx).await,
  }
}

/// Log to a file in the data directory so stdout stays for command output.
///
/// Verbosity comes from PROPDASH_LOG (default "info").
fn init_tracing() -> Result<WorkerGuard> {
  let log_dir = config::Config::data_dir()?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::never(&log_dir, "propdash.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env("PROPDASH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::registry()
    .with(filter)
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
