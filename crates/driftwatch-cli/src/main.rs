//! driftwatch server and operations binary.
//!
//! Reads `config.toml` (or the path specified with `--config`), opens the
//! SQLite store, and runs one of: the read API (`serve`), the scheduled
//! sweep (`sweep`), the checkpoint sweep (`checkpoints`), or a simulated
//! deploy event (`deploy`). `add-account` and `add-page` are the minimal
//! operational surface for seeding what the dashboard would normally
//! create.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use driftwatch_core::{
  external::MetricsProvider,
  metric::{MetricDelta, MetricWindow},
  page::{NewAccount, NewPage, Page, ScanCadence},
  store::ChangeStore,
  tier::Tier,
};
use driftwatch_pipeline::{
  Steps,
  checkpoints::{AssessEnv, run_checkpoint_sweep},
  deploy::{DeployEvent, handle_deploy},
  notify::LogNotifier,
  scan::ScanEnv,
  scheduled::run_scheduled_sweep,
};
use driftwatch_remote::{
  ModelClient, ModelConfig,
  capture::HttpCapture,
  metrics::{HttpMetrics, NoMetrics},
};
use driftwatch_store_sqlite::SqliteStore;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Runtime configuration, deserialised from `config.toml` with a
/// `DRIFTWATCH_*` environment overlay.
#[derive(Deserialize, Clone)]
struct ServerConfig {
  host:        String,
  port:        u16,
  store_path:  PathBuf,
  capture_dir: PathBuf,
  /// Base URL of the screenshot-capture service.
  capture_url: String,
  /// Base URL of the metrics aggregator; omit when no sources are
  /// connected.
  metrics_url: Option<String>,
  model:       ModelConfig,
}

// ─── CLI ─────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Driftwatch page monitor")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the read-only JSON API.
  Serve,
  /// Run the scheduled scan sweep once.
  Sweep,
  /// Run the checkpoint assessment sweep once.
  Checkpoints,
  /// Simulate a push event for an account.
  Deploy {
    #[arg(long)]
    account: Uuid,
    /// Changed file paths; repeatable. Empty means "scan everything".
    #[arg(long = "file")]
    files:   Vec<String>,
  },
  /// Create an account.
  AddAccount {
    #[arg(long)]
    email: String,
    #[arg(long, value_parser = parse_tier, default_value = "free")]
    tier:  Tier,
  },
  /// Start tracking a page for an account.
  AddPage {
    #[arg(long)]
    account: Uuid,
    #[arg(long)]
    url:     String,
    #[arg(long, value_parser = parse_cadence, default_value = "daily")]
    cadence: ScanCadence,
    #[arg(long)]
    mobile:  bool,
  },
}

fn parse_tier(s: &str) -> Result<Tier, String> {
  Tier::from_discriminant(s).map_err(|e| e.to_string())
}

fn parse_cadence(s: &str) -> Result<ScanCadence, String> {
  match s {
    "daily" => Ok(ScanCadence::Daily),
    "weekly" => Ok(ScanCadence::Weekly),
    other => Err(format!("unknown cadence {other:?}")),
  }
}

// ─── Metrics wiring ──────────────────────────────────────────────────────────

/// Configured metrics provider: the aggregator when a URL is set, otherwise
/// the empty provider.
#[derive(Clone)]
enum Metrics {
  Http(HttpMetrics),
  None(NoMetrics),
}

impl MetricsProvider for Metrics {
  type Error = driftwatch_remote::Error;

  async fn deltas(
    &self,
    page: &Page,
    window: MetricWindow,
  ) -> Result<Vec<MetricDelta>, Self::Error> {
    match self {
      Self::Http(m) => m.deltas(page, window).await,
      // The empty provider cannot fail.
      Self::None(m) => Ok(m.deltas(page, window).await.unwrap_or_default()),
    }
  }
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("DRIFTWATCH").separator("__"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command {
    Command::Serve => serve(store, &server_cfg).await,
    Command::Sweep => {
      let env = scan_env(store, &server_cfg)?;
      let report = run_scheduled_sweep(&env, Utc::now()).await?;
      println!(
        "scanned {} page(s), {} with changes, {} error(s)",
        report.scanned,
        report.changed,
        report.errors.len()
      );
      Ok(())
    }
    Command::Checkpoints => {
      let env = AssessEnv {
        store,
        metrics: metrics_provider(&server_cfg)?,
        assessor: model_client(&server_cfg)?,
      };
      let report = run_checkpoint_sweep(&env, Utc::now()).await?;
      println!(
        "considered {} change(s), wrote {} checkpoint(s), {} error(s)",
        report.changes_considered,
        report.checkpoints_written,
        report.errors.len()
      );
      Ok(())
    }
    Command::Deploy { account, files } => {
      let env = scan_env(store, &server_cfg)?;
      let event = DeployEvent {
        account_id:    account,
        changed_files: files,
        pushed_at:     Utc::now(),
      };
      let mut steps = Steps::new();
      let report = handle_deploy(&env, &mut steps, &event, Utc::now()).await?;
      println!(
        "scanned {} page(s), {} with changes, {} error(s)",
        report.scanned,
        report.changed,
        report.errors.len()
      );
      Ok(())
    }
    Command::AddAccount { email, tier } => {
      let account = store.add_account(NewAccount { email, tier }).await?;
      println!("{}", account.account_id);
      Ok(())
    }
    Command::AddPage { account, url, cadence, mobile } => {
      let mut new_page = NewPage::new(account, url);
      new_page.cadence = cadence;
      new_page.mobile_enabled = mobile;
      let page = store.add_page(new_page).await?;
      println!("{}", page.page_id);
      Ok(())
    }
  }
}

async fn serve(store: SqliteStore, cfg: &ServerConfig) -> anyhow::Result<()> {
  let app = axum::Router::new()
    .nest("/api", driftwatch_api::api_router(Arc::new(store)))
    .layer(tower_http::trace::TraceLayer::new_for_http());
  let address = format!("{}:{}", cfg.host, cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;
  Ok(())
}

fn model_client(cfg: &ServerConfig) -> anyhow::Result<ModelClient> {
  ModelClient::new(cfg.model.clone()).context("failed to build model client")
}

fn metrics_provider(cfg: &ServerConfig) -> anyhow::Result<Metrics> {
  Ok(match &cfg.metrics_url {
    Some(url) => Metrics::Http(
      HttpMetrics::new(url.clone()).context("failed to build metrics client")?,
    ),
    None => Metrics::None(NoMetrics),
  })
}

fn scan_env(
  store: SqliteStore,
  cfg: &ServerConfig,
) -> anyhow::Result<ScanEnv<SqliteStore, HttpCapture, ModelClient, ModelClient, LogNotifier>> {
  let model = model_client(cfg)?;
  Ok(ScanEnv {
    store,
    capture: HttpCapture::new(cfg.capture_url.clone())
      .context("failed to build capture client")?,
    detector: model.clone(),
    reconciler: model,
    notifier: LogNotifier,
    capture_dir: expand_tilde(&cfg.capture_dir),
  })
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
