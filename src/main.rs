mod cache;
mod clock;
mod config;
mod db;
mod entities;
mod error;
mod net;
mod queue;
mod service;
mod session;
mod store;
mod sync;
mod view;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::db::Database;
use crate::net::HttpTransport;
use crate::service::DataService;
use crate::session::LocalSession;
use crate::sync::{ConnectivityWatcher, SyncEngine};

#[derive(Parser, Debug)]
#[command(name = "khata")]
#[command(about = "Offline-first bookkeeping engine for small retail shops")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/khata/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Override the data directory (database and logs)
  #[arg(long)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run the background sync worker (default)
  Run,
  /// Replay pending mutations once and exit
  Sync,
  /// Show the active identity and pending queue depth
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;

  let db_path = match args.data_dir.or_else(|| config.data_dir.clone()) {
    Some(dir) => dir.join("khata.db"),
    None => Database::default_path()?,
  };

  let log_dir = db_path
    .parent()
    .map(|p| p.join("logs"))
    .unwrap_or_else(|| PathBuf::from("logs"));
  let _log_guard = init_tracing(&log_dir);

  let db = Database::open_at(&db_path)?;
  let clock = clock::system_clock();
  let ids = clock::uuid_gen();
  let transport = Arc::new(HttpTransport::new(config.net_timeout())?);
  let session = Arc::new(LocalSession::new(
    db.clone(),
    Arc::clone(&clock),
    Arc::clone(&ids),
  ));
  let service = DataService::new(
    config.service_config(),
    Arc::clone(&transport),
    db,
    session,
    clock,
    ids,
  )?;

  match args.command.unwrap_or(Command::Run) {
    Command::Status => {
      match service.current_user()? {
        Some(identity) => {
          println!("user: {} ({})", identity.name, identity.user_id);
          println!("verified: {}", identity.verified);
          println!("pending writes: {}", service.pending_count()?);
        }
        None => println!("no active identity"),
      }
    }
    Command::Sync => {
      if service.current_user()?.is_none() {
        println!("no active identity, nothing to sync");
        return Ok(());
      }
      let report = service.drain_pending().await?;
      println!(
        "replayed {}, rejected {}, remaining {}",
        report.replayed, report.rejected, report.remaining
      );
    }
    Command::Run => {
      let watcher = ConnectivityWatcher::spawn(
        transport,
        config.backend.url.clone(),
        config.probe_interval(),
        config.refresh_interval(),
      );
      SyncEngine::new(service).run(watcher).await;
    }
  }

  Ok(())
}

fn init_tracing(log_dir: &std::path::Path) -> tracing_appender::non_blocking::WorkerGuard {
  let appender = tracing_appender::rolling::daily(log_dir, "khata.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .init();

  guard
}
