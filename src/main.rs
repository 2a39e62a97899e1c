mod app;
mod cache;
mod config;
mod db;
mod event;
mod fetch;
mod host;
mod lifetime;
mod logging;
mod net;
mod notify;
mod queue;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::net::HttpNetwork;

#[derive(Parser, Debug)]
#[command(name = "feedme-offline")]
#[command(about = "Offline resilience engine: cache fallback, pending action replay and push notifications")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/feedme-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Application origin, overriding the config file
  #[arg(short, long)]
  origin: Option<String>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Command {
  /// Install, activate, then process host events from stdin (default)
  #[default]
  Run,
  /// Print queued pending actions as JSON lines
  Pending,
  /// Replay pending actions once against the network
  Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    config::Config { origin, ..config }
  } else {
    config
  };

  let _log_guard = logging::init(&config::data_dir()?.join("logs"))?;

  let db = db::Database::open(&config.database_path()?)?;
  let network = Arc::new(HttpNetwork::new(
    config.origin_url()?,
    config.network_timeout(),
  )?);

  match args.command.unwrap_or_default() {
    Command::Run => {
      let (tx, rx) = mpsc::unbounded_channel();
      let writer = app::spawn_writer(rx);

      let host = Arc::new(host::StdioHost::new(tx.clone()));
      let wait_until = lifetime::WaitUntil::new();
      let worker = worker::Worker::new(config, db, network, host.clone(), wait_until.clone())?;

      let mut app = app::App::new(Arc::new(worker), host, wait_until, tx);
      let started = app.start().await;
      if started.is_ok() {
        app.run(event::EventHandler::stdin()).await?;
      } else {
        drop(app);
      }

      // All senders are gone once the app is dropped
      writer.await?;
      started?;
    }
    Command::Pending => {
      let queue = queue::PendingActionQueue::new(db);
      for action in queue.list()? {
        println!("{}", serde_json::to_string(&action)?);
      }
    }
    Command::Sync => {
      let replayer = queue::SyncReplayer::new(network, queue::PendingActionQueue::new(db));
      let report = replayer.replay().await?;
      println!("{}", serde_json::to_string(&report)?);
    }
  }

  Ok(())
}
