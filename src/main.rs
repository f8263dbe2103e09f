mod cache;
mod config;
mod fetch;
mod http;
mod logging;
mod proxy;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::cache::SqliteStore;
use crate::fetch::HttpFetcher;
use crate::http::RequestMode;
use crate::proxy::CacheProxy;

#[derive(Parser, Debug)]
#[command(name = "swrproxy")]
#[command(about = "Offline-first caching fetch gateway")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/swrproxy/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the manifest into the configured generation
  Install,
  /// Delete every generation except the configured one
  Activate,
  /// Resolve a path through the cache and write the body to stdout
  Get {
    /// Path resolved against the configured origin
    path: String,

    /// Treat the request as a full page load (eligible for the offline
    /// fallback document)
    #[arg(long)]
    navigate: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.log_file.as_deref())?;

  let config = config::Config::load(args.config.as_deref())?;

  let store = Arc::new(match &config.cache.db_path {
    Some(path) => SqliteStore::open_at(path)?,
    None => SqliteStore::open()?,
  });
  let fetcher = Arc::new(HttpFetcher::new()?);
  let proxy = CacheProxy::new(store, fetcher, &config)?;

  match args.command {
    Command::Install => proxy.install().await?,
    Command::Activate => proxy.activate().await?,
    Command::Get { path, navigate } => {
      let mode = if navigate {
        RequestMode::Navigation
      } else {
        RequestMode::Resource
      };

      let request = proxy.request_for(&path, mode)?;
      let response = proxy.respond(request).await?;

      info!(
        status = response.status,
        bytes = response.body.len(),
        content_type = response.header("content-type").unwrap_or("-"),
        generation = proxy.generation(),
        "resolved {}", path
      );
      std::io::stdout().write_all(&response.body)?;
    }
  }

  Ok(())
}
