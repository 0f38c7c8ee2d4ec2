use clap::Parser;
use color_eyre::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fallcache::app::App;
use fallcache::commands::Args;
use fallcache::config::{Config, APP_NAME};

/// Log to a file in the data directory so stdout stays clean for output.
/// Use RUST_LOG to change the level (e.g. RUST_LOG=fallcache=debug).
fn init_tracing() -> Result<WorkerGuard> {
  let log_dir = Config::data_dir()?;
  std::fs::create_dir_all(&log_dir)?;

  let appender = tracing_appender::rolling::never(&log_dir, format!("{}.log", APP_NAME));
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(filter)
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Held until exit so buffered log lines get flushed
  let _guard = init_tracing()?;
  info!(command = ?args.command, "fallcache starting");

  let config = Config::load(args.config.as_deref())?;

  let app = App::new(config)?;
  app.run(args.command).await?;

  Ok(())
}
