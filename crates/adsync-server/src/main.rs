//! adsync server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`) layered with
//! `ADSYNC_*` environment variables, connects to the directory and the
//! master-record API, and serves the trigger endpoints over HTTP.
//!
//! Nested settings use a double underscore, e.g.
//! `ADSYNC_GRAPHQL__URL=http://mo/graphql`.

use std::{path::PathBuf, sync::Arc};

use adsync_core::config::Settings;
use adsync_server::{AppState, ServerConfig, graphql::GraphqlClient, ldap::LdapDirectory};
use adsync_sync::{SyncContext, configure_dataloaders};
use anyhow::Context as _;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Directory to master-record reconciliation service")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Reconcile every person once, print the number of changes and exit.
  #[arg(long)]
  trigger_all: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let sources = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("ADSYNC")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read configuration")?;

  let server_cfg: ServerConfig = sources
    .clone()
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;
  let settings: Settings = sources
    .try_deserialize()
    .context("failed to deserialise Settings")?;
  // Fail before connecting anywhere; `SyncContext::new` checks again.
  settings.validate().context("invalid settings")?;
  let settings = Arc::new(settings);

  // Connect the backends.
  let graphql = Arc::new(
    GraphqlClient::new(&settings.graphql).context("failed to build GraphQL client")?,
  );
  let directory = Arc::new(
    LdapDirectory::connect(&settings)
      .await
      .context("failed to connect to the directory")?,
  );

  let loaders = configure_dataloaders(
    &settings,
    Arc::clone(&graphql),
    Arc::clone(&directory),
    Arc::clone(&graphql),
  );
  let state = AppState {
    ctx: SyncContext::new(settings, loaders).context("invalid settings")?,
    graphql,
    directory,
  };

  // One-shot mode: reconcile everyone and exit.
  if cli.trigger_all {
    let changes = adsync_server::sync_all(&state)
      .await
      .context("reconciliation failed")?;
    println!("{changes}");
    return Ok(());
  }

  let app = adsync_server::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}
