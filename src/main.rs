use deskbot::api::{self, ApiState};
use deskbot::config::Config;
use deskbot::db::Db;
use deskbot::outbox::{spawn_dispatcher, HttpTransport};

use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = parse_config_arg();
    init_tracing();

    let config = Config::load(config_path.as_deref())?;
    let db = Db::connect(&config.database_path).await?;
    tracing::info!(path = %config.database_path.display(), "database ready");

    let dispatcher = spawn_dispatcher(
        db.pool.clone(),
        config.outbox.clone(),
        HttpTransport::default(),
    );

    let state = Arc::new(ApiState::new(config, db.pool.clone()));
    api::serve(state).await?;

    dispatcher.abort();
    db.close().await;
    Ok(())
}

/// `deskbot [--config path]`
fn parse_config_arg() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}
