use api::app::App;
use api::config::{Config, Environment};
use api::http::server::ApiError;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(environment: Environment) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(environment.default_log_filter()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if environment.json_logs() {
        subscriber.json().init();
    } else {
        subscriber.pretty().init();
    }
}

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // Variables already set in the process win over .env.
    let dotenv = dotenvy::dotenv();

    let mut config = Config::parse();
    init_tracing(config.environment);
    match dotenv {
        Ok(path) => debug!(path = %path.display(), "Read .env"),
        Err(_) => debug!("No .env, configuration comes from the process environment"),
    }

    config
        .load_topics()
        .map_err(|e| ApiError::StartupError(format!("Failed to load topic routing: {}", e)))?;
    info!(
        environment = ?config.environment,
        exchange = %config.broker.exchange,
        outbox_database = %config.mongo.outbox_database,
        "Outbox relay configured"
    );

    App::new(config).await?.start().await
}
