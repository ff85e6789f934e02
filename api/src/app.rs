use std::sync::Arc;

use axum::Router;
use outbox_core::{
    DispatchStats, Dispatcher, DispatcherConfig, MongoDispatcher, OutboxRepositories,
    RabbitMqPublisher, TracingObserver, create_publisher, create_repositories,
};
use tokio::{net::TcpListener, sync::watch};
use tracing::{error, info};

use crate::{
    config::Config,
    http::server::{ApiError, AppState, router},
};

/// The relay process: one dispatcher draining the outbox plus the operator
/// HTTP surface, sharing a shutdown signal.
pub struct App {
    config: Config,
    router: Router,
    repositories: OutboxRepositories,
    publisher: RabbitMqPublisher,
    dispatcher: Arc<MongoDispatcher>,
}

impl App {
    pub async fn new(config: Config) -> Result<Self, ApiError> {
        let repositories =
            create_repositories(&config.mongo.uri, &config.mongo.outbox_database).await?;
        info!(
            outbox_database = %config.mongo.outbox_database,
            "Connected to MongoDB"
        );

        let publisher = create_publisher(&config.broker.url, &config.broker.exchange).await?;

        let stats = Arc::new(DispatchStats::default());
        let dispatcher_config: DispatcherConfig = config.dispatcher.clone().into();
        let dispatcher = Arc::new(Dispatcher::new(
            repositories.outbox_ledger.clone(),
            publisher.clone(),
            TracingObserver::new(stats.clone()),
            dispatcher_config,
        ));

        let service = repositories.clone().into_service(config.topics.clone());
        let state = AppState::new(Arc::new(service), stats);

        Ok(Self {
            router: router(state),
            config,
            repositories,
            publisher,
            dispatcher,
        })
    }

    pub async fn start(self) -> Result<(), ApiError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = self.dispatcher.clone();
        let dispatcher_handle = tokio::spawn(async move { dispatcher.run(shutdown_rx).await });

        let address = format!("0.0.0.0:{}", self.config.server.api_port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| ApiError::StartupError(format!("Failed to bind to {}: {}", address, e)))?;
        info!("Listening on {}", address);

        let served = axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ApiError::StartupError(format!("Server error: {}", e)));

        info!("Stopping outbox dispatcher");
        let _ = shutdown_tx.send(true);
        if let Err(e) = dispatcher_handle.await {
            error!(error = %e, "Outbox dispatcher task panicked");
        }

        if let Err(e) = self.publisher.close().await {
            error!(error = %e, "Failed to close broker connection");
        }
        self.repositories.shutdown().await;

        served
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
