use mongodb::{Client, bson::doc};

use crate::{
    domain::{
        catalog::entities::TopicRouting,
        common::{CoreError, services::Service},
        outbox::{dispatcher::Dispatcher, observer::TracingObserver},
    },
    infrastructure::{
        catalog::MongoRecordStore, outbox::MongoOutboxLedger, rabbitmq::RabbitMqPublisher,
    },
};

/// Concrete service type backed by MongoDB.
pub type OutboxService = Service<MongoRecordStore, MongoOutboxLedger>;

/// Concrete dispatcher publishing the MongoDB ledger to RabbitMQ.
pub type MongoDispatcher = Dispatcher<MongoOutboxLedger, RabbitMqPublisher, TracingObserver>;

#[derive(Clone)]
pub struct OutboxRepositories {
    client: Client,
    pub record_store: MongoRecordStore,
    pub outbox_ledger: MongoOutboxLedger,
}

/// Connects to MongoDB, checks the server answers and prepares the outbox
/// collection in `outbox_database`.
pub async fn create_repositories(
    mongo_uri: &str,
    outbox_database: &str,
) -> Result<OutboxRepositories, CoreError> {
    let client = Client::with_uri_str(mongo_uri)
        .await
        .map_err(|e| CoreError::ServiceUnavailable(e.to_string()))?;

    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await
        .map_err(|e| CoreError::ServiceUnavailable(format!("MongoDB ping failed: {}", e)))?;

    let outbox_ledger = MongoOutboxLedger::new(&client.database(outbox_database));
    outbox_ledger.ensure_indexes().await?;
    let record_store = MongoRecordStore::new(client.clone(), outbox_database);

    Ok(OutboxRepositories {
        client,
        record_store,
        outbox_ledger,
    })
}

/// Connects to the broker and declares the exchange events are routed through.
pub async fn create_publisher(
    amqp_url: &str,
    exchange: &str,
) -> Result<RabbitMqPublisher, CoreError> {
    let publisher = RabbitMqPublisher::new(amqp_url.to_string(), exchange.to_string());
    publisher.connect().await?;
    publisher.declare_exchange().await?;
    Ok(publisher)
}

impl OutboxRepositories {
    pub fn into_service(self, topics: TopicRouting) -> OutboxService {
        Service::new(self.record_store, self.outbox_ledger, topics)
    }

    pub async fn shutdown(&self) {
        self.client.clone().shutdown().await;
    }
}
