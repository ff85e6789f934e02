pub mod application;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use application::{
    MongoDispatcher, OutboxRepositories, OutboxService, create_publisher, create_repositories,
};
pub use domain::common::services::Service;
pub use domain::outbox::dispatcher::{DeliveryOutcome, Dispatcher, DispatcherConfig};
pub use domain::outbox::observer::{DispatchStats, TracingObserver};
pub use domain::outbox::policy::RetryPolicy;
pub use infrastructure::catalog::MongoRecordStore;
pub use infrastructure::outbox::MongoOutboxLedger;
pub use infrastructure::rabbitmq::RabbitMqPublisher;

// Re-export outbox pattern primitives
pub use infrastructure::outbox::write_outbox_entry;
