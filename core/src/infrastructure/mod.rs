pub mod catalog;
pub mod outbox;
pub mod rabbitmq;

pub use catalog::MongoRecordStore;
pub use outbox::{MongoOutboxLedger, write_outbox_entry};
pub use rabbitmq::RabbitMqPublisher;
