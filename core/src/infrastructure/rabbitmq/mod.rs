pub mod publisher;

pub use publisher::RabbitMqPublisher;
