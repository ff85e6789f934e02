pub mod health;
pub mod outbox;
pub mod server;
