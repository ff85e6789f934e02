pub mod entities;
pub mod mongo;
pub mod writer;

pub use entities::{OUTBOX_COLLECTION, OutboxDocument};
pub use mongo::MongoOutboxLedger;
pub use writer::write_outbox_entry;
