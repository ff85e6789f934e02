pub mod repositories;

pub use repositories::mongo::MongoRecordStore;
