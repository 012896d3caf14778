//! Database layer: MongoDB connection and document schemas

pub mod mongo;
pub mod schemas;

pub use mongo::MongoClient;
