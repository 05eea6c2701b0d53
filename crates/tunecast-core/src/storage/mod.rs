pub mod catalog_store;
pub mod database;

pub use catalog_store::{CatalogStore, SqliteCatalogStore};
pub use database::{ConnectionPool, open_database, open_in_memory};
