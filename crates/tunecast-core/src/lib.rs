pub mod config;
pub mod error;
pub mod models;
pub mod storage;

pub use config::AppConfig;
pub use error::{CoreError, Result};
pub use models::*;
pub use storage::{CatalogStore, ConnectionPool, SqliteCatalogStore};
