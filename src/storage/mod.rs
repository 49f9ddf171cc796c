//! User record storage.
//!
//! `UserStore` is the single-document CRUD seam. Handlers and the
//! aggregation layer only see the trait; the backend is picked at startup.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;
use tracing::info;

pub mod memory;
mod record;

#[cfg(feature = "mongodb")]
pub mod mongodb;

pub use memory::MemoryUserStore;
pub use record::{validate_id, UserRecord};

#[cfg(feature = "mongodb")]
pub use self::mongodb::MongoUserStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid user id '{0}': expected 24 hex characters")]
    InvalidId(String),

    #[error("Could not decode stored user: {0}")]
    Decode(String),

    #[error("Database error: {0}")]
    Database(String),

    #[cfg(feature = "mongodb")]
    #[error("MongoDB error: {0}")]
    Mongo(#[from] ::mongodb::error::Error),
}

impl From<StorageError> for tonic::Status {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidId(_) => tonic::Status::invalid_argument(err.to_string()),
            _ => tonic::Status::internal(err.to_string()),
        }
    }
}

/// Single-document operations against the user collection.
///
/// Implementations:
/// - `MongoUserStore`: MongoDB collection
/// - `MemoryUserStore`: in-process map for local runs and tests
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user. Returns the generated id.
    async fn insert_one(&self, user: UserRecord) -> Result<String>;

    /// Fetch a user by id.
    async fn find_one(&self, id: &str) -> Result<Option<UserRecord>>;

    /// Overwrite every mutable field of the user with `id`.
    ///
    /// Returns the updated document, or `None` when no user has that id.
    async fn find_one_and_update(&self, id: &str, user: UserRecord) -> Result<Option<UserRecord>>;

    /// Delete the user with `id`. Returns the number of removed documents.
    async fn delete_one(&self, id: &str) -> Result<u64>;

    /// Stream every stored user.
    async fn find_all(&self) -> Result<BoxStream<'static, Result<UserRecord>>>;
}

/// Storage type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Mongodb,
    Memory,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// Connection string.
    pub uri: String,
    pub database: String,
    pub collection: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Mongodb,
            uri: "mongodb://localhost:27017".to_string(),
            database: "UserService".to_string(),
            collection: "Users".to_string(),
        }
    }
}

/// Initialize storage based on configuration.
pub async fn init_storage(
    config: &StorageConfig,
) -> std::result::Result<Arc<dyn UserStore>, Box<dyn std::error::Error + Send + Sync>> {
    match config.storage_type {
        StorageType::Mongodb => {
            #[cfg(feature = "mongodb")]
            {
                info!(
                    database = %config.database,
                    collection = %config.collection,
                    "Storage: mongodb"
                );
                let client = ::mongodb::Client::with_uri_str(&config.uri).await?;
                let store = MongoUserStore::new(&client, &config.database, &config.collection);
                store.ping().await?;
                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "mongodb"))]
            {
                tracing::error!("MongoDB storage requested but 'mongodb' feature is not enabled");
                Err("MongoDB feature not enabled".into())
            }
        }
        StorageType::Memory => {
            info!("Storage: memory");
            Ok(Arc::new(MemoryUserStore::new()))
        }
    }
}
