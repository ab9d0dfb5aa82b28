//! Storage layer for enrolled fingerprint samples.
//!
//! This crate persists one record per enrolled sample in SQLite: the feature
//! template, the raw image when it could be fetched, the quality metrics and
//! the capture timestamp.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool manager with automatic migrations
//! - [`TemplateStore`] - Data access trait used by the session layer
//! - [`SqliteTemplateStore`] - SQLite implementation
//!
//! Records are identified by `USER_001`, `USER_002`, ... derived from the
//! table's AUTOINCREMENT row id, so identifiers are never reused, even after
//! [`TemplateStore::delete_all`].
//!
//! # Example
//!
//! ```no_run
//! use biokey_storage::{Database, DatabaseConfig, SqliteTemplateStore, TemplateStore};
//! use biokey_storage::models::NewSample;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(DatabaseConfig::new("biokey.db")).await?;
//! let store = SqliteTemplateStore::new(db.pool().clone());
//!
//! let sample = NewSample::new(1, vec![0x4D, 0x52], None, 78, 2)?;
//! let record_id = store.save(sample).await?;
//! println!("saved {record_id}, {} in store", store.count().await?);
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod models;
pub mod repositories;

pub use connection::{Database, DatabaseConfig};
pub use error::{StorageError, StorageResult};
pub use repositories::{SqliteTemplateStore, TemplateStore};
