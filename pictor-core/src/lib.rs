//! # Pictor Core
//!
//! Core library for Pictor, an embedded content-based image retrieval store.
//!
//! Images go in as netpbm bytes, files or precomputed feature vectors. A
//! feature driver turns each image into a vector, a record store persists
//! it under a namespace, and an exact similarity index answers "which stored
//! images look most like this one?".
//!
//! ## Crate Features
//!
//! - `async` - Enables [`AsyncDatabase`] for tokio applications
//!
//! ## Core Types
//!
//! - [`Database`] - a handle to one namespace; the entry point
//! - [`Config`] - namespace, driver and database sections, from code or file
//!
//! ### Feature drivers
//!
//! - [`ColorDriver`] (`color`) - RGB and luminance histogram intersection
//! - [`IdfDriver`] (`idf`, `sim`) - visual words with TF-IDF cosine
//!
//! ### Record stores
//!
//! - [`SqliteStore`] (`sqlite3`) - one SQLite table per namespace
//! - [`LogStore`] (`log`) - append-only checksummed record log
//! - [`MemoryStore`] (`memory`) - no persistence
//!
//! ### Types
//!
//! - [`RecordId`] - 128-bit record id, 32 hex characters
//! - [`FeatureVector`] - tagged feature values with byte and text forms
//! - [`ImageSource`] - bytes, file path or feature vector

pub mod config;
pub mod database;
pub mod driver;
pub mod error;
pub mod feature;
pub mod id;
pub mod image;
pub mod index;
pub mod params;
pub mod similarity;
pub mod storage;

pub use config::{Config, DatabaseConfig, DriverConfig, DropPolicy};
#[cfg(feature = "async")]
pub use database::AsyncDatabase;
pub use database::{Database, SearchResult};
pub use driver::{ColorDriver, DriverRegistry, FeatureDriver, IdfDriver, InvokeCommand};
pub use error::{Error, Result};
pub use feature::FeatureVector;
pub use id::{IntoRecordId, RecordId};
pub use image::{Image, ImageSource};
pub use index::{FlatIndex, IndexStats};
pub use params::Params;
pub use storage::{
    LogStore, MemoryStore, Record, RecordStore, SqliteStore, StoreRegistry, SyncMode,
};

/// Re-export commonly used types for convenience.
///
/// # Example
///
/// ```rust
/// use pictor_core::prelude::*;
///
/// let config = Config::new(DriverConfig::new("color")).with_namespace("photos");
/// let db = Database::open(config).unwrap();
/// assert_eq!(db.namespace().unwrap(), "photos");
/// ```
pub mod prelude {
    pub use crate::{
        Config, Database, DatabaseConfig, DriverConfig, DropPolicy, Error, FeatureVector,
        ImageSource, RecordId, Result, SearchResult,
    };
}
