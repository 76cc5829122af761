//! # Pictor
//!
//! **An embedded content-based image retrieval store.**
//!
//! Pictor indexes images by what they look like and answers "which stored
//! images are most similar to this one?" in-process, with no server.
//!
//! ## Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | **Feature drivers** | `color` histograms and `idf` visual words, or your own |
//! | **Record stores** | SQLite, an append-only record log, or memory only |
//! | **Exact search** | Brute-force scan, ties broken by insertion order |
//! | **Namespaces** | Independent collections sharing one store |
//! | **Async API** | Tokio wrapper (feature flag) |
//!
//! ## Quick Start
//!
//! ```rust
//! use pictor::image::encode_ppm;
//! use pictor::prelude::*;
//!
//! // No database section: pure in-memory similarity.
//! let db = Database::open(Config::new(DriverConfig::new("color"))).unwrap();
//!
//! let sunset = encode_ppm(2, 2, &[[250, 120, 30]; 4]);
//! let sea = encode_ppm(2, 2, &[[20, 60, 200]; 4]);
//! let id = db.insert_with_label(sunset.clone(), "sunset").unwrap();
//! db.insert_with_label(sea, "sea").unwrap();
//!
//! let results = db.search(2, sunset).unwrap();
//! assert_eq!(results[0].id, id);
//! assert_eq!(results[0].source_ref.as_deref(), Some("sunset"));
//! ```
//!
//! ### Persistent Store
//!
//! ```no_run
//! use pictor::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let config = Config::new(DriverConfig::new("color").with_param("color_weight", 0.2))
//!         .with_namespace("photos")
//!         .with_database(DatabaseConfig::new("sqlite3").with_path("./photos.sqlite3"));
//!     let db = Database::open(config)?;
//!
//!     let id = db.insert("./photos/cat.ppm")?;
//!     for hit in db.search(5, "./photos/kitten.ppm")? {
//!         println!("{} {:.3} {:?}", hit.rank, hit.similarity, hit.source_ref);
//!     }
//!     db.remove(id)?;
//!     db.close()
//! }
//! ```
//!
//! ### Configuration Files
//!
//! ```toml
//! namespace = "photos"
//!
//! [driver]
//! name = "idf"
//! data_dir = "./data"
//!
//! [database]
//! driver = "log"
//! path = "./data/records"
//! sync = "batched"
//! drop_policy = "strict"
//! ```
//!
//! Load it with [`Database::open_file`].
//!
//! ### Maintenance Commands
//!
//! ```rust
//! use pictor::prelude::*;
//! use pictor::json;
//!
//! let db = Database::open(Config::new(DriverConfig::new("idf"))).unwrap();
//! let stats = db.invoke("update_idf", json!({})).unwrap();
//! assert_eq!(stats["documents"], 0);
//! ```
//!
//! ## Crate Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `async` | Enables `AsyncDatabase` for tokio compatibility |
//!
//! ## Architecture
//!
//! Pictor is organized into two crates:
//!
//! - **`pictor-core`** - Core library with no async runtime dependency
//! - **`pictor`** - Main crate that re-exports everything
//!
//! ## Thread Safety
//!
//! - [`Database`] is `Send + Sync`; searches may run concurrently with each
//!   other and with `pull`
//! - Callers serialise `insert`, `remove` and `pull` on one handle
//! - `AsyncDatabase` is `Clone` and safe to share across tasks

// Re-export everything from core
pub use pictor_core::*;

/// JSON values for `invoke` arguments and results.
pub use serde_json::{json, Value};
