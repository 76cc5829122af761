//! Similarity index.
//!
//! - [`FlatIndex`] - exact brute-force search over the driver's similarity,
//!   rebuilt from the record store on open and on `pull`

pub mod flat;

pub use flat::{FlatIndex, IndexEntry, IndexState, IndexStats, SearchHit};
