//! Visual-word driver with TF-IDF weighting.
//!
//! The image is cut into a 4x4 grid. Every pixel emits the word
//! `cell * 8 + level`, where `level` is its luminance quantised to 8 steps,
//! so the vocabulary has 128 terms. The feature holds term frequencies;
//! the score is the cosine of the TF-IDF weighted vectors.
//!
//! IDF weights start uniform. `update_idf` recomputes them from every
//! stored record and, when the driver has a data directory, writes them to
//! `<data_dir>/<namespace>.idf` so later handles load them on open.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{FeatureDriver, InvokeCommand};
use crate::config::DriverConfig;
use crate::error::{Error, Result};
use crate::feature::FeatureVector;
use crate::image::{luma, Image};
use crate::similarity::cosine_similarity;
use crate::storage::RecordStore;

const TAG: &str = "idf/v1";
const GRID: usize = 4;
const LEVELS: usize = 8;
const TERMS: usize = GRID * GRID * LEVELS;

/// Document frequencies turned into IDF weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdfTable {
    /// Number of records the weights were computed from.
    pub documents: usize,
    pub weights: Vec<f32>,
}

impl IdfTable {
    fn uniform() -> Self {
        Self {
            documents: 0,
            weights: vec![1.0; TERMS],
        }
    }

    /// Smoothed IDF: `ln((1 + n) / (1 + df)) + 1`.
    fn from_frequencies(documents: usize, df: &[usize]) -> Self {
        let n = documents as f32;
        let weights = df
            .iter()
            .map(|&d| ((1.0 + n) / (1.0 + d as f32)).ln() + 1.0)
            .collect();
        Self { documents, weights }
    }

    fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .map_err(|e| Error::Configuration(format!("cannot read {}: {}", path.display(), e)))?;
        let table: IdfTable = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Configuration(format!("invalid idf table {}: {}", path.display(), e)))?;
        if table.weights.len() != TERMS {
            return Err(Error::Configuration(format!(
                "idf table {} has {} weights, expected {}",
                path.display(),
                table.weights.len(),
                TERMS
            )));
        }
        Ok(table)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let storage = |e: std::io::Error| Error::Storage(format!("{}: {}", path.display(), e));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(storage)?;
        }
        let bytes = serde_json::to_vec(self)
            .map_err(|e| Error::Storage(format!("encode idf table: {}", e)))?;
        let tmp = path.with_extension("idf.tmp");
        fs::write(&tmp, bytes).map_err(storage)?;
        fs::rename(&tmp, path).map_err(storage)
    }
}

/// Bag-of-visual-words driver.
#[derive(Debug)]
pub struct IdfDriver {
    name: String,
    /// Where `update_idf` persists the table.
    table_path: Option<PathBuf>,
    table: RwLock<Arc<IdfTable>>,
}

pub(crate) fn factory(config: &DriverConfig, namespace: &str) -> Result<Box<dyn FeatureDriver>> {
    let table_path = config
        .data_dir
        .as_ref()
        .map(|dir| dir.join(format!("{}.idf", namespace)));
    let mut driver = IdfDriver::with_table_path(table_path)?;
    driver.name = config.name.clone();
    Ok(Box::new(driver))
}

impl IdfDriver {
    /// A driver with uniform weights and no persistence.
    pub fn new() -> Self {
        Self {
            name: "idf".to_string(),
            table_path: None,
            table: RwLock::new(Arc::new(IdfTable::uniform())),
        }
    }

    /// A driver persisting its table at `path`, loading it if present.
    pub fn with_table_path(path: Option<PathBuf>) -> Result<Self> {
        let table = match path.as_deref() {
            Some(p) if p.exists() => {
                let table = IdfTable::load(p)?;
                tracing::debug!(path = %p.display(), documents = table.documents, "loaded idf table");
                table
            }
            _ => IdfTable::uniform(),
        };
        Ok(Self {
            name: "idf".to_string(),
            table_path: path,
            table: RwLock::new(Arc::new(table)),
        })
    }

    /// Current weights.
    pub fn table(&self) -> Arc<IdfTable> {
        Arc::clone(&self.table.read())
    }

    /// Recomputes IDF from `store`, returning the number of documents used.
    pub fn update_idf(&self, store: &dyn RecordStore) -> Result<usize> {
        let mut df = vec![0usize; TERMS];
        let mut documents = 0;
        let mut skipped = 0;
        for record in store.iter_all()? {
            if record.feature.tag() != TAG || record.feature.dimension() != TERMS {
                skipped += 1;
                continue;
            }
            documents += 1;
            for (count, &tf) in df.iter_mut().zip(record.feature.values()) {
                if tf > 0.0 {
                    *count += 1;
                }
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, "ignored records from another feature driver");
        }

        let table = IdfTable::from_frequencies(documents, &df);
        if let Some(path) = &self.table_path {
            table.save(path)?;
        }
        *self.table.write() = Arc::new(table);
        tracing::info!(documents, "updated idf table");
        Ok(documents)
    }

    fn weighted(values: &[f32], weights: &[f32]) -> Vec<f32> {
        values.iter().zip(weights).map(|(v, w)| v * w).collect()
    }
}

impl Default for IdfDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureDriver for IdfDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> &str {
        TAG
    }

    fn dimension(&self) -> usize {
        TERMS
    }

    fn extract(&self, image: &Image) -> Result<FeatureVector> {
        let (w, h) = (image.width(), image.height());
        let mut values = vec![0.0f32; TERMS];
        for y in 0..h {
            let row = y * GRID / h;
            for x in 0..w {
                let cell = row * GRID + x * GRID / w;
                let level = luma(image.pixel(x, y)) as usize * LEVELS / 256;
                values[cell * LEVELS + level] += 1.0;
            }
        }
        let total = (w * h) as f32;
        for v in values.iter_mut() {
            *v /= total;
        }
        Ok(FeatureVector::new(TAG, values))
    }

    fn similarity(&self, a: &FeatureVector, b: &FeatureVector) -> f32 {
        let table = self.table();
        let a = Self::weighted(a.values(), &table.weights);
        let b = Self::weighted(b.values(), &table.weights);
        cosine_similarity(&a, &b).max(0.0)
    }

    fn invoke(&self, command: InvokeCommand, _args: &Value, store: &dyn RecordStore) -> Result<Value> {
        match command {
            InvokeCommand::UpdateIdf => {
                let documents = self.update_idf(store)?;
                Ok(json!({ "documents": documents }))
            }
            other => Err(Error::UnsupportedOperation(format!(
                "{} is not supported by the {} driver",
                other, self.name
            ))),
        }
    }
}
