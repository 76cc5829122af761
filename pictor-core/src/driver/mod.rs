//! Feature drivers.
//!
//! A feature driver turns a decoded image into a [`FeatureVector`] and
//! scores two vectors. Higher scores mean more similar images. Built-in
//! drivers:
//!
//! - [`ColorDriver`] (`color`) - RGB and luminance histograms
//! - [`IdfDriver`] (`idf`, alias `sim`) - visual words weighted by TF-IDF
//!
//! Drivers are selected by name through a [`DriverRegistry`].

pub mod color;
pub mod idf;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::config::DriverConfig;
use crate::error::{Error, Result};
use crate::feature::FeatureVector;
use crate::image::{Image, ImageSource};
use crate::storage::RecordStore;

pub use color::ColorDriver;
pub use idf::IdfDriver;

/// Commands accepted by `Database::invoke`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeCommand {
    /// Recompute driver statistics over the stored records.
    UpdateIdf,
    /// Reclaim space in the record store.
    CompactStore,
    /// Index and store counters.
    Stats,
}

impl InvokeCommand {
    pub const ALL: [InvokeCommand; 3] = [
        InvokeCommand::UpdateIdf,
        InvokeCommand::CompactStore,
        InvokeCommand::Stats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvokeCommand::UpdateIdf => "update_idf",
            InvokeCommand::CompactStore => "compact_store",
            InvokeCommand::Stats => "stats",
        }
    }
}

impl fmt::Display for InvokeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvokeCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::UnsupportedOperation(format!("unknown command {:?}", s)))
    }
}

/// Extracts and compares image features.
pub trait FeatureDriver: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Tag stamped on every vector this driver produces.
    fn tag(&self) -> &str;

    /// Length of every vector this driver produces.
    fn dimension(&self) -> usize;

    fn extract(&self, image: &Image) -> Result<FeatureVector>;

    /// Scores two vectors carrying this driver's tag and dimension.
    ///
    /// Must be symmetric. Callers check compatibility first.
    fn similarity(&self, a: &FeatureVector, b: &FeatureVector) -> f32;

    /// Score of an image compared with itself.
    fn max_similarity(&self) -> f32 {
        1.0
    }

    /// Runs a driver-level command.
    fn invoke(&self, command: InvokeCommand, _args: &Value, _store: &dyn RecordStore) -> Result<Value> {
        Err(Error::UnsupportedOperation(format!(
            "{} is not supported by the {} driver",
            command,
            self.name()
        )))
    }
}

/// Fails unless `feature` came from `driver`.
pub fn check_feature(driver: &dyn FeatureDriver, feature: &FeatureVector) -> Result<()> {
    if feature.tag() != driver.tag() || feature.dimension() != driver.dimension() {
        return Err(Error::InvalidArgument(format!(
            "feature {} (dim {}) was not produced by the {} driver ({}, dim {})",
            feature.tag(),
            feature.dimension(),
            driver.name(),
            driver.tag(),
            driver.dimension()
        )));
    }
    Ok(())
}

/// Produces the feature vector for any image source.
pub fn feature_of(driver: &dyn FeatureDriver, source: &ImageSource) -> Result<FeatureVector> {
    let feature = match source {
        ImageSource::Bytes(bytes) => driver.extract(&Image::decode(bytes, &source.describe())?)?,
        ImageSource::File(path) => driver.extract(&Image::open(path)?)?,
        ImageSource::Feature(feature) => feature.clone(),
    };
    check_feature(driver, &feature)?;
    Ok(feature)
}

/// Scores two features after checking both belong to `driver`.
pub fn compare(driver: &dyn FeatureDriver, a: &FeatureVector, b: &FeatureVector) -> Result<f32> {
    check_feature(driver, a)?;
    check_feature(driver, b)?;
    Ok(driver.similarity(a, b))
}

/// Builds a driver for a namespace from its configuration section.
pub type DriverFactory = fn(&DriverConfig, &str) -> Result<Box<dyn FeatureDriver>>;

/// Maps driver names to factories.
///
/// # Example
///
/// ```
/// use pictor_core::driver::DriverRegistry;
///
/// let registry = DriverRegistry::builtin();
/// assert!(registry.contains("color"));
/// assert!(registry.contains("sim"));
/// ```
#[derive(Clone)]
pub struct DriverRegistry {
    factories: BTreeMap<String, DriverFactory>,
}

impl DriverRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with the built-in drivers and their aliases.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("color", color::factory);
        registry.register("idf", idf::factory);
        registry.register("sim", idf::factory);
        registry
    }

    /// Registers (or replaces) a driver factory under `name`.
    pub fn register(&mut self, name: impl Into<String>, factory: DriverFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn create(&self, config: &DriverConfig, namespace: &str) -> Result<Box<dyn FeatureDriver>> {
        let factory = self.factories.get(config.name.as_str()).ok_or_else(|| {
            Error::Configuration(format!(
                "unknown feature driver {:?} (known: {})",
                config.name,
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })?;
        factory(config, namespace)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
