//! Color histogram driver.

use super::FeatureDriver;
use crate::config::DriverConfig;
use crate::error::Result;
use crate::feature::FeatureVector;
use crate::image::{luma, Image};
use crate::similarity::{histogram_intersection, l1_normalize};

const TAG: &str = "color/v1";
/// 4 levels per channel.
const RGB_BINS: usize = 64;
const LUMA_BINS: usize = 16;
const DEFAULT_COLOR_WEIGHT: f64 = 0.5;

/// Scores images by the overlap of their RGB and luminance histograms.
///
/// The feature is a 64-bin RGB histogram (4 levels per channel) followed by
/// a 16-bin luminance histogram, each normalised to sum 1. The score is
/// `w * intersection(rgb) + (1 - w) * intersection(luma)` where `w` is the
/// `color_weight` tuning key.
///
/// # Example
///
/// ```
/// use pictor_core::driver::{ColorDriver, FeatureDriver};
/// use pictor_core::image::Image;
///
/// let driver = ColorDriver::new(0.5).unwrap();
/// let image = Image::from_pixels(2, 1, vec![[255, 0, 0], [0, 0, 255]]).unwrap();
/// let feature = driver.extract(&image).unwrap();
/// assert!((driver.similarity(&feature, &feature) - 1.0).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct ColorDriver {
    color_weight: f32,
}

pub(crate) fn factory(config: &DriverConfig, _namespace: &str) -> Result<Box<dyn FeatureDriver>> {
    let weight = config
        .params
        .f64_in_range("color_weight", 0.0..=1.0, DEFAULT_COLOR_WEIGHT)?;
    Ok(Box::new(ColorDriver::new(weight)?))
}

impl ColorDriver {
    /// Creates a driver. `color_weight` must lie in [0, 1].
    pub fn new(color_weight: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&color_weight) {
            return Err(crate::error::Error::Configuration(format!(
                "color_weight must be a number in [0, 1], got {}",
                color_weight
            )));
        }
        Ok(Self {
            color_weight: color_weight as f32,
        })
    }

    #[inline]
    pub fn color_weight(&self) -> f32 {
        self.color_weight
    }
}

impl Default for ColorDriver {
    fn default() -> Self {
        Self {
            color_weight: DEFAULT_COLOR_WEIGHT as f32,
        }
    }
}

impl FeatureDriver for ColorDriver {
    fn name(&self) -> &str {
        "color"
    }

    fn tag(&self) -> &str {
        TAG
    }

    fn dimension(&self) -> usize {
        RGB_BINS + LUMA_BINS
    }

    fn extract(&self, image: &Image) -> Result<FeatureVector> {
        let mut values = vec![0.0f32; RGB_BINS + LUMA_BINS];
        for &[r, g, b] in image.pixels() {
            let bin = ((r >> 6) as usize) * 16 + ((g >> 6) as usize) * 4 + (b >> 6) as usize;
            values[bin] += 1.0;
            values[RGB_BINS + (luma([r, g, b]) >> 4) as usize] += 1.0;
        }
        let (rgb, lum) = values.split_at_mut(RGB_BINS);
        l1_normalize(rgb);
        l1_normalize(lum);
        Ok(FeatureVector::new(TAG, values))
    }

    fn similarity(&self, a: &FeatureVector, b: &FeatureVector) -> f32 {
        let (a_rgb, a_luma) = a.values().split_at(RGB_BINS);
        let (b_rgb, b_luma) = b.values().split_at(RGB_BINS);
        let w = self.color_weight;
        let score = w * histogram_intersection(a_rgb, b_rgb)
            + (1.0 - w) * histogram_intersection(a_luma, b_luma);
        score.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn image(f: impl Fn(usize, usize) -> [u8; 3]) -> Image {
        let pixels = (0..64).map(|i| f(i % 8, i / 8)).collect();
        Image::from_pixels(8, 8, pixels).unwrap()
    }

    #[test]
    fn test_histograms_normalised() {
        let driver = ColorDriver::default();
        let f = driver.extract(&image(|x, _| [x as u8 * 30, 0, 200])).unwrap();
        assert_eq!(f.dimension(), 80);
        let rgb: f32 = f.values()[..RGB_BINS].iter().sum();
        let lum: f32 = f.values()[RGB_BINS..].iter().sum();
        assert!((rgb - 1.0).abs() < 1e-5);
        assert!((lum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_self_similarity_is_max() {
        let driver = ColorDriver::default();
        let f = driver.extract(&image(|x, y| [x as u8 * 20, y as u8 * 20, 90])).unwrap();
        assert!((driver.similarity(&f, &f) - driver.max_similarity()).abs() < 1e-5);
    }

    #[test]
    fn test_symmetric_and_bounded() {
        let driver = ColorDriver::new(0.3).unwrap();
        let a = driver.extract(&image(|x, _| [x as u8 * 30, 10, 10])).unwrap();
        let b = driver.extract(&image(|_, y| [10, y as u8 * 30, 200])).unwrap();
        let ab = driver.similarity(&a, &b);
        assert_eq!(ab, driver.similarity(&b, &a));
        assert!((0.0..=1.0).contains(&ab));
        assert!(ab < 1.0);
    }

    #[test]
    fn test_weight_shifts_score() {
        // Same luminance, different hue: only the RGB part disagrees.
        let red = image(|_, _| [200, 0, 0]);
        let other = image(|_, _| [0, 102, 0]);
        let rgb_only = ColorDriver::new(1.0).unwrap();
        let luma_only = ColorDriver::new(0.0).unwrap();
        let (a, b) = (rgb_only.extract(&red).unwrap(), rgb_only.extract(&other).unwrap());
        assert_eq!(rgb_only.similarity(&a, &b), 0.0);
        assert!((luma_only.similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_weight_out_of_range() {
        assert!(matches!(ColorDriver::new(1.5), Err(Error::Configuration(_))));
        let config = DriverConfig::new("color").with_param("color_weight", "-0.1");
        assert!(matches!(factory(&config, "ns"), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_weight_from_string_param() {
        let config = DriverConfig::new("color").with_param("color_weight", "0.2");
        let driver = factory(&config, "ns").unwrap();
        assert_eq!(driver.name(), "color");
    }
}
