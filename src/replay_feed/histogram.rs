//! Colour-histogram appearance embedding

use crate::vision::{l2_normalize, EmbeddingExtractor};
use image::RgbImage;

const BINS_PER_CHANNEL: usize = 4;
const SHIFT: u8 = 6;

/// Joint RGB histogram (4 bins per channel, 64 dims), L2-normalised.
///
/// Stands in for a re-identification network: crops of the same colour
/// match, different colours score near zero.
#[derive(Debug, Clone, Default)]
pub struct ColorHistogramExtractor;

impl ColorHistogramExtractor {
    pub const DIMENSIONS: usize = BINS_PER_CHANNEL * BINS_PER_CHANNEL * BINS_PER_CHANNEL;

    pub fn new() -> Self {
        Self
    }
}

impl EmbeddingExtractor for ColorHistogramExtractor {
    fn extract(&self, crop: &RgbImage) -> Option<Vec<f32>> {
        if crop.width() == 0 || crop.height() == 0 {
            return None;
        }

        let mut histogram = vec![0.0f32; Self::DIMENSIONS];
        for pixel in crop.pixels() {
            let [r, g, b] = pixel.0;
            let bin = ((r >> SHIFT) as usize * BINS_PER_CHANNEL + (g >> SHIFT) as usize)
                * BINS_PER_CHANNEL
                + (b >> SHIFT) as usize;
            histogram[bin] += 1.0;
        }
        l2_normalize(histogram)
    }
}
