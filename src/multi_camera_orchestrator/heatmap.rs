//! Decaying occupancy heatmap
//!
//! Every processed frame the grid decays and each track centroid adds heat at
//! its (clamped) pixel. The overlay blurs the grid, stretches it to the full
//! range, maps it through a jet palette and blends it over the frame.

use image::imageops::FilterType;
use image::{ImageBuffer, Luma, Rgb, RgbImage};

pub const HEAT_DECAY: f32 = 0.995;
pub const HEAT_PER_SIGHTING: f32 = 5.0;
pub const HEAT_MAX: f32 = 255.0;
/// Blend weight of the heat colours over the frame
pub const OVERLAY_ALPHA: f32 = 0.6;
/// Matches a 31 px Gaussian kernel
const BLUR_SIGMA: f32 = 5.0;

/// Per-camera heat grid at processing resolution
#[derive(Debug, Clone)]
pub struct HeatmapGrid {
    width: u32,
    height: u32,
    cells: Vec<f32>,
}

impl HeatmapGrid {
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        Self {
            width,
            height,
            cells: vec![0.0; width as usize * height as usize],
        }
    }

    /// Decay, then add heat at every centroid
    pub fn accumulate(&mut self, centroids: &[(i32, i32)]) {
        for cell in &mut self.cells {
            *cell *= HEAT_DECAY;
        }
        for &(x, y) in centroids {
            let x = x.clamp(0, self.width as i32 - 1) as usize;
            let y = y.clamp(0, self.height as i32 - 1) as usize;
            let cell = &mut self.cells[y * self.width as usize + x];
            *cell = (*cell + HEAT_PER_SIGHTING).min(HEAT_MAX);
        }
    }

    pub fn heat(&self, x: u32, y: u32) -> f32 {
        if x >= self.width || y >= self.height {
            return 0.0;
        }
        self.cells[(y * self.width + x) as usize]
    }

    /// Blend the heat colours over `frame`
    pub fn overlay(&self, frame: &mut RgbImage, alpha: f32) {
        let alpha = alpha.clamp(0.0, 1.0);
        let grid: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_fn(self.width, self.height, |x, y| Luma([self.heat(x, y)]));
        let blurred = imageproc::filter::gaussian_blur_f32(&grid, BLUR_SIGMA);

        let (lo, hi) = blurred
            .pixels()
            .fold((f32::MAX, f32::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
        let range = hi - lo;

        let mut colours = RgbImage::from_fn(self.width, self.height, |x, y| {
            let level = if range > f32::EPSILON {
                (blurred.get_pixel(x, y)[0] - lo) / range
            } else {
                0.0
            };
            jet(level)
        });
        if colours.dimensions() != frame.dimensions() {
            colours = image::imageops::resize(&colours, frame.width(), frame.height(), FilterType::Triangle);
        }

        for (pixel, heat) in frame.pixels_mut().zip(colours.pixels()) {
            for (c, h) in pixel.0.iter_mut().zip(heat.0) {
                *c = (f32::from(*c) * (1.0 - alpha) + f32::from(h) * alpha).round() as u8;
            }
        }
    }
}

/// Jet palette: 0 = dark blue, 0.5 = green, 1 = dark red
pub fn jet(level: f32) -> Rgb<u8> {
    let v = level.clamp(0.0, 1.0);
    let channel = |centre: f32| ((1.5 - (4.0 * v - centre).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_and_decay() {
        let mut grid = HeatmapGrid::new(10, 10);
        grid.accumulate(&[(3, 4)]);
        assert_eq!(grid.heat(3, 4), HEAT_PER_SIGHTING);

        grid.accumulate(&[]);
        assert!((grid.heat(3, 4) - HEAT_PER_SIGHTING * HEAT_DECAY).abs() < 1e-5);
        assert_eq!(grid.heat(0, 0), 0.0);
    }

    #[test]
    fn test_centroids_clamped_and_heat_saturates() {
        let mut grid = HeatmapGrid::new(10, 8);
        grid.accumulate(&[(-20, 100)]);
        assert_eq!(grid.heat(0, 7), HEAT_PER_SIGHTING);

        for _ in 0..200 {
            grid.accumulate(&[(5, 5)]);
        }
        assert_eq!(grid.heat(5, 5), HEAT_MAX);
        assert_eq!(grid.heat(50, 50), 0.0);
    }

    #[test]
    fn test_jet_palette_ends() {
        assert_eq!(jet(0.0), Rgb([0, 0, 128]));
        assert_eq!(jet(0.5), Rgb([128, 255, 128]));
        assert_eq!(jet(1.0), Rgb([128, 0, 0]));
    }

    #[test]
    fn test_overlay_marks_hot_spots() {
        let mut grid = HeatmapGrid::new(40, 40);
        for _ in 0..20 {
            grid.accumulate(&[(20, 20)]);
        }
        let mut frame = RgbImage::new(40, 40);
        grid.overlay(&mut frame, OVERLAY_ALPHA);

        let hot = frame.get_pixel(20, 20);
        let cold = frame.get_pixel(0, 0);
        assert!(hot[0] > hot[2], "hot spot should be red, got {:?}", hot);
        assert!(cold[2] > cold[0], "background should be blue, got {:?}", cold);
    }
}
