//! Vision boundary - camera feeds, tracker and appearance embeddings
//!
//! ## Responsibilities
//!
//! - Traits for the external collaborators driven by the orchestrator
//!   (frame source, detector+tracker, embedding extractor)
//! - Track observation / bounding box types shared by the pipeline
//! - Crop and vector helpers used by identity matching

mod types;

pub use types::*;

use image::RgbImage;

/// Camera feed (webcam, RTSP, looped file, recording)
pub trait FrameSource: Send {
    /// Open (or reopen after `release`) the underlying handle
    fn open(&mut self) -> std::result::Result<SourceInfo, SourceError>;

    /// Read the next frame
    fn read(&mut self) -> std::result::Result<RgbImage, SourceError>;

    /// Restart a looped source from the beginning.
    /// Returns false when the source cannot seek (live cameras).
    fn rewind(&mut self) -> bool;

    /// Release the camera handle
    fn release(&mut self);

    /// Human readable source description (path, url, device index)
    fn describe(&self) -> String;
}

/// Person detector + multi-object tracker
pub trait PersonTracker: Send {
    /// Run detection on a frame and advance the tracks
    fn update(&mut self, frame: &RgbImage) -> crate::Result<Vec<TrackObservation>>;
}

/// Appearance embedding network
pub trait EmbeddingExtractor: Send {
    /// Extract an embedding from a person crop. `None` on failure.
    fn extract(&self, crop: &RgbImage) -> Option<Vec<f32>>;
}

/// Crop a bounding box out of a frame, clamped to the frame bounds.
///
/// Returns `None` when the clamped box is empty.
pub fn crop(frame: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (width, height) = frame.dimensions();
    let x1 = bbox.x1.max(0.0).min(width as f32) as u32;
    let y1 = bbox.y1.max(0.0).min(height as f32) as u32;
    let x2 = bbox.x2.max(0.0).min(width as f32) as u32;
    let y2 = bbox.y2.max(0.0).min(height as f32) as u32;

    let w = x2.saturating_sub(x1);
    let h = y2.saturating_sub(y1);
    if w == 0 || h == 0 {
        return None;
    }

    Some(image::imageops::crop_imm(frame, x1, y1, w, h).to_image())
}

/// L2-normalize a vector. `None` for empty or all-zero input.
pub fn l2_normalize(mut v: Vec<f32>) -> Option<Vec<f32>> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if v.is_empty() || norm <= 0.0 || !norm.is_finite() {
        return None;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    Some(v)
}

/// Cosine similarity = dot(a,b) / (|a| * |b|).
///
/// Mismatched lengths, empty or zero vectors score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

/// Element-wise mean of equally sized vectors
pub fn mean_vector(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dim = first.len();
    if vectors.iter().any(|v| v.len() != dim) {
        return None;
    }
    let mut acc = vec![0.0f32; dim];
    for v in vectors {
        for (a, x) in acc.iter_mut().zip(v.iter()) {
            *a += x;
        }
    }
    let n = vectors.len() as f32;
    acc.iter_mut().for_each(|a| *a /= n);
    Some(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_basic() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert!(l2_normalize(vec![0.0, 0.0]).is_none());
        assert!(l2_normalize(Vec::new()).is_none());
    }

    #[test]
    fn test_mean_vector() {
        let mean = mean_vector(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert_eq!(mean, vec![0.5, 0.5]);
        assert!(mean_vector(&[vec![1.0], vec![1.0, 2.0]]).is_none());
        assert!(mean_vector(&[]).is_none());
    }

    #[test]
    fn test_crop_clamps_to_frame() {
        let frame = RgbImage::new(100, 50);
        let bbox = BoundingBox::new(-10.0, 10.0, 60.0, 80.0);
        let cropped = crop(&frame, &bbox).unwrap();
        assert_eq!(cropped.dimensions(), (60, 40));

        let outside = BoundingBox::new(120.0, 10.0, 130.0, 20.0);
        assert!(crop(&frame, &outside).is_none());
    }
}
