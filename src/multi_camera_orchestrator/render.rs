//! Frame overlays and JPEG encoding for the live feed

use crate::error::Result;
use crate::identity_gallery::GlobalId;
use crate::vision::BoundingBox;
use crate::zone_counter::ZoneCounter;
use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut,
};
use imageproc::rect::Rect;
use std::path::Path;

/// Zone outline colours, cycled by zone position
pub const ZONE_PALETTE: [Rgb<u8>; 5] = [
    Rgb([0, 255, 0]),
    Rgb([0, 0, 255]),
    Rgb([255, 0, 0]),
    Rgb([255, 255, 0]),
    Rgb([255, 0, 255]),
];

const TRACK_IN_ZONE: Rgb<u8> = Rgb([0, 255, 0]);
const TRACK_OUTSIDE: Rgb<u8> = Rgb([0, 0, 255]);
const CENTROID: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_SHADOW: Rgb<u8> = Rgb([0, 0, 0]);
const TRACK_TEXT: Rgb<u8> = Rgb([255, 255, 255]);
const CAMERA_TEXT: Rgb<u8> = Rgb([0, 255, 255]);

const ZONE_TEXT_PX: f32 = 20.0;
const TRACK_TEXT_PX: f32 = 13.0;
const CAMERA_TEXT_PX: f32 = 20.0;
const CENTROID_RADIUS: i32 = 3;
const LINE_THICKNESS: i32 = 2;

/// Track drawn on the published frame
#[derive(Debug, Clone)]
pub struct TrackOverlay {
    pub bbox: BoundingBox,
    pub centroid: (i32, i32),
    pub global_id: GlobalId,
    /// Display name of the zone holding the centroid, if any
    pub zone: Option<String>,
}

impl TrackOverlay {
    pub fn in_zone(&self) -> bool {
        self.zone.is_some()
    }
}

/// Load the label font. Labels are skipped when it cannot be read.
pub fn load_font(path: &Path) -> Option<FontVec> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Overlay font unavailable, labels disabled");
            return None;
        }
    };
    match FontVec::try_from_vec(bytes) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Overlay font invalid, labels disabled");
            None
        }
    }
}

/// `"A: 3"`
pub fn zone_label(zone_id: &str, count: usize) -> String {
    format!("{}: {}", zone_id, count)
}

/// `"ID: 7"` or `"ID: 7 | A"`; a `C{n}:` camera prefix on the zone is dropped
pub fn track_label(global_id: GlobalId, zone: Option<&str>) -> String {
    match zone {
        Some(zone) => format!("ID: {} | {}", global_id, strip_camera_prefix(zone)),
        None => format!("ID: {}", global_id),
    }
}

/// `"CAM 1"` for camera index 0
pub fn camera_label(index: usize) -> String {
    format!("CAM {}", index + 1)
}

fn strip_camera_prefix(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name).trim()
}

/// Draw zones (with counts) and tracks (with ids) onto `frame`
pub fn draw_overlays(
    frame: &mut RgbImage,
    zones: &[ZoneCounter],
    tracks: &[TrackOverlay],
    font: Option<&FontVec>,
) {
    for track in tracks {
        let color = if track.in_zone() { TRACK_IN_ZONE } else { TRACK_OUTSIDE };
        let b = &track.bbox;
        let (x, y) = (b.x1 as i32, b.y1 as i32);
        outline(frame, x, y, b.width() as u32, b.height() as u32, color);
        draw_filled_circle_mut(frame, track.centroid, CENTROID_RADIUS, CENTROID);

        if let Some(font) = font {
            let text = track_label(track.global_id, track.zone.as_deref());
            let top = y - 10 - TRACK_TEXT_PX as i32;
            draw_text_mut(frame, TRACK_TEXT, x, top, PxScale::from(TRACK_TEXT_PX), font, &text);
        }
    }

    for (i, zone) in zones.iter().enumerate() {
        let color = ZONE_PALETTE[i % ZONE_PALETTE.len()];
        let [x1, y1, x2, y2] = zone.definition().coords;
        let (w, h) = (x2.abs_diff(x1).saturating_add(1), y2.abs_diff(y1).saturating_add(1));
        outline(frame, x1.min(x2), y1.min(y2), w, h, color);

        if let Some(font) = font {
            let text = zone_label(zone.id(), zone.count());
            // Boxes touching the top edge get their label inside
            let top = if y1.saturating_sub(10) < ZONE_TEXT_PX as i32 {
                y1.saturating_add(8)
            } else {
                y1 - 10 - ZONE_TEXT_PX as i32
            };
            let scale = PxScale::from(ZONE_TEXT_PX);
            draw_text_mut(frame, TEXT_SHADOW, x1 + 1, top + 1, scale, font, &text);
            draw_text_mut(frame, color, x1, top, scale, font, &text);
        }
    }
}

/// Camera name in the top-left corner
pub fn draw_camera_label(frame: &mut RgbImage, index: usize, font: &FontVec) {
    let text = camera_label(index);
    draw_text_mut(frame, CAMERA_TEXT, 10, 12, PxScale::from(CAMERA_TEXT_PX), font, &text);
}

/// Rectangle outline `LINE_THICKNESS` pixels wide, drawn inward
fn outline(frame: &mut RgbImage, x: i32, y: i32, width: u32, height: u32, color: Rgb<u8>) {
    let (mut w, mut h) = (width.max(1), height.max(1));
    for inset in 0..LINE_THICKNESS {
        let rect = Rect::at(x + inset, y + inset).of_size(w, h);
        draw_hollow_rect_mut(frame, rect, color);
        if w <= 2 || h <= 2 {
            draw_filled_rect_mut(frame, rect, color);
            break;
        }
        w -= 2;
        h -= 2;
    }
}

/// JPEG-encode a frame
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).encode_image(frame)?;
    Ok(buf)
}
