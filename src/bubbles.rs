use std::collections::BTreeMap;

use image::GrayImage;

use crate::image_utils::sample_luma;
use crate::metadata::BubbleRect;
use crate::transform::Transform;

/// contest id -> selection id -> marked
pub type MarkedMap = BTreeMap<String, BTreeMap<String, bool>>;

/// Dark-sample tally for one bubble region.
#[derive(Debug, Clone, Copy)]
pub struct BubbleMeasurement {
    pub dark_count: u32,
    pub pixel_count: u32,
}

impl BubbleMeasurement {
    /// A bubble counts as marked when more than 70% of its samples are dark.
    pub fn is_marked(&self) -> bool {
        self.dark_count > self.pixel_count * 7 / 10
    }
}

/// Samples a sparse grid inside one bubble: three rows around the vertical
/// center, columns striding the middle 80% of the width. Each grid point maps
/// to sub-pixel original coordinates at the 4x supersample rate, through the
/// transform into the scan, and is Catmull-Rom sampled on luma.
pub fn measure_bubble(
    scan: &GrayImage,
    scan_thresh: u8,
    transform: &Transform,
    orig_height: u32,
    px_per_pt: f64,
    rect: &BubbleRect,
) -> BubbleMeasurement {
    // (x, y) is the bubble's lower-left in points, origin bottom-left;
    // flip to image coordinates, origin top-left
    let orig_x = rect[0] * px_per_pt;
    let orig_y = f64::from(orig_height) - rect[1] * px_per_pt;

    let width = (rect[2] * 4.0 * px_per_pt).ceil() as i32;
    let height = (rect[3] * 4.0 * px_per_pt).ceil() as i32;
    let center_y = height / 2;
    let min_x = width / 10;
    let max_x = width * 9 / 10;

    let mut dark_count = 0;
    let mut pixel_count = 0;
    for row in -1..=1 {
        let iy = center_y + row * 8;
        let dy = orig_y - f64::from(iy) * 0.25;
        let mut ix = min_x;
        while ix < max_x {
            let dx = orig_x + f64::from(ix) * 0.25;
            let (sx, sy) = transform.apply(dx, dy);
            if sample_luma(scan, sx, sy) < scan_thresh {
                dark_count += 1;
            }
            pixel_count += 1;
            ix += 16;
        }
    }
    BubbleMeasurement {
        dark_count,
        pixel_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    const PX_PER_PT: f64 = 2.0;

    /// 200x200 white page with one bubble rectangle partially inked from the
    /// left: `fill` in [0, 1] of its width is black.
    fn page_with_bubble_fill(rect: &BubbleRect, fill: f64) -> GrayImage {
        let mut img = GrayImage::from_pixel(200, 200, Luma([255]));
        let left = (rect[0] * PX_PER_PT) as u32;
        let bottom = 200 - (rect[1] * PX_PER_PT) as u32;
        let width = (rect[2] * PX_PER_PT) as u32;
        let height = (rect[3] * PX_PER_PT) as u32;
        let inked = (f64::from(width) * fill) as u32;
        for y in bottom - height..bottom {
            for x in left..left + inked {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        img
    }

    const RECT: BubbleRect = [20.0, 50.0, 24.0, 9.0];

    #[test]
    fn test_full_ink_is_marked() {
        let img = page_with_bubble_fill(&RECT, 1.0);
        let m = measure_bubble(&img, 128, &Transform::Identity, 200, PX_PER_PT, &RECT);
        assert_eq!(m.dark_count, m.pixel_count);
        assert!(m.is_marked());
    }

    #[test]
    fn test_empty_bubble_is_unmarked() {
        let img = page_with_bubble_fill(&RECT, 0.0);
        let m = measure_bubble(&img, 128, &Transform::Identity, 200, PX_PER_PT, &RECT);
        assert_eq!(m.dark_count, 0);
        assert!(!m.is_marked());
    }

    #[test]
    fn test_light_smudge_is_unmarked() {
        let m = measure_bubble(
            &page_with_bubble_fill(&RECT, 0.2),
            128,
            &Transform::Identity,
            200,
            PX_PER_PT,
            &RECT,
        );
        assert!(!m.is_marked(), "{}/{} dark", m.dark_count, m.pixel_count);
    }

    #[test]
    fn test_heavy_fill_is_marked() {
        let m = measure_bubble(
            &page_with_bubble_fill(&RECT, 0.9),
            128,
            &Transform::Identity,
            200,
            PX_PER_PT,
            &RECT,
        );
        assert!(m.is_marked(), "{}/{} dark", m.dark_count, m.pixel_count);
    }

    #[test]
    fn test_seventy_percent_rule_boundary() {
        let m = BubbleMeasurement {
            dark_count: 7,
            pixel_count: 10,
        };
        assert!(!m.is_marked());
        let m = BubbleMeasurement {
            dark_count: 8,
            pixel_count: 10,
        };
        assert!(m.is_marked());
    }
}
