use std::path::{Path, PathBuf};

use image::{GrayImage, Luma, Rgb, RgbImage};
use log::error;

use crate::hotspots::{Hotspot, HOTSPOT_SIZE};
use crate::image_utils::sample_luma;
use crate::template::PageTemplate;
use crate::transform::Transform;

/// Writes diagnostic images next to the scan being processed, named after the
/// template the scan matched so multi-page runs stay distinguishable; a
/// disabled writer ignores every call.
#[derive(Debug, Clone)]
pub struct ImageDebugWriter {
    base: Option<PathBuf>,
    style: usize,
    page: usize,
}

impl ImageDebugWriter {
    pub fn new(base: PathBuf, template: &PageTemplate) -> Self {
        Self {
            base: Some(base),
            style: template.style,
            page: template.page,
        }
    }

    pub const fn disabled() -> Self {
        Self {
            base: None,
            style: 0,
            page: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.base.is_some()
    }

    /// Where the image for `label` lands: the scan's file name with the
    /// matched style/page and the label appended. None when disabled.
    pub fn image_path(&self, label: &str) -> Option<PathBuf> {
        let base = self.base.as_ref()?;
        let stem = base.file_stem().unwrap_or_default().to_string_lossy();
        let mut path = base.clone();
        path.set_file_name(format!("{stem}_s{}p{}_{label}.png", self.style, self.page));
        Some(path)
    }

    pub fn write_luma(&self, label: &str, image: &GrayImage) -> Option<PathBuf> {
        self.save(label, |path| image.save(path))
    }

    pub fn write_rgb(&self, label: &str, image: &RgbImage) -> Option<PathBuf> {
        self.save(label, |path| image.save(path))
    }

    fn save(
        &self,
        label: &str,
        writer: impl FnOnce(&Path) -> image::ImageResult<()>,
    ) -> Option<PathBuf> {
        let path = self.image_path(label)?;
        match writer(&path) {
            Ok(()) => Some(path),
            Err(e) => {
                error!("could not write debug image {}: {e}", path.display());
                None
            }
        }
    }
}

/// Renders the selected feature windows as a grid: original windows on top,
/// their binary snaps below, one-pixel separators between cells.
pub fn hotspot_grid(orig: &GrayImage, hotspots: &[Hotspot]) -> GrayImage {
    let size = HOTSPOT_SIZE as u32;
    let grid_height = (hotspots.len() as f64).sqrt().floor().max(1.0) as u32;
    let mut grid_width = hotspots.len() as u32 / grid_height;
    while grid_height * grid_width < hotspots.len() as u32 {
        grid_width += 1;
    }
    let px_width = size * grid_width + (grid_width - 1);
    let px_height = 2 * (size * grid_height + (grid_height - 1)) + 1;
    let mut out = GrayImage::from_pixel(px_width, px_height, Luma([128]));

    let snap_base = size * grid_height + grid_height;
    let half = (HOTSPOT_SIZE / 2) as i32;
    for (i, spot) in hotspots.iter().enumerate() {
        let gx = i as u32 % grid_width;
        let gy = i as u32 / grid_width;
        let ox = gx * (size + 1);
        let oy = gy * (size + 1);
        for iy in 0..size {
            for ix in 0..size {
                let px = (spot.center.x - half + ix as i32) as u32;
                let py = (spot.center.y - half + iy as i32) as u32;
                out.put_pixel(ox + ix, oy + iy, *orig.get_pixel(px, py));

                let bit = spot.snap[(iy as usize) * HOTSPOT_SIZE + ix as usize];
                let value = if bit > 0 { 255 } else { 0 };
                out.put_pixel(ox + ix, snap_base + oy + iy, Luma([value]));
            }
        }
    }
    out
}

/// Resamples the whole scan back into the original's frame through the
/// transform. The only place a de-skewed image exists; nothing downstream
/// consumes it.
pub fn rectify_scan(orig: &GrayImage, scan: &GrayImage, transform: &Transform) -> GrayImage {
    GrayImage::from_fn(orig.width(), orig.height(), |x, y| {
        let (sx, sy) = transform.apply(f64::from(x), f64::from(y));
        Luma([sample_luma(scan, sx, sy)])
    })
}

/// Renders every bubble region 4x supersampled from the scan, one region per
/// row, with the measurement's sample columns tinted green and marked bubbles
/// flagged with a green bar at the left edge.
pub fn bubble_strip(
    template: &PageTemplate,
    scan: &GrayImage,
    scan_thresh: u8,
    transform: &Transform,
) -> RgbImage {
    let ppp = template.px_per_pt;
    let bubbles: Vec<&[f64; 4]> = template
        .bubbles
        .values()
        .flat_map(|selections| selections.values())
        .collect();
    let max_width = bubbles.iter().map(|r| r[2]).fold(0.0, f64::max);
    let max_height = bubbles.iter().map(|r| r[3]).fold(0.0, f64::max);
    let row_width = ((max_width * ppp).ceil() * 4.0) as u32;
    let row_height = ((max_height * ppp).ceil() * 4.0) as u32;
    if row_width == 0 || row_height == 0 {
        return RgbImage::new(1, 1);
    }
    let mut out = RgbImage::new(row_width, row_height * bubbles.len() as u32);

    let orig_height = f64::from(template.orig.height());
    for (i, rect) in bubbles.iter().enumerate() {
        let orig_x = rect[0] * ppp;
        let orig_y = orig_height - rect[1] * ppp;
        let width = (rect[2] * 4.0 * ppp).ceil() as i32;
        let height = (rect[3] * 4.0 * ppp).ceil() as i32;
        let center_y = height / 2;
        let min_x = width / 10;
        let max_x = width * 9 / 10;
        let base_y = (i as u32 + 1) * row_height - 1;

        let mut dark_count = 0u32;
        let mut pixel_count = 0u32;
        for iy in 0..height {
            let dy = orig_y - f64::from(iy) * 0.25;
            for ix in 0..width {
                let dx = orig_x + f64::from(ix) * 0.25;
                let (sx, sy) = transform.apply(dx, dy);
                let value = sample_luma(scan, sx, sy);
                let on_grid = (iy == center_y || iy == center_y - 8 || iy == center_y + 8)
                    && ix % 16 == 0
                    && ix > min_x
                    && ix < max_x;
                let pixel = if on_grid {
                    if value < scan_thresh {
                        dark_count += 1;
                    }
                    pixel_count += 1;
                    Rgb([value / 2, 255, value / 2])
                } else {
                    Rgb([value, value, value])
                };
                out.put_pixel(ix as u32, base_y - iy as u32, pixel);
            }
        }
        if dark_count > pixel_count * 7 / 10 {
            for iy in 0..height {
                for ix in 0..3 {
                    out.put_pixel(ix, base_y - iy as u32, Rgb([0, 255, 0]));
                }
            }
        }
    }
    out
}
