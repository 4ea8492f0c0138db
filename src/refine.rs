use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::GrayImage;
use imageproc::point::Point;
use log::{debug, trace};
use logging_timer::time;

use crate::error::ScanError;
use crate::hotspots::{Hotspot, HOTSPOT_PX, HOTSPOT_SIZE};
use crate::image_utils::sample_luma;
use crate::transform::{fit_projective, transform_error, Transform};

/// Sub-pixel search resolution: candidate offsets are spaced 1/5 pixel.
const SUBPX: usize = 5;
/// Offsets per axis: +/- one hotspot width at 1/5-pixel steps.
const SEEK_SIZE: usize = HOTSPOT_SIZE * SUBPX * 2;

/// Cooperative cancellation, observed between hotspots so a cancel lands
/// within one hotspot's worth of work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of one refinement pass: the fitted projective transform and the
/// page-match score (RMS fit residual times mean per-hotspot Hamming
/// distance; lower is better).
#[derive(Debug, Clone)]
pub struct Refinement {
    pub transform: Transform,
    pub score: f64,
    pub fit_error: f64,
    pub mean_ssd: f64,
}

/// For each hotspot, exhaustively searches the scan for the offset whose
/// binarized window best matches the stored snap, then least-squares fits a
/// projective transform over the center -> match correspondences.
///
/// A hotspot that matches nowhere keeps its zero offset with the worst
/// possible distance; a wrong template therefore surfaces as an elevated
/// score, not an error.
#[time]
pub fn refine_transform(
    scan: &GrayImage,
    scan_thresh: u8,
    hotspots: &[Hotspot],
    seed: &Transform,
    cancel: &CancelToken,
) -> Result<Refinement, ScanError> {
    let half = (HOTSPOT_SIZE / 2) as i32;
    let mut sources = Vec::with_capacity(hotspots.len());
    let mut dests = Vec::with_capacity(hotspots.len());
    let mut ssds = Vec::with_capacity(hotspots.len());

    for spot in hotspots {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        let min_x = spot.center.x - half;
        let min_y = spot.center.y - half;
        let mut best_dx = 0.0;
        let mut best_dy = 0.0;
        let mut best_ssd = HOTSPOT_PX;

        for dyi in 0..SEEK_SIZE {
            let dy = (dyi as f64 - (SEEK_SIZE / 2) as f64) / SUBPX as f64;
            for dxi in 0..SEEK_SIZE {
                let dx = (dxi as f64 - (SEEK_SIZE / 2) as f64) / SUBPX as f64;
                let mut ssd = 0;
                for iy in 0..HOTSPOT_SIZE {
                    let y = dy + f64::from(min_y + iy as i32);
                    let row = iy * HOTSPOT_SIZE;
                    for ix in 0..HOTSPOT_SIZE {
                        let x = dx + f64::from(min_x + ix as i32);
                        let (sx, sy) = seed.apply(x, y);
                        let bit = u8::from(sample_luma(scan, sx, sy) > scan_thresh);
                        if bit != spot.snap[row + ix] {
                            ssd += 1;
                        }
                    }
                }
                if ssd < best_ssd {
                    best_ssd = ssd;
                    best_dx = dx;
                    best_dy = dy;
                }
            }
        }

        if best_dx != 0.0 || best_dy != 0.0 {
            trace!(
                "hotspot ({},{}) matched at offset ({best_dx:.1},{best_dy:.1}) distance {best_ssd}",
                spot.center.x,
                spot.center.y
            );
        } else {
            trace!("hotspot ({},{}) unmoved", spot.center.x, spot.center.y);
        }
        sources.push(Point::new(f64::from(spot.center.x), f64::from(spot.center.y)));
        let (dest_x, dest_y) = seed.apply(
            f64::from(spot.center.x) + best_dx,
            f64::from(spot.center.y) + best_dy,
        );
        dests.push(Point::new(dest_x, dest_y));
        ssds.push(best_ssd);
    }

    let mean_ssd = ssds.iter().sum::<usize>() as f64 / ssds.len() as f64;
    let transform = fit_projective(&sources, &dests)?;
    let fit_error = transform_error(&sources, &dests, &transform);
    let score = fit_error * mean_ssd;
    debug!(
        "refined: score {score:.6}, fit error {fit_error:.6}, ssd min {} max {} mean {mean_ssd:.2}",
        ssds.iter().min().unwrap_or(&0),
        ssds.iter().max().unwrap_or(&0),
    );
    Ok(Refinement {
        transform,
        score,
        fit_error,
        mean_ssd,
    })
}
