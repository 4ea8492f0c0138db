use image::GrayImage;
use imageproc::point::Point;
use log::{debug, trace};

use crate::error::ScanError;
use crate::geometry::{fit_line_robust, point_line_distance, LineFit};

/// Number of sub-threshold pixels inside the sliding window that counts as
/// hitting the printed border.
const DARK_PX_COUNT_THRESHOLD: u32 = 4;

/// Window length along the scan direction.
const WINDOW_DEPTH: u32 = 10;

const FIRST_COLUMN: u32 = 10;
const COLUMN_STEP: u32 = 25;
const RIGHT_MARGIN: u32 = 100;

/// Step size of the corner walk along the fitted line.
const CORNER_STEP: i32 = 5;

/// The scan's detected top border, as the two extreme points reachable along
/// the fitted line.
#[derive(Debug, Clone, Copy)]
pub struct TopLine {
    pub top_left: Point<i32>,
    pub top_right: Point<i32>,
}

/// Slides a 3-wide x 10-tall window down column `x_center`, keeping a running
/// count of pixels below `threshold`, and stops at the first position holding
/// at least [`DARK_PX_COUNT_THRESHOLD`] of them. Returns the window's bottom
/// row minus one; a return at or below the vertical midline means no border.
///
/// `x_center` must leave one pixel of margin on both sides.
pub fn find_top_edge(luma: &GrayImage, x_center: u32, threshold: u8) -> u32 {
    let height = luma.height();
    if height <= WINDOW_DEPTH {
        return height.saturating_sub(1);
    }
    let dark = |x: u32, y: u32| u32::from(luma.get_pixel(x, y).0[0] < threshold);

    let mut count = 0;
    for y in 0..WINDOW_DEPTH {
        for x in x_center - 1..=x_center + 1 {
            count += dark(x, y);
        }
    }
    let mut top = 0;
    let mut bottom = WINDOW_DEPTH;
    // progressive seek: subtract the top row, add the next row down
    while bottom < height && count < DARK_PX_COUNT_THRESHOLD {
        for x in x_center - 1..=x_center + 1 {
            count -= dark(x, top);
            count += dark(x, bottom);
        }
        top += 1;
        bottom += 1;
    }
    bottom - 1
}

/// The symmetric scan for the left border, sliding a 10-wide x 3-tall window
/// rightwards along row `y_center`. Only used as a sanity count.
pub fn find_left_edge(luma: &GrayImage, y_center: u32, threshold: u8) -> u32 {
    let width = luma.width();
    if width <= WINDOW_DEPTH {
        return width.saturating_sub(1);
    }
    let dark = |x: u32, y: u32| u32::from(luma.get_pixel(x, y).0[0] < threshold);

    let mut count = 0;
    for x in 0..WINDOW_DEPTH {
        for y in y_center - 1..=y_center + 1 {
            count += dark(x, y);
        }
    }
    let mut left = 0;
    let mut right = WINDOW_DEPTH;
    while right < width && count < DARK_PX_COUNT_THRESHOLD {
        for y in y_center - 1..=y_center + 1 {
            count -= dark(left, y);
            count += dark(right, y);
        }
        left += 1;
        right += 1;
    }
    right - 1
}

/// Probes the top border at regular columns; a column whose edge lands at or
/// below the midline is a miss.
fn scan_top_line(luma: &GrayImage, threshold: u8) -> Vec<Point<i32>> {
    let width = luma.width();
    let midline = luma.height() / 2;
    let mut hits = Vec::new();
    let mut misses = 0u32;
    let mut x = FIRST_COLUMN;
    while x + RIGHT_MARGIN < width {
        let edge_y = find_top_edge(luma, x, threshold);
        if edge_y < midline {
            hits.push(Point::new(x as i32, edge_y as i32));
        } else {
            misses += 1;
        }
        x += COLUMN_STEP;
    }
    debug!("top line probes: {} hits, {misses} misses", hits.len());
    hits
}

/// Counts left-border probe hits and misses along the page; logged by the
/// orchestrator as a plausibility signal, never acted on.
pub fn left_edge_sanity(luma: &GrayImage, threshold: u8) -> (u32, u32) {
    let height = luma.height();
    let half_width = luma.width() / 2;
    let mut hit = 0;
    let mut miss = 0;
    let mut y = 100;
    while y + 100 < height {
        if find_left_edge(luma, y, threshold) < half_width {
            hit += 1;
        } else {
            miss += 1;
        }
        y += 50;
    }
    (hit, miss)
}

/// Walks outward from `start` in `step`-pixel strides, reprobing the edge and
/// accepting while the probe stays within the fit's rejection radius.
fn walk_corner(luma: &GrayImage, threshold: u8, fit: &LineFit, start: Point<i32>, step: i32) -> Point<i32> {
    let width = luma.width() as i32;
    let mut corner = start;
    loop {
        let nx = corner.x + step;
        if nx < 1 || nx + 1 >= width {
            break;
        }
        let edge_y = find_top_edge(luma, nx as u32, threshold);
        let d = point_line_distance(fit.slope, fit.intercept, f64::from(nx), f64::from(edge_y));
        trace!("corner seek ({nx},{edge_y}) d={d:.2}");
        if d > fit.drop_threshold() {
            break;
        }
        corner = Point::new(nx, edge_y as i32);
    }
    corner
}

/// Locates the printed page border's top edge: probe columns, fit a line
/// robustly, then walk both ends outward to the corners.
pub fn find_top_line(luma: &GrayImage, threshold: u8) -> Result<TopLine, ScanError> {
    let hits = scan_top_line(luma, threshold);
    let fit = fit_line_robust(hits)?;

    // the fit keeps > 20 points, so second and second-to-last exist
    let top_left = walk_corner(luma, threshold, &fit, fit.points[1], -CORNER_STEP);
    let top_right = walk_corner(
        luma,
        threshold,
        &fit,
        fit.points[fit.points.len() - 2],
        CORNER_STEP,
    );
    debug!(
        "top line corners ({},{}) - ({},{})",
        top_left.x, top_left.y, top_right.x, top_right.y
    );
    Ok(TopLine {
        top_left,
        top_right,
    })
}
