use std::collections::BTreeMap;

use image::GrayImage;
use imageproc::point::Point;
use log::debug;
use logging_timer::time;
use rand::Rng;

use crate::bubbles::{measure_bubble, MarkedMap};
use crate::edges::TopLine;
use crate::error::ScanError;
use crate::hotspots::{find_hotspots, Hotspot, NUM_HOTSPOTS};
use crate::image_utils::{luma_histogram, otsu_threshold};
use crate::metadata::{BallotMetadata, ContestBubbles};
use crate::transform::Transform;

/// One rendered ballot page, prepared for matching: the raster, its scale,
/// its threshold, and the feature windows used for alignment. Immutable after
/// construction and shareable across page processors.
#[derive(Debug, Clone)]
pub struct PageTemplate {
    pub orig: GrayImage,
    /// Pixels per typographic point; the horizontal and vertical ratios must
    /// agree to within 1%.
    pub px_per_pt: f64,
    /// Otsu threshold of the original raster.
    pub threshold: u8,
    /// Printed border's top corners in original pixel coordinates, derived
    /// from the page margin.
    pub top_left: Point<f64>,
    pub top_right: Point<f64>,
    /// Feature windows selected over the page's safe interior, used both for
    /// scoring candidate templates and for transform refinement.
    pub hotspots: Vec<Hotspot>,
    pub bubbles: ContestBubbles,
    pub style: usize,
    /// 1-indexed page number within the style.
    pub page: usize,
}

impl PageTemplate {
    /// Builds a template from one style's rendered page. The RNG drives
    /// hotspot selection; seed it for reproducible templates.
    #[time]
    pub fn new(
        metadata: &BallotMetadata,
        style: usize,
        page: usize,
        orig: GrayImage,
        rng: &mut impl Rng,
    ) -> Result<Self, ScanError> {
        let (width, height) = orig.dimensions();
        if width == 0 || height == 0 {
            return Err(ScanError::bad_image("empty original page raster"));
        }
        let (width_pt, height_pt) = metadata.page_size();
        let x_scale = f64::from(width) / width_pt;
        let y_scale = f64::from(height) / height_pt;
        if (y_scale / x_scale - 1.0).abs() > 0.01 {
            return Err(ScanError::bad_image(format!(
                "orig scale not square: mx = {x_scale:.4}, my = {y_scale:.4}"
            )));
        }
        let px_per_pt = (x_scale + y_scale) / 2.0;

        let margin = metadata.page_margin();
        let top_left = Point::new(margin * px_per_pt, margin * px_per_pt);
        let top_right = Point::new((width_pt - margin) * px_per_pt, margin * px_per_pt);
        debug!(
            "style {style} page {page}: {width}x{height} px, {px_per_pt:.3} px/pt, top line ({:.0},{:.0})-({:.0},{:.0})",
            top_left.x, top_left.y, top_right.x, top_right.y
        );

        let threshold = otsu_threshold(&luma_histogram(&orig));
        let hotspots = find_hotspots(&orig, threshold, NUM_HOTSPOTS, rng)?;

        let styles = metadata.styles();
        let style_data = styles.get(style).ok_or_else(|| {
            ScanError::bad_metadata(format!("invalid ballot style {style} of {}", styles.len()))
        })?;

        Ok(Self {
            orig,
            px_per_pt,
            threshold,
            top_left,
            top_right,
            hotspots,
            bubbles: style_data.bubbles.clone(),
            style,
            page,
        })
    }

    /// Similarity seed mapping this template's border corners onto the scan's
    /// detected corners.
    pub fn seed_from(&self, line: &TopLine) -> Transform {
        Transform::similarity_from_top_edges(
            self.top_left,
            self.top_right,
            Point::new(f64::from(line.top_left.x), f64::from(line.top_left.y)),
            Point::new(f64::from(line.top_right.x), f64::from(line.top_right.y)),
        )
    }

    /// Measures every bubble of this template's style against the scan under
    /// the given transform.
    pub fn measure_bubbles(
        &self,
        scan: &GrayImage,
        scan_thresh: u8,
        transform: &Transform,
    ) -> MarkedMap {
        let orig_height = self.orig.height();
        let mut marked = MarkedMap::new();
        for (contest, selections) in &self.bubbles {
            let mut contest_out = BTreeMap::new();
            for (selection, rect) in selections {
                let m = measure_bubble(scan, scan_thresh, transform, orig_height, self.px_per_pt, rect);
                debug!(
                    "{contest}\t{selection}\t{}/{} dark/all px",
                    m.dark_count, m.pixel_count
                );
                contest_out.insert(selection.clone(), m.is_marked());
            }
            marked.insert(contest.clone(), contest_out);
        }
        marked
    }
}

/// Builds the template for every (style, page) pair in the metadata, consuming
/// the page rasters in order: styles outermost, page numbers ascending. When
/// no style defines headers, all pages are treated as style 0.
pub fn build_templates(
    metadata: &BallotMetadata,
    pages: Vec<GrayImage>,
    rng: &mut impl Rng,
) -> Result<Vec<PageTemplate>, ScanError> {
    let mut slots: Vec<(usize, usize)> = Vec::new();
    for (style_index, style) in metadata.styles().iter().enumerate() {
        let mut numbers: Vec<usize> = Vec::new();
        for key in style.headers.keys() {
            let n = key.parse().map_err(|_| {
                ScanError::bad_metadata(format!("style {style_index} has non-numeric page {key:?}"))
            })?;
            numbers.push(n);
        }
        numbers.sort_unstable();
        slots.extend(numbers.into_iter().map(|n| (style_index, n)));
    }
    if slots.is_empty() {
        slots = (1..=pages.len()).map(|n| (0, n)).collect();
    }
    if slots.len() != pages.len() {
        return Err(ScanError::bad_metadata(format!(
            "{} page rasters supplied for {} metadata pages",
            pages.len(),
            slots.len()
        )));
    }

    slots
        .into_iter()
        .zip(pages)
        .map(|((style, page), image)| PageTemplate::new(metadata, style, page, image, rng))
        .collect()
}
