use image::{DynamicImage, GrayImage};
use log::{debug, info};
use logging_timer::time;
use rayon::prelude::*;
use serde::Serialize;

use crate::bubbles::MarkedMap;
use crate::edges::{find_top_line, left_edge_sanity, TopLine};
use crate::error::ScanError;
use crate::image_utils::{luma_histogram, otsu_threshold};
use crate::refine::{refine_transform, CancelToken, Refinement};
use crate::template::PageTemplate;
use crate::transform::Transform;

/// How much worse than the best score a candidate template may be and still
/// get its bubbles measured.
const CLOSE_SCORE_FACTOR: f64 = 5.0;

/// Per-scan mutable state: the luma plane, its Otsu threshold, and the
/// memoized top-line detection so re-seeding against the same scan skips the
/// edge scan. Created per input image and discarded after interpretation.
#[derive(Debug, Clone)]
pub struct ScannedPage {
    luma: GrayImage,
    pub threshold: u8,
    top_line: Option<TopLine>,
}

impl ScannedPage {
    /// Accepts any decoded image whose luma plane is 8-bit; anything else is
    /// an unsupported scan kind.
    pub fn from_image(image: &DynamicImage) -> Result<Self, ScanError> {
        match image {
            DynamicImage::ImageLuma8(_)
            | DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageRgb8(_)
            | DynamicImage::ImageRgba8(_) => Self::from_luma(image.to_luma8()),
            other => Err(ScanError::UnsupportedImageKind {
                kind: format!("{other:?}")
                    .split('(')
                    .next()
                    .unwrap_or("unknown")
                    .to_string(),
            }),
        }
    }

    pub fn from_luma(luma: GrayImage) -> Result<Self, ScanError> {
        let (width, height) = luma.dimensions();
        if width == 0 || height == 0 {
            return Err(ScanError::bad_image("empty scan"));
        }
        let threshold = otsu_threshold(&luma_histogram(&luma));
        debug!("scan {width}x{height}, Otsu threshold {threshold}");
        Ok(Self {
            luma,
            threshold,
            top_line: None,
        })
    }

    pub fn luma(&self) -> &GrayImage {
        &self.luma
    }

    /// Detects the top border once per scan.
    pub fn top_line(&mut self) -> Result<TopLine, ScanError> {
        if let Some(line) = self.top_line {
            debug!("top line already detected, skipping edge scan");
            return Ok(line);
        }
        let line = find_top_line(&self.luma, self.threshold)?;
        self.top_line = Some(line);
        Ok(line)
    }

    /// Similarity seed from the template's border corners to this scan's
    /// detected corners.
    pub fn seed_transform(&mut self, template: &PageTemplate) -> Result<Transform, ScanError> {
        let line = self.top_line()?;
        Ok(template.seed_from(&line))
    }
}

/// One interpreted page: which bubbles are marked, and the match score the
/// alignment earned (lower is better).
#[derive(Debug, Clone, Serialize)]
pub struct Interpretation {
    pub marked: MarkedMap,
    pub score: f64,
    /// The refined transform the bubbles were measured under; drivers use it
    /// for debug renderings.
    #[serde(skip)]
    pub transform: Transform,
}

/// A template identified as a plausible match for a scan, with its reading.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateReading {
    pub template_index: usize,
    pub interpretation: Interpretation,
}

/// Outcome of matching one scan against several candidate templates.
#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    /// Index of the best-scoring template.
    pub best: usize,
    /// Every candidate's match score, in template order.
    pub scores: Vec<f64>,
    /// Readings for the best template and any close seconds, best first.
    pub readings: Vec<CandidateReading>,
}

/// Full single-template pipeline: threshold, top-line seed, hotspot
/// refinement, bubble measurement.
#[time]
pub fn interpret_page(
    template: &PageTemplate,
    scan: &mut ScannedPage,
    cancel: &CancelToken,
) -> Result<Interpretation, ScanError> {
    let (hit, miss) = left_edge_sanity(&scan.luma, scan.threshold);
    debug!("left line {hit} hit {miss} miss");

    let seed = scan.seed_transform(template)?;
    let refinement = refine_transform(
        &scan.luma,
        scan.threshold,
        &template.hotspots,
        &seed,
        cancel,
    )?;
    let marked = template.measure_bubbles(&scan.luma, scan.threshold, &refinement.transform);
    info!(
        "style {} page {} interpreted, score {:.6}",
        template.style, template.page, refinement.score
    );
    Ok(Interpretation {
        marked,
        score: refinement.score,
        transform: refinement.transform,
    })
}

/// Scores each candidate template against the scan via an independent
/// refinement over that template's hotspots, then measures bubbles under the
/// winner plus any candidate within [`CLOSE_SCORE_FACTOR`] of it, so an
/// ambiguous scan surfaces every plausible reading instead of silently
/// committing to one.
///
/// The top-line pass runs once; every candidate starts from its own fresh
/// seed copied off it, so scoring parallelizes cleanly.
#[time]
pub fn match_scan(
    templates: &[PageTemplate],
    scan: &mut ScannedPage,
    cancel: &CancelToken,
) -> Result<MatchOutcome, ScanError> {
    if templates.is_empty() {
        return Err(ScanError::bad_metadata("no candidate templates"));
    }
    let line = scan.top_line()?;
    let scan_luma = &scan.luma;
    let scan_thresh = scan.threshold;

    let refinements: Vec<Refinement> = templates
        .par_iter()
        .map(|template| {
            let seed = template.seed_from(&line);
            refine_transform(scan_luma, scan_thresh, &template.hotspots, &seed, cancel)
        })
        .collect::<Result<_, _>>()?;

    let scores: Vec<f64> = refinements.iter().map(|r| r.score).collect();
    let best = scores
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .expect("non-empty template set");
    for (i, score) in scores.iter().enumerate() {
        debug!("template[{i}] score {score:.6}{}", if i == best { " *" } else { "" });
    }

    let cutoff = scores[best] * CLOSE_SCORE_FACTOR;
    let mut readings = Vec::new();
    for (i, (template, refinement)) in templates.iter().zip(refinements).enumerate() {
        if i != best && refinement.score > cutoff {
            continue;
        }
        let marked = template.measure_bubbles(&scan.luma, scan.threshold, &refinement.transform);
        info!(
            "style {} page {} measured, score {:.6}",
            template.style, template.page, refinement.score
        );
        let reading = CandidateReading {
            template_index: i,
            interpretation: Interpretation {
                marked,
                score: refinement.score,
                transform: refinement.transform,
            },
        };
        if i == best {
            readings.insert(0, reading);
        } else {
            readings.push(reading);
        }
    }
    Ok(MatchOutcome {
        best,
        scores,
        readings,
    })
}
