use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// `[x, y, width, height]` in page points, origin at the page's lower-left.
pub type BubbleRect = [f64; 4];

/// `[left, top, right, bottom]` in page points, origin at the lower-left.
pub type HeaderRect = [f64; 4];

/// contest id -> selection id -> bubble rectangle
pub type ContestBubbles = BTreeMap<String, BTreeMap<String, BubbleRect>>;

/// 1-indexed page number (as a string key) -> header rectangle
pub type HeaderRects = BTreeMap<String, HeaderRect>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawSettings {
    /// `[width, height]` in points.
    #[serde(rename = "pagesize")]
    pub page_size: Vec<f64>,
    #[serde(rename = "pageMargin", default)]
    pub page_margin: f64,
}

/// One ballot style's worth of layout: which geographic units it covers, its
/// bubble rectangles, and its per-page header rectangles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleData {
    #[serde(rename = "GpUnitIds", default)]
    pub gp_unit_ids: Vec<String>,
    #[serde(default)]
    pub bubbles: ContestBubbles,
    #[serde(default)]
    pub headers: HeaderRects,
}

/// The rendering service's layout metadata, as serialized. `bsdata` is the
/// successor layout; `bubbles`/`headers` are the deprecated split fields.
/// Unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallotMetadata {
    pub draw_settings: Option<DrawSettings>,
    #[serde(default)]
    pub bsdata: Vec<StyleData>,
    #[serde(default)]
    pub bubbles: Vec<ContestBubbles>,
    #[serde(default)]
    pub headers: Vec<HeaderRects>,
}

impl BallotMetadata {
    /// Parses and validates metadata JSON: the page size must be present,
    /// the legacy fields must agree with `bsdata` when both appear, and
    /// every header rectangle must equal the first one seen.
    pub fn from_json(json: &str) -> Result<Self, ScanError> {
        let metadata: Self = serde_json::from_str(json)
            .map_err(|e| ScanError::bad_metadata(format!("unparseable metadata json: {e}")))?;
        metadata.validate()?;
        Ok(metadata)
    }

    fn validate(&self) -> Result<(), ScanError> {
        let settings = self
            .draw_settings
            .as_ref()
            .ok_or_else(|| ScanError::bad_metadata("missing draw_settings"))?;
        if settings.page_size.len() < 2 {
            return Err(ScanError::bad_metadata("draw_settings.pagesize needs two entries"));
        }

        if !self.bsdata.is_empty() && !self.bubbles.is_empty() {
            let legacy_bubbles: Vec<&ContestBubbles> = self.bubbles.iter().collect();
            let bs_bubbles: Vec<&ContestBubbles> =
                self.bsdata.iter().map(|s| &s.bubbles).collect();
            if legacy_bubbles != bs_bubbles {
                return Err(ScanError::bad_metadata(
                    "bsdata and deprecated bubbles fields disagree",
                ));
            }
        }
        if !self.bsdata.is_empty() && !self.headers.is_empty() {
            let legacy_headers: Vec<&HeaderRects> = self.headers.iter().collect();
            let bs_headers: Vec<&HeaderRects> = self.bsdata.iter().map(|s| &s.headers).collect();
            if legacy_headers != bs_headers {
                return Err(ScanError::bad_metadata(
                    "bsdata and deprecated headers fields disagree",
                ));
            }
        }

        // all headers across styles and pages must be at the same page position
        let mut baseline: Option<HeaderRect> = None;
        for (style_index, style) in self.styles().iter().enumerate() {
            for (page, rect) in &style.headers {
                match baseline {
                    None => baseline = Some(*rect),
                    Some(first) if first != *rect => {
                        return Err(ScanError::InconsistentHeaders {
                            style: style_index,
                            page: page.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Per-style layout, preferring `bsdata` over the deprecated fields.
    pub fn styles(&self) -> Vec<StyleData> {
        if !self.bsdata.is_empty() {
            return self.bsdata.clone();
        }
        let style_count = self.bubbles.len().max(self.headers.len());
        (0..style_count)
            .map(|i| StyleData {
                gp_unit_ids: Vec::new(),
                bubbles: self.bubbles.get(i).cloned().unwrap_or_default(),
                headers: self.headers.get(i).cloned().unwrap_or_default(),
            })
            .collect()
    }

    /// `[width, height]` of the page in points.
    pub fn page_size(&self) -> (f64, f64) {
        let settings = self.draw_settings.as_ref().expect("validated metadata");
        (settings.page_size[0], settings.page_size[1])
    }

    pub fn page_margin(&self) -> f64 {
        self.draw_settings.as_ref().expect("validated metadata").page_margin
    }

    /// Header rectangle for a style's 1-indexed page.
    pub fn header(&self, style: usize, page: usize) -> Result<HeaderRect, ScanError> {
        let styles = self.styles();
        let style_data = styles.get(style).ok_or_else(|| {
            ScanError::bad_metadata(format!("invalid ballot style {style} of {}", styles.len()))
        })?;
        style_data
            .headers
            .get(&page.to_string())
            .copied()
            .ok_or_else(|| {
                ScanError::bad_metadata(format!("style {style} has no header for page {page}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY_JSON: &str = r#"{
        "draw_settings": {"pagesize": [612.0, 792.0], "pageMargin": 36.0},
        "bubbles": [
            {"contest1": {"csel1": [44.2, 491.4, 22.7, 8.3], "csel2": [44.2, 458.2, 22.7, 8.3]}}
        ],
        "headers": [
            {"1": [36.0, 756.0, 576.0, 700.0]}
        ]
    }"#;

    #[test]
    fn test_parse_legacy_layout() {
        let metadata = BallotMetadata::from_json(LEGACY_JSON).unwrap();
        assert_eq!(metadata.page_size(), (612.0, 792.0));
        assert_eq!(metadata.page_margin(), 36.0);
        let styles = metadata.styles();
        assert_eq!(styles.len(), 1);
        assert_eq!(styles[0].bubbles["contest1"].len(), 2);
        assert_eq!(metadata.header(0, 1).unwrap(), [36.0, 756.0, 576.0, 700.0]);
    }

    #[test]
    fn test_bsdata_preferred_over_legacy() {
        let json = r#"{
            "draw_settings": {"pagesize": [612.0, 792.0], "pageMargin": 36.0},
            "bsdata": [
                {"GpUnitIds": ["gp1"],
                 "bubbles": {"c": {"s": [1.0, 2.0, 3.0, 4.0]}},
                 "headers": {"1": [0.0, 10.0, 20.0, 5.0]}}
            ]
        }"#;
        let metadata = BallotMetadata::from_json(json).unwrap();
        let styles = metadata.styles();
        assert_eq!(styles[0].gp_unit_ids, vec!["gp1".to_string()]);
        assert_eq!(styles[0].bubbles["c"]["s"], [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_missing_pagesize_is_bad_metadata() {
        let json = r#"{"bubbles": [], "headers": []}"#;
        assert!(matches!(
            BallotMetadata::from_json(json).unwrap_err(),
            ScanError::BadMetadata { .. }
        ));
    }

    #[test]
    fn test_disagreeing_bsdata_is_bad_metadata() {
        let json = r#"{
            "draw_settings": {"pagesize": [612.0, 792.0]},
            "bubbles": [{"c": {"s": [1.0, 2.0, 3.0, 4.0]}}],
            "bsdata": [{"bubbles": {"c": {"s": [9.0, 9.0, 9.0, 9.0]}}}]
        }"#;
        assert!(matches!(
            BallotMetadata::from_json(json).unwrap_err(),
            ScanError::BadMetadata { .. }
        ));
    }

    #[test]
    fn test_inconsistent_headers_rejected() {
        let json = r#"{
            "draw_settings": {"pagesize": [612.0, 792.0], "pageMargin": 36.0},
            "headers": [
                {"1": [36.0, 756.0, 576.0, 700.0],
                 "2": [36.0, 756.0, 576.0, 701.0]}
            ]
        }"#;
        assert_eq!(
            BallotMetadata::from_json(json).unwrap_err(),
            ScanError::InconsistentHeaders {
                style: 0,
                page: "2".to_string()
            }
        );
    }
}
