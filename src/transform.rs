use imageproc::point::Point;
use nalgebra::{DMatrix, Matrix3};

use crate::error::ScanError;

/// Maps original-page pixel coordinates into scanned-image coordinates.
///
/// The seed produced from the detected top border is a similarity
/// (translation + rotation + uniform scale); hotspot refinement replaces it
/// with a full projective matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    Identity,
    Similarity {
        origin: Point<f64>,
        dest: Point<f64>,
        scale: f64,
        cos_theta: f64,
        sin_theta: f64,
    },
    /// Row-major 3x3 matrix: `(x', y') = ((m0 x + m1 y + m2) / d, (m3 x + m4 y + m5) / d)`
    /// with `d = m6 x + m7 y + m8`.
    Projective([f64; 9]),
}

impl Transform {
    /// Builds the similarity taking the original's top edge onto the scan's
    /// detected top edge: rotation from the scan edge angle, uniform scale
    /// from the edge length ratio, translation pinning the top-left corners.
    pub fn similarity_from_top_edges(
        orig_left: Point<f64>,
        orig_right: Point<f64>,
        dest_left: Point<f64>,
        dest_right: Point<f64>,
    ) -> Self {
        let dx = dest_right.x - dest_left.x;
        let dy = dest_right.y - dest_left.y;
        let theta = dy.atan2(dx);
        let dest_len = (dx * dx + dy * dy).sqrt();
        let odx = orig_right.x - orig_left.x;
        let ody = orig_right.y - orig_left.y;
        let orig_len = (odx * odx + ody * ody).sqrt();
        Self::Similarity {
            origin: orig_left,
            dest: dest_left,
            scale: dest_len / orig_len,
            cos_theta: theta.cos(),
            sin_theta: theta.sin(),
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        match self {
            Self::Identity => (x, y),
            Self::Similarity {
                origin,
                dest,
                scale,
                cos_theta,
                sin_theta,
            } => {
                let nx = (x - origin.x) * scale;
                let ny = (y - origin.y) * scale;
                (
                    nx * cos_theta - ny * sin_theta + dest.x,
                    nx * sin_theta + ny * cos_theta + dest.y,
                )
            }
            Self::Projective(m) => {
                let d = m[6] * x + m[7] * y + m[8];
                ((m[0] * x + m[1] * y + m[2]) / d, (m[3] * x + m[4] * y + m[5]) / d)
            }
        }
    }

    /// Integer-coordinate variant; truncates like the float-to-int cast it
    /// replaces rather than rounding.
    pub fn apply_int(&self, x: i32, y: i32) -> (i32, i32) {
        let (fx, fy) = self.apply(f64::from(x), f64::from(y));
        (fx as i32, fy as i32)
    }
}

/// Least-squares projective fit over point correspondences: direct linear
/// transform with Hartley normalization, solved as the smallest eigenvector
/// of the 9x9 normal matrix. Needs at least 4 correspondences.
pub fn fit_projective(
    sources: &[Point<f64>],
    dests: &[Point<f64>],
) -> Result<Transform, ScanError> {
    if sources.len() != dests.len() || sources.len() < 4 {
        return Err(ScanError::bad_image(format!(
            "projective fit needs >= 4 correspondences, got {}",
            sources.len().min(dests.len())
        )));
    }

    let (t_src, src_n) = normalize_points(sources);
    let (t_dst, dst_n) = normalize_points(dests);

    let n = sources.len();
    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = src_n[i];
        let (dx, dy) = dst_n[i];

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // h is the eigenvector of A^T A with the smallest eigenvalue.
    let ata = a.transpose() * &a;
    let eigen = nalgebra::SymmetricEigen::new(ata);
    let mut min_idx = 0;
    for i in 1..9 {
        if eigen.eigenvalues[i].abs() < eigen.eigenvalues[min_idx].abs() {
            min_idx = i;
        }
    }
    #[rustfmt::skip]
    let h_norm = Matrix3::new(
        eigen.eigenvectors[(0, min_idx)], eigen.eigenvectors[(1, min_idx)], eigen.eigenvectors[(2, min_idx)],
        eigen.eigenvectors[(3, min_idx)], eigen.eigenvectors[(4, min_idx)], eigen.eigenvectors[(5, min_idx)],
        eigen.eigenvectors[(6, min_idx)], eigen.eigenvectors[(7, min_idx)], eigen.eigenvectors[(8, min_idx)],
    );

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| ScanError::bad_image("degenerate destination normalization"))?;
    let mut h = t_dst_inv * h_norm * t_src;
    let scale = h[(2, 2)];
    if scale.abs() < 1e-15 {
        return Err(ScanError::bad_image("projective fit collapsed"));
    }
    h /= scale;

    Ok(Transform::Projective([
        h[(0, 0)], h[(0, 1)], h[(0, 2)],
        h[(1, 0)], h[(1, 1)], h[(1, 2)],
        h[(2, 0)], h[(2, 1)], h[(2, 2)],
    ]))
}

/// Translate the centroid to the origin and scale so the mean distance from
/// it is sqrt(2).
fn normalize_points(points: &[Point<f64>]) -> (Matrix3<f64>, Vec<(f64, f64)>) {
    let n = points.len() as f64;
    let cx: f64 = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy: f64 = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist: f64 = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = points.iter().map(|p| (s * (p.x - cx), s * (p.y - cy))).collect();
    (t, normalized)
}

/// Root-mean-square residual of a transform over correspondences; one factor
/// of the page match score.
pub fn transform_error(sources: &[Point<f64>], dests: &[Point<f64>], transform: &Transform) -> f64 {
    let mut ssd = 0.0;
    for (src, dst) in sources.iter().zip(dests) {
        let (tx, ty) = transform.apply(src.x, src.y);
        let dx = tx - dst.x;
        let dy = ty - dst.y;
        ssd += dx * dx + dy * dy;
    }
    (ssd / sources.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity_is_a_nop() {
        assert_eq!(Transform::Identity.apply(3.5, -2.25), (3.5, -2.25));
        assert_eq!(Transform::Identity.apply_int(7, 9), (7, 9));
    }

    #[test]
    fn test_similarity_maps_defining_pair() {
        let t = Transform::similarity_from_top_edges(
            Point::new(10.0, 10.0),
            Point::new(110.0, 10.0),
            Point::new(25.0, 40.0),
            Point::new(120.0, 55.0),
        );
        let (x, y) = t.apply(10.0, 10.0);
        assert!((x - 25.0).abs() < 0.5 && (y - 40.0).abs() < 0.5);
        let (x, y) = t.apply(110.0, 10.0);
        assert!((x - 120.0).abs() < 0.5 && (y - 55.0).abs() < 0.5);
    }

    #[test]
    fn test_similarity_pure_scale() {
        let t = Transform::similarity_from_top_edges(
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(0.0, 0.0),
            Point::new(120.0, 0.0),
        );
        let (x, y) = t.apply(50.0, 30.0);
        assert_relative_eq!(x, 60.0, epsilon = 1e-9);
        assert_relative_eq!(y, 36.0, epsilon = 1e-9);
    }

    fn reference_projective() -> Transform {
        Transform::Projective([1.1, 0.02, 12.0, -0.015, 0.95, 30.0, 1e-5, -2e-5, 1.0])
    }

    #[test]
    fn test_projective_fit_recovers_reference() {
        let h = reference_projective();
        let mut sources = Vec::new();
        let mut dests = Vec::new();
        for gy in 0..5 {
            for gx in 0..5 {
                let src = Point::new(f64::from(gx) * 150.0, f64::from(gy) * 200.0);
                let (dx, dy) = h.apply(src.x, src.y);
                sources.push(src);
                dests.push(Point::new(dx, dy));
            }
        }
        let fitted = fit_projective(&sources, &dests).unwrap();
        assert!(transform_error(&sources, &dests, &fitted) < 1e-6);
    }

    #[test]
    fn test_projective_fit_rejects_short_input() {
        let points = vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
        ];
        assert!(fit_projective(&points, &points).is_err());
    }

    #[test]
    fn test_transform_error_zero_for_exact_mapping() {
        let t = Transform::Identity;
        let points = vec![Point::new(1.0, 2.0), Point::new(-4.0, 9.0)];
        assert_relative_eq!(transform_error(&points, &points, &t), 0.0);
    }
}
