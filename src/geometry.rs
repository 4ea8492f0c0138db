use imageproc::point::Point;
use log::trace;

use crate::error::ScanError;

/// Minimum survivor count for a usable border fit. At or below this the scan
/// is declared lineless.
const MIN_LINE_POINTS: usize = 20;

/// Outliers closer than this to the fitted line are never dropped, no matter
/// how tight the residual spread gets.
const MIN_DROP_DISTANCE: f64 = 2.0;

/// A fitted border line `y = slope * x + intercept` with the points that
/// survived outlier rejection.
#[derive(Debug, Clone)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
    /// Population standard deviation of the survivors' perpendicular
    /// distances to the line.
    pub stddev: f64,
    pub points: Vec<Point<i32>>,
}

impl LineFit {
    /// The rejection radius used while fitting; reused by the corner walk.
    pub fn drop_threshold(&self) -> f64 {
        self.stddev.max(MIN_DROP_DISTANCE)
    }
}

/// Simple linear regression over integer points.
///
/// <https://en.wikipedia.org/wiki/Simple_linear_regression#Fitting_the_regression_line>
pub fn ordinary_least_squares(points: &[Point<i32>]) -> Option<(f64, f64)> {
    if points.is_empty() {
        return None;
    }
    let x_sum: i64 = points.iter().map(|p| i64::from(p.x)).sum();
    let y_sum: i64 = points.iter().map(|p| i64::from(p.y)).sum();
    let n = points.len() as f64;
    let x_avg = x_sum as f64 / n;
    let y_avg = y_sum as f64 / n;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for p in points {
        let dx = f64::from(p.x) - x_avg;
        numerator += dx * (f64::from(p.y) - y_avg);
        denominator += dx * dx;
    }
    if denominator == 0.0 {
        return None;
    }
    let slope = numerator / denominator;
    Some((slope, y_avg - slope * x_avg))
}

/// Perpendicular distance from `(x, y)` to `y = slope * x + intercept`.
///
/// <https://en.wikipedia.org/wiki/Distance_from_a_point_to_a_line>
pub fn point_line_distance(slope: f64, intercept: f64, x: f64, y: f64) -> f64 {
    (slope * x - y + intercept).abs() / (slope * slope + 1.0).sqrt()
}

/// Population standard deviation of distances to a line. The line is the
/// mean, so the values are already deviations.
fn distance_stddev(distances: &[f64]) -> f64 {
    let ssd: f64 = distances.iter().map(|d| d * d).sum();
    (ssd / distances.len() as f64).sqrt()
}

/// Ordinary least squares with iterative outlier rejection: drops every point
/// whose perpendicular distance exceeds max(stddev, 2.0) and refits until the
/// survivor set is stable. Fails with `NoLine` once too few points remain.
pub fn fit_line_robust(mut points: Vec<Point<i32>>) -> Result<LineFit, ScanError> {
    while points.len() > MIN_LINE_POINTS {
        let (slope, intercept) = ordinary_least_squares(&points)
            .ok_or_else(|| ScanError::bad_image("degenerate line fit"))?;
        let distances: Vec<f64> = points
            .iter()
            .map(|p| point_line_distance(slope, intercept, f64::from(p.x), f64::from(p.y)))
            .collect();
        let stddev = distance_stddev(&distances);
        let drop_threshold = stddev.max(MIN_DROP_DISTANCE);
        trace!(
            "line fit over {} points: slope={slope:.4} intercept={intercept:.2} stddev={stddev:.3}",
            points.len()
        );

        let before = points.len();
        let mut keep = distances.iter().map(|&d| d <= drop_threshold);
        points.retain(|_| keep.next().unwrap_or(false));
        if points.len() == before {
            return Ok(LineFit {
                slope,
                intercept,
                stddev,
                points,
            });
        }
    }
    trace!("too few points, no line found");
    Err(ScanError::NoLine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn points_on_line(slope: f64, intercept: f64, xs: impl Iterator<Item = i32>) -> Vec<Point<i32>> {
        xs.map(|x| Point::new(x, (slope * f64::from(x) + intercept).round() as i32))
            .collect()
    }

    #[test]
    fn test_ols_recovers_exact_line() {
        let points = points_on_line(2.0, 5.0, 0..10);
        let (slope, intercept) = ordinary_least_squares(&points).unwrap();
        assert_relative_eq!(slope, 2.0, epsilon = 1e-9);
        assert_relative_eq!(intercept, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ols_vertical_points_degenerate() {
        let points = vec![Point::new(3, 0), Point::new(3, 5), Point::new(3, 9)];
        assert!(ordinary_least_squares(&points).is_none());
    }

    #[test]
    fn test_point_line_distance_horizontal() {
        assert_relative_eq!(point_line_distance(0.0, 10.0, 4.0, 13.0), 3.0);
        assert_relative_eq!(point_line_distance(0.0, 10.0, -2.0, 10.0), 0.0);
    }

    #[test]
    fn test_robust_fit_drops_outliers() {
        let mut points = points_on_line(0.1, 40.0, (0..30).map(|i| i * 25));
        points.push(Point::new(300, 400));
        points.push(Point::new(500, 700));
        let fit = fit_line_robust(points).unwrap();
        assert_eq!(fit.points.len(), 30);
        assert_relative_eq!(fit.slope, 0.1, epsilon = 0.01);
        assert!(fit.points.iter().all(|p| p.y < 200));
    }

    #[test]
    fn test_robust_fit_too_few_points_is_no_line() {
        let points = points_on_line(0.0, 5.0, 0..15);
        assert_eq!(fit_line_robust(points).unwrap_err(), ScanError::NoLine);
    }
}
