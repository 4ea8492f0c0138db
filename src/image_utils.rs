use image::{GrayImage, Rgba, RgbaImage};

/// Builds a 256-bin histogram of the luma plane.
pub fn luma_histogram(img: &GrayImage) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for pixel in img.pixels() {
        hist[pixel.0[0] as usize] += 1;
    }
    hist
}

/// Otsu's method over a luma histogram: picks the threshold maximizing
/// between-class variance. Ties resolve to the larger threshold. A histogram
/// with fewer than two occupied bins yields 0; callers treat that as a
/// degenerate image.
///
/// <https://en.wikipedia.org/wiki/Otsu%27s_method>
pub fn otsu_threshold(hist: &[u64; 256]) -> u8 {
    let mut total = 0u64;
    let mut sum_all = 0u64;
    for (i, &count) in hist.iter().enumerate() {
        total += count;
        sum_all += i as u64 * count;
    }

    let mut w_b = 0u64;
    let mut sum_b = 0u64;
    let mut best = 0u8;
    let mut best_var = 0.0f64;
    for t in 1..=255usize {
        // background class covers bins [0, t)
        w_b += hist[t - 1];
        sum_b += (t - 1) as u64 * hist[t - 1];
        let w_f = total - w_b;
        if w_b == 0 || w_f == 0 {
            continue;
        }
        let mean_b = sum_b as f64 / w_b as f64;
        let mean_f = (sum_all - sum_b) as f64 / w_f as f64;
        let var_between = w_b as f64 * w_f as f64 * (mean_b - mean_f) * (mean_b - mean_f);
        if var_between >= best_var {
            best_var = var_between;
            best = t as u8;
        }
    }
    best
}

/// Catmull-Rom basis weights for a fractional offset in [0, 1).
fn catmull_rom_weights(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        0.5 * (-t3 + 2.0 * t2 - t),
        0.5 * (3.0 * t3 - 5.0 * t2 + 2.0),
        0.5 * (-3.0 * t3 + 4.0 * t2 + t),
        0.5 * (t3 - t2),
    ]
}

fn clamp_coord(v: i64, len: u32) -> u32 {
    v.clamp(0, i64::from(len) - 1) as u32
}

/// Bicubic Catmull-Rom sample of the luma plane at a sub-pixel coordinate.
/// The 4x4 neighborhood is edge-clamped; the result is clamped to [0, 255].
pub fn sample_luma(img: &GrayImage, sx: f64, sy: f64) -> u8 {
    let (width, height) = img.dimensions();
    let ix = sx.floor();
    let iy = sy.floor();
    let wx = catmull_rom_weights(sx - ix);
    let wy = catmull_rom_weights(sy - iy);
    let ix = ix as i64;
    let iy = iy as i64;

    let mut acc = 0.0;
    for (j, wyj) in wy.iter().enumerate() {
        let py = clamp_coord(iy + j as i64 - 1, height);
        let mut row = 0.0;
        for (i, wxi) in wx.iter().enumerate() {
            let px = clamp_coord(ix + i as i64 - 1, width);
            row += wxi * f64::from(img.get_pixel(px, py).0[0]);
        }
        acc += wyj * row;
    }
    acc.round().clamp(0.0, 255.0) as u8
}

/// Per-channel Catmull-Rom sample of a color image. Only the debug renderings
/// need color; the pipeline proper works on luma.
pub fn sample_rgba(img: &RgbaImage, sx: f64, sy: f64) -> Rgba<u8> {
    let (width, height) = img.dimensions();
    let ix = sx.floor();
    let iy = sy.floor();
    let wx = catmull_rom_weights(sx - ix);
    let wy = catmull_rom_weights(sy - iy);
    let ix = ix as i64;
    let iy = iy as i64;

    let mut acc = [0.0f64; 4];
    for (j, wyj) in wy.iter().enumerate() {
        let py = clamp_coord(iy + j as i64 - 1, height);
        for (i, wxi) in wx.iter().enumerate() {
            let px = clamp_coord(ix + i as i64 - 1, width);
            let pixel = img.get_pixel(px, py);
            for c in 0..4 {
                acc[c] += wyj * wxi * f64::from(pixel.0[c]);
            }
        }
    }
    Rgba(acc.map(|v| v.round().clamp(0.0, 255.0) as u8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use proptest::prelude::*;

    fn constant_image(width: u32, height: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([value]))
    }

    #[test]
    fn test_histogram_counts_every_pixel() {
        let mut img = constant_image(4, 4, 10);
        img.put_pixel(0, 0, Luma([200]));
        let hist = luma_histogram(&img);
        assert_eq!(hist[10], 15);
        assert_eq!(hist[200], 1);
        assert_eq!(hist.iter().sum::<u64>(), 16);
    }

    #[test]
    fn test_otsu_bimodal() {
        let mut hist = [0u64; 256];
        hist[20] = 100;
        hist[220] = 100;
        let t = otsu_threshold(&hist);
        assert!(t > 20 && t <= 220, "threshold {t} outside the modes");
    }

    #[test]
    fn test_otsu_uniform_image_degenerates_to_zero() {
        let hist = luma_histogram(&constant_image(8, 8, 128));
        assert_eq!(otsu_threshold(&hist), 0);
    }

    #[test]
    fn test_sample_at_integer_coordinate_is_exact() {
        let mut img = constant_image(8, 8, 50);
        img.put_pixel(3, 4, Luma([250]));
        assert_eq!(sample_luma(&img, 3.0, 4.0), 250);
        assert_eq!(sample_luma(&img, 6.0, 6.0), 50);
    }

    #[test]
    fn test_sample_clamps_at_edges() {
        let img = constant_image(5, 5, 77);
        assert_eq!(sample_luma(&img, 0.0, 0.0), 77);
        assert_eq!(sample_luma(&img, 4.0, 4.0), 77);
        assert_eq!(sample_luma(&img, -2.5, 9.5), 77);
    }

    #[test]
    fn test_sample_rgba_per_channel() {
        let mut img = RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 255]));
        img.put_pixel(2, 5, Rgba([200, 100, 50, 255]));
        assert_eq!(sample_rgba(&img, 2.0, 5.0), Rgba([200, 100, 50, 255]));
        assert_eq!(sample_rgba(&img, 6.5, 1.5), Rgba([10, 20, 30, 255]));
    }

    proptest! {
        // Thresholding at Otsu's t and re-running Otsu on the binary result
        // lands on one of the two remaining bins.
        #[test]
        fn prop_otsu_idempotent_on_binary(values in prop::collection::vec(0u8..=255, 16..256)) {
            let mut hist = [0u64; 256];
            for &v in &values {
                hist[v as usize] += 1;
            }
            let t = otsu_threshold(&hist);
            let mut rehist = [0u64; 256];
            for &v in &values {
                rehist[if v < t { 0 } else { 255 }] += 1;
            }
            let t2 = otsu_threshold(&rehist);
            prop_assert!(t2 == 0 || t2 == 255);
        }

        // Interpolation of a constant image is that constant everywhere.
        #[test]
        fn prop_sample_constant(value in 0u8..=255, sx in -1.0f64..10.0, sy in -1.0f64..10.0) {
            let img = constant_image(9, 9, value);
            prop_assert_eq!(sample_luma(&img, sx, sy), value);
        }
    }
}
