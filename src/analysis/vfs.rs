//! Visual Field Sign computation and thresholding (spec.md §4.10 steps
//! 6–10). Gradient-direction formula only — never a Jacobian determinant,
//! which has the wrong sign and no normalization.

use crate::analysis::smoothing::Map2D;

pub struct Gradients {
    pub d_dx: Vec<f32>,
    pub d_dy: Vec<f32>,
}

/// Central-difference gradient, edges clamped to one-sided differences
/// (spec.md §4.10 step 6).
pub fn gradient(map: &Map2D) -> Gradients {
    let (w, h) = (map.width, map.height);
    let mut d_dx = vec![0f32; w * h];
    let mut d_dy = vec![0f32; w * h];

    for row in 0..h {
        for col in 0..w {
            let idx = row * w + col;
            let left = if col == 0 { col } else { col - 1 };
            let right = if col + 1 >= w { col } else { col + 1 };
            let denom = (right - left).max(1) as f32;
            d_dx[idx] = (map.values[row * w + right] - map.values[row * w + left]) / denom;

            let up = if row == 0 { row } else { row - 1 };
            let down = if row + 1 >= h { row } else { row + 1 };
            let denom_y = (down - up).max(1) as f32;
            d_dy[idx] = (map.values[down * w + col] - map.values[up * w + col]) / denom_y;
        }
    }

    Gradients { d_dx, d_dy }
}

/// Raw VFS (spec.md §4.10 step 7): `sin(theta_h - theta_v)` where
/// `theta_h = atan2(d_az/dy, d_az/dx)` and `theta_v = atan2(d_el/dy,
/// d_el/dx)` — the sine of the angle between the two gradient directions,
/// equivalent to `sin(arg(e^{i theta_h} * e^{-i theta_v}))`.
pub fn raw_vfs(azimuth: &Map2D, elevation: &Map2D) -> Map2D {
    let az_grad = gradient(azimuth);
    let el_grad = gradient(elevation);

    let values = az_grad
        .d_dx
        .iter()
        .zip(&az_grad.d_dy)
        .zip(el_grad.d_dx.iter().zip(&el_grad.d_dy))
        .map(|((&az_dx, &az_dy), (&el_dx, &el_dy))| {
            let theta_h = az_dy.atan2(az_dx);
            let theta_v = el_dy.atan2(el_dx);
            (theta_h - theta_v).sin()
        })
        .collect();

    Map2D::new(azimuth.width, azimuth.height, values)
}

/// Zeroes pixels where the minimum per-direction coherence among
/// `coherence_maps` falls below `threshold` (spec.md §4.10 step 9). Using
/// the minimum requires every contributing direction to be reliable at that
/// pixel before trusting its VFS value.
pub fn apply_coherence_threshold(vfs: &Map2D, coherence_maps: &[&[f32]], threshold: f32) -> Map2D {
    let mut values = vfs.values.clone();
    for (idx, value) in values.iter_mut().enumerate() {
        let min_coherence = coherence_maps
            .iter()
            .map(|c| c[idx])
            .fold(f32::INFINITY, f32::min);
        if min_coherence < threshold {
            *value = 0.0;
        }
    }
    Map2D::new(vfs.width, vfs.height, values)
}

/// Statistical threshold (spec.md §4.10 step 10): `T = vfs_threshold_sd *
/// std(raw_VFS_full_image)`, computed on the *full* raw map — never on a
/// coherence-filtered subset, which inflates the threshold and masks
/// everything (spec.md testable property 9, E5).
pub fn statistical_threshold(raw_vfs_full: &Map2D, vfs_threshold_sd: f32) -> f32 {
    let n = raw_vfs_full.values.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean: f64 = raw_vfs_full.values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance: f64 = raw_vfs_full
        .values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    (vfs_threshold_sd as f64 * variance.sqrt()) as f32
}

pub fn apply_statistical_threshold(coherence_filtered: &Map2D, threshold: f32) -> Map2D {
    let values = coherence_filtered
        .values
        .iter()
        .map(|&v| if v.abs() < threshold { 0.0 } else { v })
        .collect();
    Map2D::new(coherence_filtered.width, coherence_filtered.height, values)
}
