//! Frequency-domain Gaussian smoothing (spec.md §4.10 steps 5 and 8): exact
//! match to the reference method on periodic spatial structure requires
//! convolving via `ifft2(fft2(map) · |fft2(kernel)|)` rather than a
//! spatial-domain convolution.

use num_complex::Complex32;
use rustfft::FftPlanner;

/// A real-valued 2D map, row-major.
#[derive(Clone, Debug)]
pub struct Map2D {
    pub width: usize,
    pub height: usize,
    pub values: Vec<f32>,
}

impl Map2D {
    pub fn new(width: usize, height: usize, values: Vec<f32>) -> Self {
        assert_eq!(values.len(), width * height);
        Self { width, height, values }
    }
}

fn fft2(width: usize, height: usize, data: &mut [Complex32], inverse: bool) {
    let mut planner = FftPlanner::new();
    let row_fft = if inverse {
        planner.plan_fft_inverse(width)
    } else {
        planner.plan_fft_forward(width)
    };
    for row in data.chunks_mut(width) {
        row_fft.process(row);
    }

    let col_fft = if inverse {
        planner.plan_fft_inverse(height)
    } else {
        planner.plan_fft_forward(height)
    };
    let mut column = vec![Complex32::new(0.0, 0.0); height];
    for col in 0..width {
        for row in 0..height {
            column[row] = data[row * width + col];
        }
        col_fft.process(&mut column);
        for row in 0..height {
            data[row * width + col] = column[row];
        }
    }

    if inverse {
        let scale = 1.0 / (width * height) as f32;
        for v in data.iter_mut() {
            *v *= scale;
        }
    }
}

/// Builds a Gaussian kernel centered at array index (0, 0) using toroidal
/// (wrap-around) distance, normalized to unit sum. A kernel centered at the
/// origin this way has a real, non-negative FFT spectrum, matching the
/// `|fft2(kernel)|` step exactly.
fn gaussian_kernel(width: usize, height: usize, sigma: f32) -> Vec<f32> {
    let mut kernel = vec![0f32; width * height];
    let mut sum = 0f64;
    for row in 0..height {
        let dy = wrapped_distance(row, height);
        for col in 0..width {
            let dx = wrapped_distance(col, width);
            let value = (-((dx * dx + dy * dy) as f64) / (2.0 * (sigma as f64).powi(2))).exp();
            kernel[row * width + col] = value as f32;
            sum += value;
        }
    }
    if sum > 0.0 {
        for v in kernel.iter_mut() {
            *v = (*v as f64 / sum) as f32;
        }
    }
    kernel
}

fn wrapped_distance(index: usize, size: usize) -> i64 {
    let i = index as i64;
    let s = size as i64;
    if i <= s / 2 {
        i
    } else {
        i - s
    }
}

/// Smooths `map` with a frequency-domain Gaussian of standard deviation
/// `sigma` (pixels). `sigma <= 0` is a no-op, matching `phase_filter_sigma`'s
/// documented default-disabled behavior (spec.md §4.10 step 3).
pub fn smooth(map: &Map2D, sigma: f32) -> Map2D {
    if sigma <= 0.0 {
        return map.clone();
    }

    let kernel = gaussian_kernel(map.width, map.height, sigma);
    let mut kernel_freq: Vec<Complex32> = kernel.iter().map(|&v| Complex32::new(v, 0.0)).collect();
    fft2(map.width, map.height, &mut kernel_freq, false);

    let mut map_freq: Vec<Complex32> = map.values.iter().map(|&v| Complex32::new(v, 0.0)).collect();
    fft2(map.width, map.height, &mut map_freq, false);

    for (m, k) in map_freq.iter_mut().zip(kernel_freq.iter()) {
        *m *= k.norm();
    }

    fft2(map.width, map.height, &mut map_freq, true);
    let values = map_freq.iter().map(|c| c.re).collect();
    Map2D::new(map.width, map.height, values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothing_preserves_map_dimensions() {
        let map = Map2D::new(8, 8, vec![1.0; 64]);
        let smoothed = smooth(&map, 2.0);
        assert_eq!(smoothed.width, 8);
        assert_eq!(smoothed.height, 8);
    }

    #[test]
    fn smoothing_a_constant_map_leaves_it_constant() {
        let map = Map2D::new(8, 8, vec![5.0; 64]);
        let smoothed = smooth(&map, 2.0);
        for v in smoothed.values {
            assert!((v - 5.0).abs() < 1e-2, "got {v}");
        }
    }

    #[test]
    fn zero_sigma_is_a_no_op() {
        let map = Map2D::new(4, 4, (0..16).map(|i| i as f32).collect());
        let smoothed = smooth(&map, 0.0);
        assert_eq!(smoothed.values, map.values);
    }

    #[test]
    fn smoothing_reduces_single_pixel_spike() {
        let mut values = vec![0f32; 64];
        values[0] = 100.0;
        let map = Map2D::new(8, 8, values);
        let smoothed = smooth(&map, 1.5);
        assert!(smoothed.values[0] < 100.0);
    }
}
