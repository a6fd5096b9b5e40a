//! Per-pixel FFT at the stimulus frequency (spec.md §4.10 step 2, §9).
//!
//! A per-pixel DFT coefficient at a single known frequency bin is a complex
//! inner product with a pre-built sinusoid — computing the full DFT would
//! waste cycles on frequencies nobody reads (design note §9).

use num_complex::Complex32;

#[derive(Clone, Debug)]
pub struct DirectionAnalysis {
    pub width: usize,
    pub height: usize,
    pub phase: Vec<f32>,
    pub magnitude: Vec<f32>,
    pub coherence: Vec<f32>,
}

const EPS: f32 = 1e-6;

/// `frames` is one grayscale image per captured frame, row-major,
/// `width * height` bytes each. `cycles` is the stimulus fundamental
/// frequency expressed in cycles over the whole sequence (typically the
/// number of sweep repeats recorded for this direction).
pub fn analyze_direction(frames: &[Vec<u8>], width: usize, height: usize, cycles: f64) -> DirectionAnalysis {
    let n = frames.len();
    let pixel_count = width * height;
    let mut phase = vec![0f32; pixel_count];
    let mut magnitude = vec![0f32; pixel_count];
    let mut coherence = vec![0f32; pixel_count];

    if n == 0 {
        return DirectionAnalysis { width, height, phase, magnitude, coherence };
    }

    // Pre-built complex sinusoid at the stimulus frequency, one value per
    // frame index — shared across every pixel's inner product.
    let sinusoid: Vec<Complex32> = (0..n)
        .map(|t| {
            let theta = -2.0 * std::f64::consts::PI * cycles * t as f64 / n as f64;
            Complex32::new(theta.cos() as f32, theta.sin() as f32)
        })
        .collect();

    for p in 0..pixel_count {
        let mut sum = Complex32::new(0.0, 0.0);
        let mut mean = 0.0f64;
        for t in 0..n {
            let intensity = frames[t][p] as f32;
            sum += Complex32::new(intensity, 0.0) * sinusoid[t];
            mean += intensity as f64;
        }
        mean /= n as f64;

        let mut variance = 0.0f64;
        for t in 0..n {
            let d = frames[t][p] as f64 - mean;
            variance += d * d;
        }
        let std_dev = (variance / n as f64).sqrt();

        let coeff = sum / n as f32;
        phase[p] = coeff.arg();
        magnitude[p] = coeff.norm();
        // Kalatsky-Stryker coherence: amplitude over variability, never
        // divided again by n_frames (spec.md §4.10 step 2, E4).
        coherence[p] = magnitude[p] / (std_dev as f32 + EPS);
    }

    DirectionAnalysis { width, height, phase, magnitude, coherence }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_frames(width: usize, height: usize, n: usize, value: u8) -> Vec<Vec<u8>> {
        (0..n).map(|_| vec![value; width * height]).collect()
    }

    #[test]
    fn constant_signal_has_zero_magnitude_and_zero_coherence() {
        let frames = constant_frames(2, 2, 16, 100);
        let result = analyze_direction(&frames, 2, 2, 1.0);
        assert!(result.magnitude.iter().all(|&m| m < 1e-3));
        assert!(result.coherence.iter().all(|&c| c < 1e-3));
    }

    #[test]
    fn coherence_formula_matches_kalatsky_stryker_not_legacy_division() {
        // A pure sinusoidal pixel signal at exactly the analyzed frequency:
        // magnitude should equal amplitude/2, coherence = magnitude / std.
        let n = 64;
        let width = 1;
        let height = 1;
        let mut frames = Vec::with_capacity(n);
        for t in 0..n {
            let theta = 2.0 * std::f64::consts::PI * t as f64 / n as f64;
            let value = 128.0 + 50.0 * theta.cos();
            frames.push(vec![value as u8]);
        }
        let result = analyze_direction(&frames, width, height, 1.0);
        let std_dev = {
            let mean: f64 = frames.iter().map(|f| f[0] as f64).sum::<f64>() / n as f64;
            let var: f64 = frames.iter().map(|f| (f[0] as f64 - mean).powi(2)).sum::<f64>() / n as f64;
            var.sqrt()
        };
        let expected_coherence = result.magnitude[0] / (std_dev as f32 + EPS);
        assert!((result.coherence[0] - expected_coherence).abs() < 1e-4);
        let legacy_wrong = result.magnitude[0] / (std_dev as f32 * n as f32);
        assert!((result.coherence[0] - legacy_wrong).abs() > 1.0);
    }
}
