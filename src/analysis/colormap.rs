//! Colormaps for rendering analysis layers onto the shared-frame channel
//! (spec.md §4.10 step 11). HSV for cyclic retinotopy, JET for signed VFS,
//! VIRIDIS for unsigned magnitude/coherence.
//!
//! Grounded on the `image` crate, pulled into the stack the way
//! cosmic-utils-camera/strand-cam render preview buffers for display.

use image::{Rgb, RgbImage};

/// Maps a cyclic value in `[0, 1)` to an RGB pixel via full-saturation,
/// full-value HSV (hue = `frac * 360`). Used for phase/retinotopy maps
/// where the value wraps at the extremes.
pub fn hsv_to_rgb(frac: f32) -> Rgb<u8> {
    let h = frac.rem_euclid(1.0) * 6.0;
    let i = h.floor() as i32;
    let f = h - i as f32;
    let (r, g, b) = match i.rem_euclid(6) {
        0 => (1.0, f, 0.0),
        1 => (1.0 - f, 1.0, 0.0),
        2 => (0.0, 1.0, f),
        3 => (0.0, 1.0 - f, 1.0),
        4 => (f, 0.0, 1.0),
        _ => (1.0, 0.0, 1.0 - f),
    };
    Rgb([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8])
}

/// JET colormap for a signed value in `[-1, 1]` (VFS). Negative maps toward
/// blue, zero toward green/yellow, positive toward red. Implemented as three
/// overlapping triangular bands over `v in [0, 4]`, the standard construction.
pub fn jet(signed: f32) -> Rgb<u8> {
    let v = (signed.clamp(-1.0, 1.0) + 1.0) / 2.0 * 4.0;
    let band = |center: f32| (1.0 - (v - center).abs()).clamp(0.0, 1.0);
    let r = band(3.0) + band(4.0);
    let g = band(2.0);
    let b = band(1.0) + band(0.0);
    Rgb([
        (r.clamp(0.0, 1.0) * 255.0) as u8,
        (g.clamp(0.0, 1.0) * 255.0) as u8,
        (b.clamp(0.0, 1.0) * 255.0) as u8,
    ])
}

const VIRIDIS_STOPS: [(f32, f32, f32); 5] = [
    (0.267, 0.005, 0.329),
    (0.283, 0.141, 0.458),
    (0.254, 0.265, 0.530),
    (0.190, 0.407, 0.556),
    (0.993, 0.906, 0.144),
];

/// VIRIDIS colormap for an unsigned value in `[0, 1]` (magnitude, coherence).
pub fn viridis(value: f32) -> Rgb<u8> {
    let v = value.clamp(0.0, 1.0) * (VIRIDIS_STOPS.len() - 1) as f32;
    let lo = v.floor() as usize;
    let hi = (lo + 1).min(VIRIDIS_STOPS.len() - 1);
    let t = v - lo as f32;
    let (r0, g0, b0) = VIRIDIS_STOPS[lo];
    let (r1, g1, b1) = VIRIDIS_STOPS[hi];
    let lerp = |a: f32, b: f32| a + (b - a) * t;
    Rgb([
        (lerp(r0, r1) * 255.0) as u8,
        (lerp(g0, g1) * 255.0) as u8,
        (lerp(b0, b1) * 255.0) as u8,
    ])
}

/// Renders a row-major `[0,1)`-normalized map to an RGB image with the given
/// per-pixel colormap function.
pub fn render(width: u32, height: u32, values: &[f32], map_fn: impl Fn(f32) -> Rgb<u8>) -> RgbImage {
    let mut image = RgbImage::new(width, height);
    for (idx, &value) in values.iter().enumerate() {
        let x = idx as u32 % width;
        let y = idx as u32 / width;
        image.put_pixel(x, y, map_fn(value));
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hsv_wraps_at_zero_and_one() {
        assert_eq!(hsv_to_rgb(0.0), hsv_to_rgb(1.0));
    }

    #[test]
    fn jet_extremes_are_blue_and_red_dominant() {
        let low = jet(-1.0);
        let high = jet(1.0);
        assert!(low.0[2] > low.0[0]);
        assert!(high.0[0] > high.0[2]);
    }

    #[test]
    fn viridis_endpoints_match_stop_table() {
        let low = viridis(0.0);
        let expected = Rgb([
            (VIRIDIS_STOPS[0].0 * 255.0) as u8,
            (VIRIDIS_STOPS[0].1 * 255.0) as u8,
            (VIRIDIS_STOPS[0].2 * 255.0) as u8,
        ]);
        assert_eq!(low, expected);
    }

    #[test]
    fn render_produces_requested_dimensions() {
        let values = vec![0.5f32; 12];
        let image = render(4, 3, &values, viridis);
        assert_eq!(image.width(), 4);
        assert_eq!(image.height(), 3);
    }
}
