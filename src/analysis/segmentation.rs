//! Visual-area segmentation (spec.md §4.10 steps 12–13): connected
//! components of same-signed thresholded VFS, filtered by calibrated
//! physical area.
//!
//! Requires a calibrated `pixel_scale_mm_per_px`; there is no ambiguous
//! pixel-count fallback — an uncalibrated session cannot report area in
//! physical units, so segmentation simply refuses to run rather than
//! silently reporting pixel counts as if they were areas.

use crate::analysis::smoothing::Map2D;
use crate::error::{IsiError, Result};
use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sign {
    Positive,
    Negative,
}

#[derive(Clone, Debug)]
pub struct VisualArea {
    pub sign: Sign,
    pub pixel_indices: Vec<usize>,
    pub area_mm2: f64,
    pub boundary_pixel_indices: Vec<usize>,
}

fn sign_of(value: f32) -> Option<Sign> {
    if value > 0.0 {
        Some(Sign::Positive)
    } else if value < 0.0 {
        Some(Sign::Negative)
    } else {
        None
    }
}

/// Flood-fills 4-connected same-sign regions of `thresholded` (zeros are
/// background), discards any region whose physical area is below
/// `area_min_mm2`, and records its zero-crossing boundary.
pub fn segment(
    thresholded: &Map2D,
    pixel_scale_mm_per_px: Option<f64>,
    area_min_mm2: f64,
) -> Result<Vec<VisualArea>> {
    let scale = pixel_scale_mm_per_px.ok_or_else(|| {
        IsiError::invalid_parameter(
            "analysis",
            "pixel_scale_mm_per_px",
            "area segmentation requires a calibrated pixel scale; none is set",
        )
    })?;

    let (w, h) = (thresholded.width, thresholded.height);
    let mut visited = vec![false; w * h];
    let mut areas = Vec::new();
    let pixel_area_mm2 = scale * scale;

    for start in 0..w * h {
        if visited[start] {
            continue;
        }
        let Some(sign) = sign_of(thresholded.values[start]) else {
            visited[start] = true;
            continue;
        };

        let mut component = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);
        visited[start] = true;

        while let Some(idx) = queue.pop_front() {
            component.push(idx);
            let row = idx / w;
            let col = idx % w;
            for (dr, dc) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
                let nr = row as i64 + dr;
                let nc = col as i64 + dc;
                if nr < 0 || nc < 0 || nr as usize >= h || nc as usize >= w {
                    continue;
                }
                let nidx = nr as usize * w + nc as usize;
                if visited[nidx] {
                    continue;
                }
                if sign_of(thresholded.values[nidx]) == Some(sign) {
                    visited[nidx] = true;
                    queue.push_back(nidx);
                }
            }
        }

        let area_mm2 = component.len() as f64 * pixel_area_mm2;
        if area_mm2 < area_min_mm2 {
            continue;
        }

        let boundary = boundary_of(&component, w, h);
        areas.push(VisualArea {
            sign,
            pixel_indices: component,
            area_mm2,
            boundary_pixel_indices: boundary,
        });
    }

    Ok(areas)
}

/// A component pixel is on the boundary if any 4-neighbor lies outside the
/// component (outside the image, or not a member) — zero-crossing edge with
/// minimal dilation (one pixel ring).
fn boundary_of(component: &[usize], width: usize, height: usize) -> Vec<usize> {
    let member: std::collections::HashSet<usize> = component.iter().copied().collect();
    component
        .iter()
        .copied()
        .filter(|&idx| {
            let row = idx / width;
            let col = idx % width;
            [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)].iter().any(|&(dr, dc)| {
                let nr = row as i64 + dr;
                let nc = col as i64 + dc;
                if nr < 0 || nc < 0 || nr as usize >= height || nc as usize >= width {
                    return true;
                }
                !member.contains(&(nr as usize * width + nc as usize))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_pixel_scale_is_a_hard_error() {
        let map = Map2D::new(2, 2, vec![0.5, 0.5, -0.5, -0.5]);
        let result = segment(&map, None, 0.01);
        assert!(result.is_err());
    }

    #[test]
    fn single_region_found_with_calibrated_scale() {
        let map = Map2D::new(3, 3, vec![0.5; 9]);
        let areas = segment(&map, Some(0.01), 0.0).unwrap();
        assert_eq!(areas.len(), 1);
        assert_eq!(areas[0].pixel_indices.len(), 9);
        assert_eq!(areas[0].sign, Sign::Positive);
    }

    #[test]
    fn area_below_minimum_is_discarded() {
        let map = Map2D::new(3, 3, vec![0.5; 9]);
        // 9 px * (0.01mm)^2 = 0.0009 mm^2; require more than that.
        let areas = segment(&map, Some(0.01), 1.0).unwrap();
        assert!(areas.is_empty());
    }

    #[test]
    fn opposite_signs_form_separate_components() {
        let map = Map2D::new(2, 1, vec![0.5, -0.5]);
        let areas = segment(&map, Some(1.0), 0.0).unwrap();
        assert_eq!(areas.len(), 2);
    }

    #[test]
    fn boundary_includes_every_pixel_of_a_single_pixel_region() {
        let map = Map2D::new(3, 3, vec![0.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0]);
        let areas = segment(&map, Some(1.0), 0.0).unwrap();
        assert_eq!(areas.len(), 1);
        assert_eq!(areas[0].boundary_pixel_indices, areas[0].pixel_indices);
    }
}
