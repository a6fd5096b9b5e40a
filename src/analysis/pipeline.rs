//! Analysis Pipeline (spec.md §4.10): per-direction FFT, bidirectional
//! combine, map smoothing, VFS computation and thresholding, area
//! segmentation, and rendered-layer publication. One run covers a whole
//! session's recorded directions.

use crate::acquisition::recorder::{read_camera_container, CameraContainer};
use crate::analysis::colormap;
use crate::analysis::fft::{self, DirectionAnalysis};
use crate::analysis::segmentation::{self, VisualArea};
use crate::analysis::smoothing::{self, Map2D};
use crate::analysis::vfs;
use crate::bus::{SyncBus, SyncEvent};
use crate::error::{IsiError, Result};
use crate::geometry::{MonitorGeometry, SphericalMap};
use crate::param::{ParamGroup, ParameterStore, ParamValue};
use crate::shmem::SharedFrameChannel;
use crate::types::Direction;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct SessionResult {
    pub width: usize,
    pub height: usize,
    pub azimuth_map: Map2D,
    pub elevation_map: Map2D,
    pub raw_vfs: Map2D,
    pub thresholded_vfs: Map2D,
    pub areas: Vec<VisualArea>,
    pub per_direction: HashMap<Direction, DirectionAnalysis>,
}

fn require_f64(group: &ParamGroup, key: &str) -> Result<f64> {
    group
        .get(key)
        .and_then(ParamValue::as_f64)
        .ok_or_else(|| IsiError::missing_parameter("analysis", key))
}

fn require_i64(group: &ParamGroup, key: &str) -> Result<i64> {
    group
        .get(key)
        .and_then(ParamValue::as_i64)
        .ok_or_else(|| IsiError::missing_parameter("acquisition", key))
}

fn load_frames(container: &CameraContainer) -> Vec<Vec<u8>> {
    let frame_bytes = (container.header.width_px * container.header.height_px) as usize;
    container
        .frames
        .chunks(frame_bytes)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Smooths a circular phase map (radians) by filtering its sin/cos
/// components separately and re-deriving the angle — a naive Gaussian
/// average of raw radians breaks at the +-pi wrap boundary.
fn smooth_phase(phase: &Map2D, sigma: f32) -> Map2D {
    if sigma <= 0.0 {
        return phase.clone();
    }
    let sin_map = Map2D::new(phase.width, phase.height, phase.values.iter().map(|p| p.sin()).collect());
    let cos_map = Map2D::new(phase.width, phase.height, phase.values.iter().map(|p| p.cos()).collect());
    let sin_smooth = smoothing::smooth(&sin_map, sigma);
    let cos_smooth = smoothing::smooth(&cos_map, sigma);
    let values = sin_smooth
        .values
        .iter()
        .zip(&cos_smooth.values)
        .map(|(&s, &c)| s.atan2(c))
        .collect();
    Map2D::new(phase.width, phase.height, values)
}

/// Checks a cooperative-cancellation flag between pipeline stages (spec.md
/// §4.10, mirroring the orchestrator's phase-boundary checks in
/// `acquisition::orchestrator`). `None` means the caller never offered one
/// (e.g. the unit tests below), so the pipeline always runs to completion.
fn check_cancelled(cancel: Option<&AtomicBool>, stage: &str) -> Result<()> {
    if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
        return Err(IsiError::AnalysisFailure {
            stage: stage.to_string(),
            message: "cancelled".to_string(),
        });
    }
    Ok(())
}

/// Runs the full session analysis and publishes progress/completion events.
/// On failure, publishes `AnalysisFailed` naming the stage before
/// propagating the error.
pub fn run_session(
    output_dir: &Path,
    params: &ParameterStore,
    sync_bus: &SyncBus,
    channel: Option<&SharedFrameChannel>,
    cancel: Option<&AtomicBool>,
) -> Result<SessionResult> {
    sync_bus.publish(SyncEvent::AnalysisStarted);
    match run_session_inner(output_dir, params, sync_bus, channel, cancel) {
        Ok(result) => {
            sync_bus.publish(SyncEvent::AnalysisCompleted);
            Ok(result)
        }
        Err(err) => {
            sync_bus.publish(SyncEvent::AnalysisFailed {
                stage: "pipeline".to_string(),
                message: err.to_string(),
            });
            Err(err)
        }
    }
}

fn run_session_inner(
    output_dir: &Path,
    params: &ParameterStore,
    sync_bus: &SyncBus,
    channel: Option<&SharedFrameChannel>,
    cancel: Option<&AtomicBool>,
) -> Result<SessionResult> {
    let monitor = params.validate_group_complete("monitor")?;
    let acquisition = params.validate_group_complete("acquisition")?;
    let analysis = params.validate_group_complete("analysis")?;

    let geometry = MonitorGeometry::from_params(&monitor)?;
    let spherical = SphericalMap::build(&geometry);
    let cycles = require_i64(&acquisition, "cycles")? as f64;
    let phase_filter_sigma = require_f64(&analysis, "phase_filter_sigma")? as f32;
    let smoothing_sigma = require_f64(&analysis, "smoothing_sigma")? as f32;
    let coherence_threshold = require_f64(&analysis, "coherence_threshold")? as f32;
    let vfs_threshold_sd = require_f64(&analysis, "vfs_threshold_sd")? as f32;
    let area_min_size_mm2 = require_f64(&analysis, "area_min_size_mm2")?;
    let pixel_scale = analysis.get("pixel_scale_mm_per_px").and_then(ParamValue::as_f64);

    let mut per_direction = HashMap::new();
    for &direction in &Direction::ALL {
        let path = output_dir.join(format!("{direction}_camera.bin"));
        let container = read_camera_container(&path)?;
        let frames = load_frames(&container);
        let analysis_result = fft::analyze_direction(&frames, container.header.width_px as usize, container.header.height_px as usize, cycles);
        sync_bus.publish(SyncEvent::AnalysisStageCompleted {
            stage: format!("fft_{direction}"),
        });
        check_cancelled(cancel, &format!("fft_{direction}"))?;
        per_direction.insert(direction, analysis_result);
    }

    let width = per_direction[&Direction::LR].width;
    let height = per_direction[&Direction::LR].height;

    let phase_map = |d: Direction| -> Map2D {
        let a = &per_direction[&d];
        let raw = Map2D::new(a.width, a.height, a.phase.clone());
        smooth_phase(&raw, phase_filter_sigma)
    };

    let lr_phase = phase_map(Direction::LR);
    let rl_phase = phase_map(Direction::RL);
    let tb_phase = phase_map(Direction::TB);
    let bt_phase = phase_map(Direction::BT);

    let (az_min, az_max) = spherical
        .azimuth_extent()
        .ok_or_else(|| IsiError::invalid_parameter("monitor", "monitor_distance_cm", "spherical map has no valid pixels"))?;
    let (el_min, el_max) = spherical
        .elevation_extent()
        .ok_or_else(|| IsiError::invalid_parameter("monitor", "monitor_distance_cm", "spherical map has no valid pixels"))?;

    let azimuth_values = crate::analysis::combine::bidirectional_combine(&lr_phase.values, &rl_phase.values, (az_max - az_min).abs());
    let elevation_values = crate::analysis::combine::bidirectional_combine(&tb_phase.values, &bt_phase.values, (el_max - el_min).abs());
    sync_bus.publish(SyncEvent::AnalysisStageCompleted {
        stage: "bidirectional_combine".to_string(),
    });
    check_cancelled(cancel, "bidirectional_combine")?;

    let azimuth_map = smoothing::smooth(&Map2D::new(width, height, azimuth_values), smoothing_sigma);
    let elevation_map = smoothing::smooth(&Map2D::new(width, height, elevation_values), smoothing_sigma);
    sync_bus.publish(SyncEvent::AnalysisStageCompleted {
        stage: "map_smoothing".to_string(),
    });
    check_cancelled(cancel, "map_smoothing")?;

    let raw = vfs::raw_vfs(&azimuth_map, &elevation_map);
    let raw_vfs = smoothing::smooth(&raw, smoothing_sigma);
    sync_bus.publish(SyncEvent::AnalysisStageCompleted {
        stage: "vfs".to_string(),
    });
    check_cancelled(cancel, "vfs")?;

    let coherence_maps: Vec<&[f32]> = [Direction::LR, Direction::RL, Direction::TB, Direction::BT]
        .iter()
        .map(|d| per_direction[d].coherence.as_slice())
        .collect();
    let coherence_filtered = vfs::apply_coherence_threshold(&raw_vfs, &coherence_maps, coherence_threshold);
    let statistical_threshold = vfs::statistical_threshold(&raw_vfs, vfs_threshold_sd);
    let thresholded_vfs = vfs::apply_statistical_threshold(&coherence_filtered, statistical_threshold);
    sync_bus.publish(SyncEvent::AnalysisStageCompleted {
        stage: "thresholding".to_string(),
    });
    check_cancelled(cancel, "thresholding")?;

    let areas = segmentation::segment(&thresholded_vfs, pixel_scale, area_min_size_mm2)?;
    sync_bus.publish(SyncEvent::AnalysisStageCompleted {
        stage: "segmentation".to_string(),
    });

    if let Some(channel) = channel {
        publish_layer(channel, sync_bus, &azimuth_normalized(&azimuth_map, az_min, az_max), width as u32, height as u32, colormap::hsv_to_rgb, "azimuth");
        publish_layer(channel, sync_bus, &azimuth_normalized(&elevation_map, el_min, el_max), width as u32, height as u32, colormap::hsv_to_rgb, "elevation");
        publish_layer(channel, sync_bus, &raw_vfs.values, width as u32, height as u32, colormap::jet, "vfs");
    }

    Ok(SessionResult {
        width,
        height,
        azimuth_map,
        elevation_map,
        raw_vfs,
        thresholded_vfs,
        areas,
        per_direction,
    })
}

fn azimuth_normalized(map: &Map2D, min: f32, max: f32) -> Vec<f32> {
    let span = (max - min).abs().max(1e-6);
    map.values.iter().map(|&v| (v - min) / span).collect()
}

/// Normalizes a map to its own observed range, used for on-demand layer
/// rendering where the original spherical azimuth/elevation extents that
/// `run_session` captured at acquisition time aren't available (spec.md §6
/// `get_analysis_composite_image`).
fn self_normalized(map: &Map2D) -> Vec<f32> {
    let min = map.values.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = map.values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    azimuth_normalized(map, min, max)
}

fn render_named_layer(result: &SessionResult, name: &str) -> Result<image::RgbImage> {
    let (normalized, map_fn): (Vec<f32>, fn(f32) -> image::Rgb<u8>) = match name {
        "azimuth" => (self_normalized(&result.azimuth_map), colormap::hsv_to_rgb),
        "elevation" => (self_normalized(&result.elevation_map), colormap::hsv_to_rgb),
        "vfs" => (result.raw_vfs.values.clone(), colormap::jet),
        other => return Err(IsiError::invalid_parameter("analysis", "layers", format!("unknown layer '{other}'"))),
    };
    Ok(colormap::render(result.width as u32, result.height as u32, &normalized, map_fn))
}

/// Composites one or more rendered layers into a single RGB image by
/// averaging their pixels (spec.md §6 `get_analysis_composite_image`).
pub fn composite_layers(result: &SessionResult, layers: &[String]) -> Result<image::RgbImage> {
    if layers.is_empty() {
        return Err(IsiError::invalid_parameter("analysis", "layers", "at least one layer is required"));
    }
    let width = result.width as u32;
    let height = result.height as u32;
    let mut accum = vec![0u32; (width as usize) * (height as usize) * 3];
    for name in layers {
        let layer = render_named_layer(result, name)?;
        for (a, &p) in accum.iter_mut().zip(layer.as_raw().iter()) {
            *a += p as u32;
        }
    }
    let n = layers.len() as u32;
    let averaged: Vec<u8> = accum.into_iter().map(|v| (v / n) as u8).collect();
    image::RgbImage::from_raw(width, height, averaged).ok_or_else(|| IsiError::AnalysisFailure {
        stage: "composite".to_string(),
        message: "rendered buffer size did not match width*height*3".to_string(),
    })
}

fn publish_layer(
    channel: &SharedFrameChannel,
    sync_bus: &SyncBus,
    normalized: &[f32],
    width: u32,
    height: u32,
    map_fn: impl Fn(f32) -> image::Rgb<u8>,
    label: &str,
) {
    let image = colormap::render(width, height, normalized, map_fn);
    let payload = image.into_raw();
    let meta = channel.publish(&payload, Some(label.to_string()), 0, now_us(), None, width, height);
    sync_bus.publish(SyncEvent::SharedFrameMetadata(meta));
}

fn now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn azimuth_normalized_maps_extent_to_unit_range() {
        let map = Map2D::new(2, 1, vec![-30.0, 30.0]);
        let normalized = azimuth_normalized(&map, -30.0, 30.0);
        assert!((normalized[0] - 0.0).abs() < 1e-6);
        assert!((normalized[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn smooth_phase_is_a_no_op_at_zero_sigma() {
        let phase = Map2D::new(2, 2, vec![0.1, -3.1, 3.1, 0.0]);
        let result = smooth_phase(&phase, 0.0);
        assert_eq!(result.values, phase.values);
    }

    #[test]
    fn composite_layers_rejects_unknown_layer_names() {
        let result = SessionResult {
            width: 2,
            height: 1,
            azimuth_map: Map2D::new(2, 1, vec![0.0, 1.0]),
            elevation_map: Map2D::new(2, 1, vec![0.0, 1.0]),
            raw_vfs: Map2D::new(2, 1, vec![-1.0, 1.0]),
            thresholded_vfs: Map2D::new(2, 1, vec![0.0, 0.0]),
            areas: Vec::new(),
            per_direction: HashMap::new(),
        };
        let err = composite_layers(&result, &["not_a_layer".to_string()]).unwrap_err();
        assert!(matches!(err, IsiError::InvalidParameter { .. }));
    }

    #[test]
    fn composite_layers_averages_requested_layers() {
        let result = SessionResult {
            width: 2,
            height: 1,
            azimuth_map: Map2D::new(2, 1, vec![0.0, 1.0]),
            elevation_map: Map2D::new(2, 1, vec![0.0, 1.0]),
            raw_vfs: Map2D::new(2, 1, vec![-1.0, 1.0]),
            thresholded_vfs: Map2D::new(2, 1, vec![0.0, 0.0]),
            areas: Vec::new(),
            per_direction: HashMap::new(),
        };
        let single = composite_layers(&result, &["vfs".to_string()]).unwrap();
        let combined = composite_layers(&result, &["vfs".to_string(), "azimuth".to_string()]).unwrap();
        assert_eq!(single.dimensions(), (2, 1));
        assert_eq!(combined.dimensions(), (2, 1));
    }

    #[test]
    fn smooth_phase_preserves_wrap_continuity() {
        // values near +pi and -pi are adjacent on the circle; smoothing
        // should not average them toward zero as raw-radian smoothing would.
        let phase = Map2D::new(4, 4, vec![std::f32::consts::PI - 0.05, -std::f32::consts::PI + 0.05].repeat(8));
        let result = smooth_phase(&phase, 1.0);
        for v in result.values {
            assert!(v.abs() > 2.0, "expected near +-pi, got {v}");
        }
    }
}
