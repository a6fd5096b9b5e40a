//! Documented default values for every group/key in spec.md §3, used by
//! `ParameterStore::bootstrap_defaults` and by tests. A real deployment
//! overrides these via an external parameter loader (out of scope here,
//! per spec.md §1); this bootstrap exists so the store, daemon, and test
//! suite have a usable starting snapshot without one.

use super::value::{ParamGroup, ParamValue};
use std::collections::HashMap;

fn group(pairs: &[(&str, ParamValue)]) -> ParamGroup {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub fn bootstrap() -> HashMap<String, ParamGroup> {
    let mut groups = HashMap::new();

    groups.insert(
        "monitor".to_string(),
        group(&[
            ("selected_display", ParamValue::Str("DISPLAY1".into())),
            ("monitor_width_px", ParamValue::Int(1920)),
            ("monitor_height_px", ParamValue::Int(1080)),
            ("monitor_fps", ParamValue::Float(60.0)),
            ("monitor_width_cm", ParamValue::Float(60.0)),
            ("monitor_height_cm", ParamValue::Float(34.0)),
            ("monitor_distance_cm", ParamValue::Float(10.0)),
            ("monitor_lateral_angle_deg", ParamValue::Float(30.0)),
            ("monitor_tilt_angle_deg", ParamValue::Float(0.0)),
            ("available_displays", ParamValue::StrList(vec!["DISPLAY1".into()])),
        ]),
    );

    groups.insert(
        "stimulus".to_string(),
        group(&[
            ("bar_width_deg", ParamValue::Float(20.0)),
            ("drift_speed_deg_per_sec", ParamValue::Float(9.0)),
            ("checker_size_deg", ParamValue::Float(25.0)),
            ("strobe_rate_hz", ParamValue::Float(6.0)),
            ("contrast", ParamValue::Float(1.0)),
            ("background_luminance", ParamValue::Float(0.5)),
        ]),
    );

    groups.insert(
        "camera".to_string(),
        group(&[
            ("selected_camera", ParamValue::Str("cam0".into())),
            ("camera_width_px", ParamValue::Int(512)),
            ("camera_height_px", ParamValue::Int(512)),
            ("camera_fps", ParamValue::Float(30.0)),
            ("exposure_us", ParamValue::Int(20_000)),
            ("gain", ParamValue::Float(1.0)),
            ("available_cameras", ParamValue::StrList(vec!["cam0".into()])),
        ]),
    );

    groups.insert(
        "acquisition".to_string(),
        group(&[
            ("baseline_sec", ParamValue::Float(5.0)),
            ("between_sec", ParamValue::Float(5.0)),
            ("cycles", ParamValue::Int(1)),
            (
                "directions",
                ParamValue::StrList(vec!["LR".into(), "RL".into(), "TB".into(), "BT".into()]),
            ),
        ]),
    );

    groups.insert(
        "analysis".to_string(),
        group(&[
            ("smoothing_sigma", ParamValue::Float(3.0)),
            ("vfs_threshold_sd", ParamValue::Float(1.5)),
            ("coherence_threshold", ParamValue::Float(0.2)),
            ("magnitude_threshold", ParamValue::Float(0.0)),
            ("phase_filter_sigma", ParamValue::Float(0.0)),
            ("response_threshold_percent", ParamValue::Float(10.0)),
            ("area_min_size_mm2", ParamValue::Float(0.5)),
            ("ring_size_mm", ParamValue::Float(1.0)),
        ]),
    );

    groups
}
