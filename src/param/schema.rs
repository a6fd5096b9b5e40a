//! Per-group parameter schemas: key name, expected kind, and bound.
//!
//! The schema is the system's single source of configuration truth (spec.md
//! §4.1): a missing required key or an out-of-bound value is always a fail,
//! never a silent default.

use super::value::ParamValue;
use crate::error::{IsiError, Result};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Int,
    Float,
    Bool,
    Str,
    StrList,
}

#[derive(Clone, Debug)]
pub enum Bound {
    None,
    /// Inclusive numeric range.
    Range(f64, f64),
    /// Value (or, for a list, every element) must be one of these.
    Choices(&'static [&'static str]),
}

#[derive(Clone, Debug)]
pub struct KeySchema {
    pub kind: Kind,
    pub required: bool,
    pub bound: Bound,
}

impl KeySchema {
    const fn required(kind: Kind) -> Self {
        KeySchema {
            kind,
            required: true,
            bound: Bound::None,
        }
    }

    const fn optional(kind: Kind) -> Self {
        KeySchema {
            kind,
            required: false,
            bound: Bound::None,
        }
    }

    const fn with_range(mut self, min: f64, max: f64) -> Self {
        self.bound = Bound::Range(min, max);
        self
    }

    const fn with_choices(mut self, choices: &'static [&'static str]) -> Self {
        self.bound = Bound::Choices(choices);
        self
    }
}

pub type GroupSchema = &'static [(&'static str, KeySchema)];

macro_rules! schema {
    ($($key:expr => $def:expr),* $(,)?) => {
        &[$(($key, $def)),*]
    };
}

pub const MONITOR: GroupSchema = schema! {
    "selected_display" => KeySchema::required(Kind::Str),
    "monitor_width_px" => KeySchema::required(Kind::Int).with_range(1.0, 16384.0),
    "monitor_height_px" => KeySchema::required(Kind::Int).with_range(1.0, 16384.0),
    "monitor_fps" => KeySchema::required(Kind::Float).with_range(1.0, 1000.0),
    "monitor_width_cm" => KeySchema::required(Kind::Float).with_range(0.1, 1000.0),
    "monitor_height_cm" => KeySchema::required(Kind::Float).with_range(0.1, 1000.0),
    "monitor_distance_cm" => KeySchema::required(Kind::Float).with_range(0.1, 1000.0),
    "monitor_lateral_angle_deg" => KeySchema::required(Kind::Float).with_range(-180.0, 180.0),
    "monitor_tilt_angle_deg" => KeySchema::required(Kind::Float).with_range(-180.0, 180.0),
    "available_displays" => KeySchema::optional(Kind::StrList),
};

pub const STIMULUS: GroupSchema = schema! {
    "bar_width_deg" => KeySchema::required(Kind::Float).with_range(0.1, 180.0),
    "drift_speed_deg_per_sec" => KeySchema::required(Kind::Float).with_range(0.01, 1000.0),
    "checker_size_deg" => KeySchema::required(Kind::Float).with_range(0.1, 180.0),
    "strobe_rate_hz" => KeySchema::required(Kind::Float).with_range(0.0, 1000.0),
    "contrast" => KeySchema::required(Kind::Float).with_range(0.0, 1.0),
    "background_luminance" => KeySchema::required(Kind::Float).with_range(0.0, 1.0),
};

pub const CAMERA: GroupSchema = schema! {
    "selected_camera" => KeySchema::required(Kind::Str),
    "camera_width_px" => KeySchema::required(Kind::Int).with_range(1.0, 16384.0),
    "camera_height_px" => KeySchema::required(Kind::Int).with_range(1.0, 16384.0),
    "camera_fps" => KeySchema::required(Kind::Float).with_range(0.1, 10000.0),
    "exposure_us" => KeySchema::required(Kind::Int).with_range(1.0, 10_000_000.0),
    "gain" => KeySchema::required(Kind::Float).with_range(0.0, 1000.0),
    "available_cameras" => KeySchema::optional(Kind::StrList),
};

pub const ACQUISITION: GroupSchema = schema! {
    "baseline_sec" => KeySchema::required(Kind::Float).with_range(0.0, 86400.0),
    "between_sec" => KeySchema::required(Kind::Float).with_range(0.0, 86400.0),
    "cycles" => KeySchema::required(Kind::Int).with_range(1.0, 1000.0),
    "directions" => KeySchema::required(Kind::StrList).with_choices(&["LR", "RL", "TB", "BT"]),
};

pub const ANALYSIS: GroupSchema = schema! {
    "smoothing_sigma" => KeySchema::required(Kind::Float).with_range(0.0, 1000.0),
    "vfs_threshold_sd" => KeySchema::required(Kind::Float).with_range(0.0, 100.0),
    "coherence_threshold" => KeySchema::required(Kind::Float).with_range(0.0, 1.0),
    "magnitude_threshold" => KeySchema::required(Kind::Float).with_range(0.0, 1e9),
    "phase_filter_sigma" => KeySchema::required(Kind::Float).with_range(0.0, 1000.0),
    "response_threshold_percent" => KeySchema::required(Kind::Float).with_range(0.0, 100.0),
    "area_min_size_mm2" => KeySchema::required(Kind::Float).with_range(0.0, 1e6),
    "ring_size_mm" => KeySchema::required(Kind::Float).with_range(0.0, 1000.0),
    "pixel_scale_mm_per_px" => KeySchema::optional(Kind::Float).with_range(1e-6, 1000.0),
    // Preserved for compatibility; unused by gradient computation (central
    // differences only). Writing it logs a warning, per spec.md §9.
    "gradient_window_size" => KeySchema::optional(Kind::Int).with_range(1.0, 64.0),
};

pub fn schema_for(group: &str) -> Option<GroupSchema> {
    match group {
        "monitor" => Some(MONITOR),
        "stimulus" => Some(STIMULUS),
        "camera" => Some(CAMERA),
        "acquisition" => Some(ACQUISITION),
        "analysis" => Some(ANALYSIS),
        _ => None,
    }
}

/// Validate a partial update against a group's schema. Does not require
/// every schema key to be present in `partial` — only that present keys
/// are well-typed and in-bound. Use [`validate_complete`] for full-group
/// validation at bootstrap/load time.
pub fn validate_partial(
    group: &str,
    schema: GroupSchema,
    partial: &BTreeMap<String, ParamValue>,
) -> Result<()> {
    for (key, value) in partial {
        let Some((_, key_schema)) = schema.iter().find(|(k, _)| *k == key) else {
            return Err(IsiError::invalid_parameter(
                group,
                key,
                "not part of this group's schema",
            ));
        };
        check_one(group, key, key_schema, value)?;
    }
    Ok(())
}

/// Validate that every required key in `schema` is present and in-bound in
/// `full`. Used when a group snapshot must be a coherent whole (startup,
/// acquisition-start snapshot).
pub fn validate_complete(
    group: &str,
    schema: GroupSchema,
    full: &BTreeMap<String, ParamValue>,
) -> Result<()> {
    for (key, key_schema) in schema {
        if !key_schema.required {
            continue;
        }
        match full.get(*key) {
            None => return Err(IsiError::missing_parameter(group, *key)),
            Some(value) => check_one(group, key, key_schema, value)?,
        }
    }
    Ok(())
}

fn check_one(group: &str, key: &str, schema: &KeySchema, value: &ParamValue) -> Result<()> {
    let kind_ok = matches!(
        (schema.kind, value),
        (Kind::Int, ParamValue::Int(_))
            | (Kind::Float, ParamValue::Float(_))
            | (Kind::Float, ParamValue::Int(_))
            | (Kind::Bool, ParamValue::Bool(_))
            | (Kind::Str, ParamValue::Str(_))
            | (Kind::StrList, ParamValue::StrList(_))
    );
    if !kind_ok {
        return Err(IsiError::invalid_parameter(
            group,
            key,
            format!("expected {:?}, got {value:?}", schema.kind),
        ));
    }

    match (&schema.bound, value) {
        (Bound::None, _) => Ok(()),
        (Bound::Range(min, max), ParamValue::Int(v)) => {
            let v = *v as f64;
            if v < *min || v > *max {
                Err(IsiError::invalid_parameter(
                    group,
                    key,
                    format!("{v} outside range [{min}, {max}]"),
                ))
            } else {
                Ok(())
            }
        }
        (Bound::Range(min, max), ParamValue::Float(v)) => {
            if *v < *min || *v > *max {
                Err(IsiError::invalid_parameter(
                    group,
                    key,
                    format!("{v} outside range [{min}, {max}]"),
                ))
            } else {
                Ok(())
            }
        }
        (Bound::Choices(choices), ParamValue::Str(v)) => {
            if choices.contains(&v.as_str()) {
                Ok(())
            } else {
                Err(IsiError::invalid_parameter(
                    group,
                    key,
                    format!("'{v}' not among {choices:?}"),
                ))
            }
        }
        (Bound::Choices(choices), ParamValue::StrList(items)) => {
            for item in items {
                if !choices.contains(&item.as_str()) {
                    return Err(IsiError::invalid_parameter(
                        group,
                        key,
                        format!("'{item}' not among {choices:?}"),
                    ));
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_of(pairs: &[(&str, ParamValue)]) -> BTreeMap<String, ParamValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn missing_required_key_is_rejected() {
        let full = group_of(&[("bar_width_deg", ParamValue::Float(20.0))]);
        let err = validate_complete("stimulus", STIMULUS, &full).unwrap_err();
        assert!(err.to_string().contains("stimulus"));
    }

    #[test]
    fn out_of_bound_contrast_is_rejected() {
        let partial = group_of(&[("contrast", ParamValue::Float(1.5))]);
        assert!(validate_partial("stimulus", STIMULUS, &partial).is_err());
    }

    #[test]
    fn directions_outside_choices_rejected() {
        let partial = group_of(&[(
            "directions",
            ParamValue::StrList(vec!["LR".into(), "XX".into()]),
        )]);
        assert!(validate_partial("acquisition", ACQUISITION, &partial).is_err());
    }

    #[test]
    fn well_formed_monitor_group_validates() {
        let full = group_of(&[
            ("selected_display", ParamValue::Str("DISPLAY1".into())),
            ("monitor_width_px", ParamValue::Int(1920)),
            ("monitor_height_px", ParamValue::Int(1080)),
            ("monitor_fps", ParamValue::Float(60.0)),
            ("monitor_width_cm", ParamValue::Float(60.0)),
            ("monitor_height_cm", ParamValue::Float(34.0)),
            ("monitor_distance_cm", ParamValue::Float(10.0)),
            ("monitor_lateral_angle_deg", ParamValue::Float(30.0)),
            ("monitor_tilt_angle_deg", ParamValue::Float(0.0)),
        ]);
        assert!(validate_complete("monitor", MONITOR, &full).is_ok());
    }
}
