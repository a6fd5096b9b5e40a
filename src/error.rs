//! Error types for the ISI macroscope core.
//!
//! `IsiError` is a single flat enum spanning every failure kind named in the
//! error handling design: missing/invalid parameters, unavailable or
//! capability-deficient hardware, violated preconditions, recording
//! failures, and analysis failures. Every variant's message names the
//! component, the operation, and the offending key or condition, so replies
//! on the control channel and log lines never need extra context stitched on
//! by the caller.

use thiserror::Error;

/// Convenience alias for results using the core error type.
pub type Result<T> = std::result::Result<T, IsiError>;

#[derive(Error, Debug)]
pub enum IsiError {
    /// A required parameter key was absent from a group. Fatal to the
    /// triggering operation; fatal to the process during startup.
    #[error("missing parameter: {group}.{key}")]
    MissingParameter { group: String, key: String },

    /// A parameter value was present but outside its schema bound, or of
    /// the wrong type.
    #[error("invalid parameter {group}.{key}: {reason}")]
    InvalidParameter {
        group: String,
        key: String,
        reason: String,
    },

    /// A selected camera or display was not found among detected hardware.
    #[error("hardware unavailable: {component} '{name}' not detected")]
    HardwareUnavailable { component: String, name: String },

    /// A camera lacks a required capability (hardware timestamps). No
    /// software fallback exists — this is always a hard error.
    #[error("hardware capability missing on {device}: {capability}")]
    HardwareCapabilityMissing { device: String, capability: String },

    /// An operation was attempted while its precondition did not hold, e.g.
    /// `start_acquisition` before `unified_stimulus_pre_generate`.
    #[error("precondition violated for {operation}: {reason}")]
    PreconditionViolated {
        operation: String,
        reason: String,
        action: String,
    },

    /// A recording direction failed to persist to disk; the direction is
    /// aborted and the session is marked incomplete.
    #[error("recording failure for direction {direction}: {source}")]
    RecordingFailure {
        direction: String,
        #[source]
        source: std::io::Error,
    },

    /// The analysis pipeline raised an exception mid-run; partial artifacts
    /// remain on disk.
    #[error("analysis failure in stage '{stage}': {message}")]
    AnalysisFailure { stage: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("binary container error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),

    #[error("unknown command type: {0}")]
    UnknownCommand(String),
}

impl IsiError {
    pub fn missing_parameter(group: impl Into<String>, key: impl Into<String>) -> Self {
        IsiError::MissingParameter {
            group: group.into(),
            key: key.into(),
        }
    }

    pub fn invalid_parameter(
        group: impl Into<String>,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        IsiError::InvalidParameter {
            group: group.into(),
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn stimulus_not_pre_generated(operation: impl Into<String>) -> Self {
        IsiError::PreconditionViolated {
            operation: operation.into(),
            reason: "stimulus_not_pre_generated".to_string(),
            action: "redirect_to_stimulus_generation".to_string(),
        }
    }

    /// Structured fields for a control-channel error reply, mirroring
    /// spec.md §7's `{reason, action}` shape for `PreconditionViolated`.
    pub fn reason_action(&self) -> Option<(&str, &str)> {
        match self {
            IsiError::PreconditionViolated { reason, action, .. } => {
                Some((reason.as_str(), action.as_str()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_parameter_names_group_and_key() {
        let err = IsiError::missing_parameter("monitor", "monitor_fps");
        assert_eq!(err.to_string(), "missing parameter: monitor.monitor_fps");
    }

    #[test]
    fn stimulus_not_pre_generated_carries_reason_and_action() {
        let err = IsiError::stimulus_not_pre_generated("start_acquisition");
        let (reason, action) = err.reason_action().unwrap();
        assert_eq!(reason, "stimulus_not_pre_generated");
        assert_eq!(action, "redirect_to_stimulus_generation");
    }

    #[test]
    fn hardware_capability_missing_names_device() {
        let err = IsiError::HardwareCapabilityMissing {
            device: "cam0".into(),
            capability: "hardware_timestamp".into(),
        };
        assert!(err.to_string().contains("cam0"));
        assert!(err.to_string().contains("hardware_timestamp"));
    }
}
