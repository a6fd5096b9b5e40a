//! End-to-end scenarios over the public system composition root: stimulus
//! pre-generation then preview playback, acquisition precondition failures,
//! and the full phase sequence through a short session.

use isi_macroscope::acquisition::Phase;
use isi_macroscope::bus::{ControlReply, ControlRequest};
use isi_macroscope::lifecycle::System;
use isi_macroscope::types::Direction;
use std::time::Duration;
use tempfile::tempdir;

async fn dispatch(system: &System, command: &str, payload: serde_json::Value) -> ControlReply {
    system
        .control_bus
        .dispatch(ControlRequest {
            command: command.to_string(),
            payload,
        })
        .await
}

/// E1: pre-generating the stimulus library then starting preview playback
/// succeeds and reaches the playing state.
#[tokio::test]
async fn pre_generate_then_preview_playback_succeeds() {
    let dir = tempdir().unwrap();
    let system = System::start(dir.path()).await.unwrap();

    let reply = dispatch(&system, "unified_stimulus_pre_generate", serde_json::Value::Null).await;
    assert!(reply.success, "{:?}", reply.error);
    assert!(system.playback.is_ready_for(Direction::LR));

    let reply = dispatch(&system, "start_preview", serde_json::json!({"direction": "LR"})).await;
    assert!(reply.success, "{:?}", reply.error);
    assert_eq!(system.playback.state(), isi_macroscope::stimulus::PlaybackState::Playing);

    system.shutdown().await;
}

/// E2: starting acquisition before pre-generation fails with a structured
/// precondition-violated reply naming the redirect action.
#[tokio::test]
async fn start_acquisition_without_pre_generation_fails_with_precondition_violated() {
    let dir = tempdir().unwrap();
    let system = System::start(dir.path()).await.unwrap();

    let reply = dispatch(&system, "start_acquisition", serde_json::Value::Null).await;
    assert!(!reply.success);
    assert_eq!(reply.data["reason"], "stimulus_not_pre_generated");
    assert_eq!(reply.data["action"], "redirect_to_stimulus_generation");

    system.shutdown().await;
}

/// E6: a short acquisition (single direction, one cycle, near-zero
/// baselines) runs the full phase sequence to completion.
#[tokio::test]
async fn short_acquisition_runs_phase_sequence_to_completion() {
    let dir = tempdir().unwrap();
    let system = System::start(dir.path()).await.unwrap();

    let mut values = isi_macroscope::param::ParamGroup::new();
    values.insert("baseline_sec".to_string(), serde_json::from_value(serde_json::json!(0.05)).unwrap());
    values.insert("between_sec".to_string(), serde_json::from_value(serde_json::json!(0.05)).unwrap());
    values.insert("cycles".to_string(), serde_json::from_value(serde_json::json!(1)).unwrap());
    values.insert(
        "directions".to_string(),
        serde_json::from_value(serde_json::json!(["LR"])).unwrap(),
    );
    system.params.update("acquisition", values).unwrap();

    // A very fast drift speed keeps the generated sweep to a handful of
    // frames so the stimulus phase finishes almost immediately.
    let mut stimulus_values = isi_macroscope::param::ParamGroup::new();
    stimulus_values.insert(
        "drift_speed_deg_per_sec".to_string(),
        serde_json::from_value(serde_json::json!(5000.0)).unwrap(),
    );
    system.params.update("stimulus", stimulus_values).unwrap();

    system.playback.pre_generate_all(&[Direction::LR]).unwrap();

    system.orchestrator.start_acquisition().await.unwrap();

    let mut reached_complete = false;
    for _ in 0..200 {
        if system.orchestrator.phase() == Phase::Idle && reached_complete {
            break;
        }
        if system.orchestrator.phase() == Phase::Stimulus {
            reached_complete = true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(reached_complete, "acquisition never reached the stimulus phase");

    system.shutdown().await;
}

/// Detecting cameras through the control channel reports the mock
/// inventory's fixed two devices.
#[tokio::test]
async fn detect_cameras_reports_mock_inventory() {
    let dir = tempdir().unwrap();
    let system = System::start(dir.path()).await.unwrap();

    let reply = dispatch(&system, "detect_cameras", serde_json::Value::Null).await;
    assert!(reply.success);
    assert_eq!(reply.data.as_array().unwrap().len(), 2);

    system.shutdown().await;
}
