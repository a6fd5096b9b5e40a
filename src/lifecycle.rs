//! Lifecycle Orchestrator (spec.md §4.12): the composition root. Loads
//! parameters, detects hardware, validates the selected camera/display
//! against what was actually detected, wires every component leaf-first via
//! explicit dependency injection, registers the control dispatch table, and
//! runs the control-channel event loop until shutdown.
//!
//! Grounded on the teacher's `app_actor` startup sequence: build components
//! bottom-up, hand each its dependencies directly (no service locator), tear
//! down in the reverse order on the way out.

use crate::acquisition::recorder::SessionSummary;
use crate::acquisition::{Mode, ModeController, Orchestrator, Recorder};
use crate::analysis::SessionResult;
use crate::bus::{ControlBus, ControlReply, HealthBus, HealthState, SyncBus, SyncEvent};
use crate::camera::{CameraCapture, CameraDriver, MockCameraDriver};
use crate::error::{IsiError, Result};
use crate::param::{ParamGroup, ParameterStore, ParamValue};
use crate::shmem::SharedFrameChannel;
use crate::stimulus::PlaybackEngine;
use crate::types::Direction;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

const CAMERA_CHANNEL_CAPACITY: u64 = 64 * 1024 * 1024;
const STIMULUS_CHANNEL_CAPACITY: u64 = 64 * 1024 * 1024;
const ANALYSIS_CHANNEL_CAPACITY: u64 = 64 * 1024 * 1024;
const HEALTH_PUBLISH_INTERVAL: Duration = Duration::from_secs(1);

/// Cached results keyed by session path, shared between `start_analysis`'s
/// background task and `get_analysis_results`/`get_analysis_composite_image`.
type AnalysisResults = Arc<Mutex<HashMap<String, SessionResult>>>;

/// Everything the running system owns, held so shutdown can tear it down in
/// reverse order.
pub struct System {
    pub params: Arc<ParameterStore>,
    pub sync_bus: SyncBus,
    pub health_bus: Arc<HealthBus>,
    pub control_bus: Arc<ControlBus>,
    pub playback: Arc<PlaybackEngine>,
    pub capture: Arc<CameraCapture<MockCameraDriver>>,
    pub recorder: Arc<Recorder>,
    pub orchestrator: Arc<Orchestrator>,
    pub mode: Arc<ModeController>,
    health_task: tokio::task::JoinHandle<()>,
}

/// Validates that `selected` (read from `group`'s `selected_key`) is present
/// among `available`. There is no "first available" fallback — an
/// unconfigured or stale selection is always a startup failure (spec.md
/// §4.12).
fn validate_selected(component: &str, selected: &str, available: &[String]) -> Result<()> {
    if available.iter().any(|id| id == selected) {
        Ok(())
    } else {
        Err(IsiError::HardwareUnavailable {
            component: component.to_string(),
            name: selected.to_string(),
        })
    }
}

impl System {
    /// Boots the full system against `output_dir` for recordings, using the
    /// bootstrap parameter defaults (an external loader populating the
    /// store from a real config file is out of scope, per spec.md §1).
    pub async fn start(output_dir: impl AsRef<Path>) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        let params = Arc::new(ParameterStore::new(crate::param::defaults::bootstrap()));
        let sync_bus = SyncBus::default();
        let health_bus = HealthBus::new();

        let camera_driver = Arc::new(MockCameraDriver::new());
        let detected = camera_driver.detect(true, false).await?;
        let camera_group = params.validate_group_complete("camera")?;
        let selected_camera = camera_group
            .get("selected_camera")
            .and_then(ParamValue::as_str)
            .ok_or_else(|| IsiError::missing_parameter("camera", "selected_camera"))?;
        validate_selected(
            "camera",
            selected_camera,
            &detected.iter().map(|d| d.id.clone()).collect::<Vec<_>>(),
        )?;
        health_bus.set("camera", HealthState::Online, None);

        let monitor_group = params.validate_group_complete("monitor")?;
        let selected_display = monitor_group
            .get("selected_display")
            .and_then(ParamValue::as_str)
            .ok_or_else(|| IsiError::missing_parameter("monitor", "selected_display"))?;
        let available_displays = monitor_group
            .get("available_displays")
            .and_then(ParamValue::as_str_list)
            .map(|list| list.to_vec())
            .unwrap_or_default();
        validate_selected("display", selected_display, &available_displays)?;
        health_bus.set("display", HealthState::Online, None);

        std::fs::create_dir_all(&output_dir)?;
        let camera_channel = Arc::new(SharedFrameChannel::create(
            &output_dir.join("camera_frames.shm"),
            CAMERA_CHANNEL_CAPACITY,
        )?);
        let stimulus_channel = Arc::new(SharedFrameChannel::create(
            &output_dir.join("stimulus_frames.shm"),
            STIMULUS_CHANNEL_CAPACITY,
        )?);
        let analysis_channel = Arc::new(SharedFrameChannel::create(
            &output_dir.join("analysis_frames.shm"),
            ANALYSIS_CHANNEL_CAPACITY,
        )?);

        let playback = PlaybackEngine::new(params.clone(), stimulus_channel, sync_bus.clone());
        let capture = CameraCapture::new(camera_driver, params.clone(), camera_channel, sync_bus.clone());
        let recorder = Arc::new(Recorder::new(&output_dir));
        capture.set_record_sink(Some(recorder.clone() as Arc<dyn crate::camera::RecordSink>));

        let orchestrator = Arc::new(Orchestrator::new(params.clone(), playback.clone(), recorder.clone(), sync_bus.clone()));
        let mode = Arc::new(ModeController::new(playback.clone(), orchestrator.clone()));

        params.subscribe("monitor", {
            let playback = playback.clone();
            move |group, partial| playback.on_parameter_update(group, partial)
        });
        params.subscribe("stimulus", {
            let playback = playback.clone();
            move |group, partial| playback.on_parameter_update(group, partial)
        });

        // spec.md §4.9's critical correctness rule: every group an
        // in-progress acquisition depends on must warn on a mid-run change,
        // not just the stimulus library's own invalidation check above.
        for group in ["monitor", "stimulus", "camera", "acquisition", "analysis"] {
            params.subscribe(group, {
                let orchestrator = orchestrator.clone();
                move |group, partial| orchestrator.warn_on_parameter_update(group, partial)
            });
        }

        let health_task = health_bus.spawn_periodic(HEALTH_PUBLISH_INTERVAL);
        let analysis_cancel = Arc::new(AtomicBool::new(false));
        let analysis_results: AnalysisResults = Arc::new(Mutex::new(HashMap::new()));
        let control_bus = Arc::new(build_control_bus(
            params.clone(),
            playback.clone(),
            capture.clone(),
            orchestrator.clone(),
            mode.clone(),
            output_dir.clone(),
            sync_bus.clone(),
            analysis_channel,
            analysis_cancel,
            analysis_results,
        ));

        health_bus.set("lifecycle", HealthState::Online, None);
        info!("system started, output directory {}", output_dir.display());

        Ok(Self {
            params,
            sync_bus,
            health_bus,
            control_bus,
            playback,
            capture,
            recorder,
            orchestrator,
            mode,
            health_task,
        })
    }

    /// Runs the control-channel event loop until `rx` closes.
    pub async fn run(&self, rx: mpsc::Receiver<(crate::bus::ControlRequest, tokio::sync::oneshot::Sender<ControlReply>)>) {
        self.control_bus.serve(rx).await;
    }

    /// Tears down in reverse construction order: stop acquisition and
    /// playback before dropping the channels they write into, then stop the
    /// capture loop, then the health publisher.
    pub async fn shutdown(self) {
        self.orchestrator.stop_acquisition().await;
        self.playback.stop_playback();
        let _ = self.capture.stop().await;
        self.health_task.abort();
        info!("system shutdown complete");
    }
}

fn now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

fn group_field(payload: &serde_json::Value, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn parse_partial(payload: &serde_json::Value, key: &str) -> std::result::Result<ParamGroup, ControlReply> {
    match payload.get(key).cloned() {
        Some(v) => serde_json::from_value(v).map_err(|err| ControlReply::err(err.to_string())),
        None => Err(ControlReply::err(format!("missing '{key}' field"))),
    }
}

fn parse_direction(payload: &serde_json::Value) -> Option<Direction> {
    payload.get("direction").and_then(|v| v.as_str()).and_then(|s| s.parse::<Direction>().ok())
}

#[allow(clippy::too_many_arguments)]
fn build_control_bus(
    params: Arc<ParameterStore>,
    playback: Arc<PlaybackEngine>,
    capture: Arc<CameraCapture<MockCameraDriver>>,
    orchestrator: Arc<Orchestrator>,
    mode: Arc<ModeController>,
    output_dir: std::path::PathBuf,
    sync_bus: SyncBus,
    analysis_channel: Arc<SharedFrameChannel>,
    analysis_cancel: Arc<AtomicBool>,
    analysis_results: AnalysisResults,
) -> ControlBus {
    let mut bus = ControlBus::new();

    bus.register("ping", |_| Box::pin(async { ControlReply::ok(serde_json::json!("pong")) }));

    bus.register("get_all_parameters", {
        let params = params.clone();
        move |_| {
            let params = params.clone();
            Box::pin(async move { ControlReply::ok(serde_json::to_value(params.get_all()).unwrap_or_default()) })
        }
    });

    bus.register("get_parameter_group", {
        let params = params.clone();
        move |payload| {
            let params = params.clone();
            Box::pin(async move {
                let Some(group) = group_field(&payload, "group_name") else {
                    return ControlReply::err("missing 'group_name' field");
                };
                match params.get(&group) {
                    Ok(snapshot) => ControlReply::ok(serde_json::to_value(snapshot).unwrap_or_default()),
                    Err(err) => ControlReply::from(&err),
                }
            })
        }
    });

    bus.register("update_parameter_group", {
        let params = params.clone();
        let sync_bus = sync_bus.clone();
        move |payload| {
            let params = params.clone();
            let sync_bus = sync_bus.clone();
            Box::pin(async move {
                let Some(group) = group_field(&payload, "group_name") else {
                    return ControlReply::err("missing 'group_name' field");
                };
                let partial = match parse_partial(&payload, "parameters") {
                    Ok(p) => p,
                    Err(reply) => return reply,
                };
                match params.update(&group, partial) {
                    Ok(()) => {
                        sync_bus.publish(SyncEvent::ParameterGroupUpdated { group });
                        ControlReply::ok_empty()
                    }
                    Err(err) => ControlReply::from(&err),
                }
            })
        }
    });

    bus.register("detect_cameras", {
        let capture = capture.clone();
        move |payload| {
            let capture = capture.clone();
            Box::pin(async move {
                let force = payload.get("force").and_then(|v| v.as_bool()).unwrap_or(false);
                match capture.detect_cameras(true, force).await {
                    Ok(cameras) => ControlReply::ok(serde_json::to_value(cameras).unwrap_or_default()),
                    Err(err) => ControlReply::from(&err),
                }
            })
        }
    });

    bus.register("start_camera_acquisition", {
        let capture = capture.clone();
        let params = params.clone();
        move |payload| {
            let capture = capture.clone();
            let params = params.clone();
            Box::pin(async move {
                let camera_id = match group_field(&payload, "camera_name") {
                    Some(id) => id,
                    None => match params.get("camera").ok().and_then(|g| g.get("selected_camera").and_then(ParamValue::as_str).map(str::to_string)) {
                        Some(id) => id,
                        None => return ControlReply::err("no camera selected and no 'camera_name' given"),
                    },
                };
                match capture.start(&camera_id).await {
                    Ok(()) => ControlReply::ok_empty(),
                    Err(err) => ControlReply::from(&err),
                }
            })
        }
    });

    bus.register("stop_camera_acquisition", {
        let capture = capture.clone();
        move |_| {
            let capture = capture.clone();
            Box::pin(async move {
                match capture.stop().await {
                    Ok(()) => ControlReply::ok_empty(),
                    Err(err) => ControlReply::from(&err),
                }
            })
        }
    });

    bus.register("get_camera_histogram", {
        let capture = capture.clone();
        move |_| {
            let capture = capture.clone();
            Box::pin(async move {
                match capture.last_histogram() {
                    Some(bins) => ControlReply::ok(serde_json::json!({ "bins": bins })),
                    None => ControlReply::err("no histogram available yet"),
                }
            })
        }
    });

    bus.register("unified_stimulus_pre_generate", {
        let playback = playback.clone();
        move |_| {
            let playback = playback.clone();
            Box::pin(async move {
                match playback.pre_generate_all(&Direction::ALL) {
                    Ok(()) => ControlReply::ok(serde_json::json!({ "library_loaded": true })),
                    Err(err) => ControlReply::from(&err),
                }
            })
        }
    });

    bus.register("unified_stimulus_start_playback", {
        let playback = playback.clone();
        move |payload| {
            let playback = playback.clone();
            Box::pin(async move {
                let Some(direction) = parse_direction(&payload) else {
                    return ControlReply::err("missing or invalid 'direction'");
                };
                let fps = payload.get("monitor_fps").and_then(|v| v.as_f64()).unwrap_or(60.0);
                match playback.start_playback(direction, fps, false) {
                    Ok(()) => ControlReply::ok_empty(),
                    Err(err) => ControlReply::from(&err),
                }
            })
        }
    });

    bus.register("unified_stimulus_stop_playback", {
        let playback = playback.clone();
        move |_| {
            let playback = playback.clone();
            Box::pin(async move {
                playback.stop_playback();
                ControlReply::ok_empty()
            })
        }
    });

    bus.register("start_preview", {
        let playback = playback.clone();
        let params = params.clone();
        let mode = mode.clone();
        move |payload| {
            let playback = playback.clone();
            let params = params.clone();
            let mode = mode.clone();
            Box::pin(async move {
                let Some(direction) = parse_direction(&payload) else {
                    return ControlReply::err("missing or invalid 'direction'");
                };
                let fps = match params.get("monitor").ok().and_then(|g| g.get("monitor_fps").and_then(ParamValue::as_f64)) {
                    Some(fps) => fps,
                    None => return ControlReply::from(&IsiError::missing_parameter("monitor", "monitor_fps")),
                };
                mode.switch_to(Mode::Preview).await;
                match playback.start_playback(direction, fps, true) {
                    Ok(()) => ControlReply::ok_empty(),
                    Err(err) => ControlReply::from(&err),
                }
            })
        }
    });

    bus.register("stop_preview", {
        let playback = playback.clone();
        move |_| {
            let playback = playback.clone();
            Box::pin(async move {
                playback.stop_playback();
                ControlReply::ok_empty()
            })
        }
    });

    bus.register("update_preview_direction", {
        let playback = playback.clone();
        let params = params.clone();
        move |payload| {
            let playback = playback.clone();
            let params = params.clone();
            Box::pin(async move {
                let Some(direction) = parse_direction(&payload) else {
                    return ControlReply::err("missing or invalid 'direction'");
                };
                let fps = match params.get("monitor").ok().and_then(|g| g.get("monitor_fps").and_then(ParamValue::as_f64)) {
                    Some(fps) => fps,
                    None => return ControlReply::from(&IsiError::missing_parameter("monitor", "monitor_fps")),
                };
                match playback.start_playback(direction, fps, true) {
                    Ok(()) => ControlReply::ok_empty(),
                    Err(err) => ControlReply::from(&err),
                }
            })
        }
    });

    bus.register("start_acquisition", {
        let orchestrator = orchestrator.clone();
        let mode = mode.clone();
        move |_| {
            let orchestrator = orchestrator.clone();
            let mode = mode.clone();
            Box::pin(async move {
                mode.switch_to(Mode::Record).await;
                match orchestrator.start_acquisition().await {
                    Ok(()) => ControlReply::ok_empty(),
                    Err(err) => ControlReply::from(&err),
                }
            })
        }
    });

    bus.register("stop_acquisition", {
        let orchestrator = orchestrator.clone();
        move |_| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                orchestrator.stop_acquisition().await;
                ControlReply::ok_empty()
            })
        }
    });

    bus.register("set_acquisition_mode", {
        let mode = mode.clone();
        move |payload| {
            let mode = mode.clone();
            Box::pin(async move {
                let parsed = match payload.get("mode").and_then(|v| v.as_str()) {
                    Some("preview") => Some(Mode::Preview),
                    Some("record") => Some(Mode::Record),
                    Some("playback") => Some(Mode::Playback),
                    _ => None,
                };
                let Some(parsed) = parsed else {
                    return ControlReply::err("missing or invalid 'mode' (expected preview|record|playback)");
                };
                mode.switch_to(parsed).await;
                ControlReply::ok_empty()
            })
        }
    });

    bus.register("list_sessions", {
        let output_dir = output_dir.clone();
        move |_| {
            let output_dir = output_dir.clone();
            Box::pin(async move {
                match crate::acquisition::recorder::list_sessions(&output_dir) {
                    Ok(sessions) => ControlReply::ok(serde_json::json!(sessions
                        .iter()
                        .map(|s: &SessionSummary| serde_json::json!({
                            "session_id": s.session_id.to_string(),
                            "path": s.path.display().to_string(),
                        }))
                        .collect::<Vec<_>>())),
                    Err(err) => ControlReply::from(&err),
                }
            })
        }
    });

    bus.register("start_analysis", {
        let params = params.clone();
        let sync_bus = sync_bus.clone();
        let analysis_cancel = analysis_cancel.clone();
        let analysis_results = analysis_results.clone();
        move |payload| {
            let params = params.clone();
            let sync_bus = sync_bus.clone();
            let analysis_cancel = analysis_cancel.clone();
            let analysis_results = analysis_results.clone();
            Box::pin(async move {
                let Some(session_path) = group_field(&payload, "session_path") else {
                    return ControlReply::err("missing 'session_path' field");
                };
                analysis_cancel.store(false, Ordering::Relaxed);
                let path = std::path::PathBuf::from(&session_path);
                tokio::task::spawn_blocking(move || {
                    match crate::analysis::run_session(&path, &params, &sync_bus, None, Some(&analysis_cancel)) {
                        Ok(result) => {
                            analysis_results.lock().unwrap().insert(session_path, result);
                        }
                        Err(err) => {
                            tracing::warn!("analysis session failed: {err}");
                        }
                    }
                });
                ControlReply::ok_empty()
            })
        }
    });

    bus.register("stop_analysis", {
        let analysis_cancel = analysis_cancel.clone();
        move |_| {
            let analysis_cancel = analysis_cancel.clone();
            Box::pin(async move {
                analysis_cancel.store(true, Ordering::Relaxed);
                ControlReply::ok_empty()
            })
        }
    });

    bus.register("get_analysis_results", {
        let analysis_results = analysis_results.clone();
        move |payload| {
            let analysis_results = analysis_results.clone();
            Box::pin(async move {
                let Some(session_path) = group_field(&payload, "session_path") else {
                    return ControlReply::err("missing 'session_path' field");
                };
                match analysis_results.lock().unwrap().get(&session_path) {
                    Some(result) => ControlReply::ok(serde_json::json!({
                        "width": result.width,
                        "height": result.height,
                        "areas_found": result.areas.len(),
                    })),
                    None => ControlReply::err(format!("no analysis results for session '{session_path}'")),
                }
            })
        }
    });

    bus.register("get_analysis_composite_image", {
        let analysis_results = analysis_results.clone();
        let analysis_channel = analysis_channel.clone();
        let sync_bus = sync_bus.clone();
        move |payload| {
            let analysis_results = analysis_results.clone();
            let analysis_channel = analysis_channel.clone();
            let sync_bus = sync_bus.clone();
            Box::pin(async move {
                let Some(session_path) = group_field(&payload, "session_path") else {
                    return ControlReply::err("missing 'session_path' field");
                };
                let layers: Vec<String> = match payload.get("layers").and_then(|v| v.as_array()) {
                    Some(values) => values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
                    None => return ControlReply::err("missing 'layers' field"),
                };

                let results = analysis_results.lock().unwrap();
                let Some(result) = results.get(&session_path) else {
                    return ControlReply::err(format!("no analysis results for session '{session_path}'"));
                };
                match crate::analysis::composite_layers(result, &layers) {
                    Ok(image) => {
                        let width = image.width();
                        let height = image.height();
                        let meta = analysis_channel.publish(image.as_raw(), None, 0, now_us(), None, width, height);
                        sync_bus.publish(SyncEvent::SharedFrameMetadata(meta.clone()));
                        ControlReply::ok(serde_json::to_value(meta).unwrap_or_default())
                    }
                    Err(err) => ControlReply::from(&err),
                }
            })
        }
    });

    bus
}
