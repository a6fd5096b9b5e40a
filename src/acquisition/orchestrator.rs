//! Acquisition Orchestrator (spec.md §4.9): the phase state machine that
//! sequences baseline, per-direction stimulus sweeps, and inter-trial
//! baselines, cooperatively cancellable at every phase boundary.

use crate::acquisition::recorder::{MonitorAttrs, Recorder};
use crate::acquisition::sync_tracker::SyncTracker;
use crate::bus::{SyncBus, SyncEvent};
use crate::error::{IsiError, Result};
use crate::param::{ParamGroup, ParameterStore, ParamValue};
use crate::stimulus::PlaybackEngine;
use crate::types::Direction;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    InitialBaseline,
    Stimulus,
    BetweenTrials,
    FinalBaseline,
    Complete,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::InitialBaseline => "INITIAL_BASELINE",
            Phase::Stimulus => "STIMULUS",
            Phase::BetweenTrials => "BETWEEN_TRIALS",
            Phase::FinalBaseline => "FINAL_BASELINE",
            Phase::Complete => "COMPLETE",
        }
    }
}

struct Snapshot {
    monitor: ParamGroup,
    stimulus: ParamGroup,
    camera: ParamGroup,
    acquisition: ParamGroup,
}

/// Single-orchestrator-thread state machine (spec.md §5 "Acquisition phase
/// transitions are totally ordered").
pub struct Orchestrator {
    params: Arc<ParameterStore>,
    playback: Arc<PlaybackEngine>,
    recorder: Arc<Recorder>,
    sync_tracker: Arc<SyncTracker>,
    sync_bus: SyncBus,
    phase: Mutex<Phase>,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(params: Arc<ParameterStore>, playback: Arc<PlaybackEngine>, recorder: Arc<Recorder>, sync_bus: SyncBus) -> Self {
        Self {
            params,
            playback,
            recorder,
            sync_tracker: Arc::new(SyncTracker::new(sync_bus.clone())),
            sync_bus,
            phase: Mutex::new(Phase::Idle),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap()
    }

    fn set_phase(&self, phase: Phase, direction_index: usize, cycle_index: usize, start: Instant) {
        *self.phase.lock().unwrap() = phase;
        self.sync_bus.publish(SyncEvent::AcquisitionProgress {
            phase: phase.as_str().to_string(),
            direction_index,
            cycle_index,
            elapsed_sec: start.elapsed().as_secs_f64(),
        });
    }

    fn take_snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            monitor: self.params.validate_group_complete("monitor")?,
            stimulus: self.params.validate_group_complete("stimulus")?,
            camera: self.params.validate_group_complete("camera")?,
            acquisition: self.params.validate_group_complete("acquisition")?,
        })
    }

    /// Runs the full phase sequence to completion or cancellation. Fails
    /// fast with `stimulus_not_pre_generated` if the library doesn't cover
    /// every requested direction (spec.md §4.9, testable property 11).
    pub async fn start_acquisition(self: &Arc<Self>) -> Result<()> {
        if self.phase() != Phase::Idle {
            return Err(IsiError::PreconditionViolated {
                operation: "start_acquisition".into(),
                reason: "acquisition_already_running".into(),
                action: "stop_acquisition_first".into(),
            });
        }

        let snapshot = self.take_snapshot()?;
        let directions = parse_directions(&snapshot.acquisition)?;
        for &d in &directions {
            if !self.playback.is_ready_for(d) {
                return Err(IsiError::stimulus_not_pre_generated("start_acquisition"));
            }
        }

        self.cancel.store(false, Ordering::Relaxed);
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.run(snapshot, directions).await {
                warn!("acquisition aborted: {err}");
                this.sync_bus.publish(SyncEvent::AcquisitionAborted {
                    reason: err.to_string(),
                });
                *this.phase.lock().unwrap() = Phase::Idle;
            }
        });
        Ok(())
    }

    async fn run(self: &Arc<Self>, snapshot: Snapshot, directions: Vec<Direction>) -> Result<()> {
        let start = Instant::now();
        let baseline_sec = require_f64(&snapshot.acquisition, "baseline_sec")?;
        let between_sec = require_f64(&snapshot.acquisition, "between_sec")?;
        let cycles = require_i64(&snapshot.acquisition, "cycles")? as usize;
        let camera_fps = require_f64(&snapshot.camera, "camera_fps")?;
        let monitor_fps = require_f64(&snapshot.monitor, "monitor_fps")?;
        let width = require_i64(&snapshot.camera, "camera_width_px")? as u32;
        let height = require_i64(&snapshot.camera, "camera_height_px")? as u32;

        self.recorder.write_session_metadata(&self.params.get_all())?;

        self.set_phase(Phase::InitialBaseline, 0, 0, start);
        if !self.wait_baseline(baseline_sec).await {
            return Ok(());
        }
        self.recorder.capture_anatomical_snapshot(width, height)?;

        for (direction_index, &direction) in directions.iter().enumerate() {
            for cycle_index in 0..cycles.max(1) {
                if self.cancel.load(Ordering::Relaxed) {
                    self.abort_current(direction);
                    return Ok(());
                }

                self.set_phase(Phase::Stimulus, direction_index, cycle_index, start);
                self.run_stimulus_phase(direction, monitor_fps, camera_fps, width, height, &snapshot).await?;

                if self.cancel.load(Ordering::Relaxed) {
                    self.abort_current(direction);
                    return Ok(());
                }

                let is_last = direction_index == directions.len() - 1 && cycle_index == cycles.max(1) - 1;
                if !is_last {
                    self.set_phase(Phase::BetweenTrials, direction_index, cycle_index, start);
                    if !self.wait_baseline(between_sec).await {
                        return Ok(());
                    }
                }
            }
        }

        self.set_phase(Phase::FinalBaseline, directions.len().saturating_sub(1), cycles.saturating_sub(1), start);
        if !self.wait_baseline(baseline_sec).await {
            return Ok(());
        }

        self.set_phase(Phase::Complete, 0, 0, start);
        self.sync_bus.publish(SyncEvent::AcquisitionCompleted);
        *self.phase.lock().unwrap() = Phase::Idle;
        Ok(())
    }

    async fn wait_baseline(&self, duration_sec: f64) -> bool {
        self.playback.display_baseline();
        let step = Duration::from_millis(50);
        let mut waited = Duration::ZERO;
        let target = Duration::from_secs_f64(duration_sec.max(0.0));
        while waited < target {
            if self.cancel.load(Ordering::Relaxed) {
                *self.phase.lock().unwrap() = Phase::Idle;
                return false;
            }
            tokio::time::sleep(step).await;
            waited += step;
        }
        true
    }

    async fn run_stimulus_phase(
        &self,
        direction: Direction,
        monitor_fps: f64,
        camera_fps: f64,
        width: u32,
        height: u32,
        snapshot: &Snapshot,
    ) -> Result<()> {
        if !self.playback.is_ready_for(direction) {
            return Err(IsiError::stimulus_not_pre_generated("start_acquisition"));
        }

        self.recorder.start_recording(direction, width, height);
        self.sync_tracker.reset();

        // Camera frames reach the recorder directly through the capture
        // loop's `RecordSink` hookup (wired once at startup). This task only
        // needs to pick stimulus-frame metadata (carries `angle_deg`) off
        // the sync channel and turn it into stimulus events.
        let mut event_rx = self.sync_bus.subscribe();
        let recorder = self.recorder.clone();
        let capture_direction = direction;
        let forward_task = tokio::spawn(async move {
            while let Ok(event) = event_rx.recv().await {
                if let SyncEvent::SharedFrameMetadata(meta) = event {
                    if meta.direction.as_deref() == Some(capture_direction.as_str()) {
                        if let Some(angle) = meta.angle_deg {
                            recorder.record_stimulus_event(capture_direction, meta.timestamp_us, meta.frame_index, angle);
                        }
                    }
                }
            }
        });

        self.playback.start_playback(direction, monitor_fps, false)?;

        let duration = Duration::from_secs_f64(
            self.playback
                .frame_count(direction)
                .map(|count| count as f64 / camera_fps)
                .unwrap_or(0.0),
        );

        let mut elapsed = Duration::ZERO;
        let step = Duration::from_millis(100);
        while elapsed < duration {
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
            self.sync_tracker.publish_correlation((1_000_000.0 / camera_fps) as i64);
            tokio::time::sleep(step).await;
            elapsed += step;
        }

        self.playback.stop_playback();
        forward_task.abort();

        let attrs = MonitorAttrs::from_params(&snapshot.monitor, &snapshot.camera, direction)?;
        self.recorder.stop_recording(direction, attrs)?;
        Ok(())
    }

    fn abort_current(&self, direction: Direction) {
        self.playback.stop_playback();
        self.recorder.discard_recording(direction);
        *self.phase.lock().unwrap() = Phase::Idle;
        self.sync_bus.publish(SyncEvent::AcquisitionAborted {
            reason: "stop_acquisition".into(),
        });
    }

    /// Cooperative cancellation (spec.md §4.9): sets the flag checked at
    /// every phase boundary and inside the stimulus-phase loop header.
    pub async fn stop_acquisition(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// spec.md §4.9's critical correctness rule: a parameter change that
    /// lands mid-acquisition doesn't retroactively apply to the running
    /// sweep, so the operator needs a loud warning rather than silent
    /// drift between what was recorded and what the store now holds.
    pub fn warn_on_parameter_update(&self, group: &str, _partial: &ParamGroup) {
        if self.phase() != Phase::Idle {
            warn!("parameter group '{group}' updated mid-acquisition (phase {:?}); the running sweep keeps its snapshot", self.phase());
        }
    }
}

fn require_f64(group: &ParamGroup, key: &str) -> Result<f64> {
    group
        .get(key)
        .and_then(ParamValue::as_f64)
        .ok_or_else(|| IsiError::missing_parameter("acquisition", key))
}

fn require_i64(group: &ParamGroup, key: &str) -> Result<i64> {
    group
        .get(key)
        .and_then(ParamValue::as_i64)
        .ok_or_else(|| IsiError::missing_parameter("acquisition", key))
}

fn parse_directions(acquisition: &ParamGroup) -> Result<Vec<Direction>> {
    let raw = acquisition
        .get("directions")
        .and_then(ParamValue::as_str_list)
        .ok_or_else(|| IsiError::missing_parameter("acquisition", "directions"))?;
    raw.iter()
        .map(|s| {
            s.parse::<Direction>()
                .map_err(|_| IsiError::invalid_parameter("acquisition", "directions", format!("unknown direction '{s}'")))
        })
        .collect()
}
