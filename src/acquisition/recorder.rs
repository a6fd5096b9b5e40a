//! Recorder (spec.md §4.8): lock-free per-direction buffering of camera
//! frames and stimulus events, flushed to a binary container per direction
//! plus one session-level metadata document.
//!
//! Buffer append is grounded on `crossbeam_queue::SegQueue`, the same
//! lock-free structure the teacher's object-pool code (`daq-pool`) uses for
//! producer/consumer handoff without a mutex per push.

use crate::error::Result;
use crate::param::ParamGroup;
use crossbeam_queue::SegQueue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraHeader {
    pub width_px: u32,
    pub height_px: u32,
    pub frame_count: u32,
    pub dtype: String,
}

/// The monitor attributes required on both containers (spec.md §4.8
/// invariant) — the analysis pipeline inverts the spherical transform from
/// these, so they travel with the data rather than living only in session
/// metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorAttrs {
    pub monitor_fps: f64,
    pub monitor_width_px: i64,
    pub monitor_height_px: i64,
    pub monitor_distance_cm: f64,
    pub monitor_width_cm: f64,
    pub monitor_height_cm: f64,
    pub monitor_lateral_angle_deg: f64,
    pub monitor_tilt_angle_deg: f64,
    pub camera_fps: f64,
    pub direction: String,
}

impl MonitorAttrs {
    pub fn from_params(monitor: &ParamGroup, camera: &ParamGroup, direction: crate::types::Direction) -> Result<Self> {
        use crate::error::IsiError;
        use crate::param::ParamValue;

        let f = |group: &ParamGroup, key: &str| -> Result<f64> {
            group
                .get(key)
                .and_then(ParamValue::as_f64)
                .ok_or_else(|| IsiError::missing_parameter("monitor", key))
        };
        let i = |group: &ParamGroup, key: &str| -> Result<i64> {
            group
                .get(key)
                .and_then(ParamValue::as_i64)
                .ok_or_else(|| IsiError::missing_parameter("monitor", key))
        };

        Ok(Self {
            monitor_fps: f(monitor, "monitor_fps")?,
            monitor_width_px: i(monitor, "monitor_width_px")?,
            monitor_height_px: i(monitor, "monitor_height_px")?,
            monitor_distance_cm: f(monitor, "monitor_distance_cm")?,
            monitor_width_cm: f(monitor, "monitor_width_cm")?,
            monitor_height_cm: f(monitor, "monitor_height_cm")?,
            monitor_lateral_angle_deg: f(monitor, "monitor_lateral_angle_deg")?,
            monitor_tilt_angle_deg: f(monitor, "monitor_tilt_angle_deg")?,
            camera_fps: camera
                .get("camera_fps")
                .and_then(ParamValue::as_f64)
                .ok_or_else(|| IsiError::missing_parameter("camera", "camera_fps"))?,
            direction: direction.to_string(),
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraContainer {
    pub header: CameraHeader,
    pub frames: Vec<u8>,
    pub timestamps_us: Vec<i64>,
    pub attrs: MonitorAttrs,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StimulusContainer {
    pub timestamps_us: Vec<i64>,
    pub frame_indices: Vec<u32>,
    pub angles_deg: Vec<f32>,
    pub attrs: MonitorAttrs,
}

struct CameraFrameRecord {
    data: Vec<u8>,
    timestamp_us: i64,
}

struct StimulusEventRecord {
    timestamp_us: i64,
    frame_index: u32,
    angle_deg: f32,
}

struct DirectionBuffers {
    camera_frames: SegQueue<CameraFrameRecord>,
    stimulus_events: SegQueue<StimulusEventRecord>,
    width_px: u32,
    height_px: u32,
}

/// Exclusively owns the in-memory per-direction buffer until `stop_recording`
/// flushes it (spec.md §3 ownership invariant).
pub struct Recorder {
    output_dir: PathBuf,
    active: Mutex<HashMap<crate::types::Direction, DirectionBuffers>>,
    /// The direction currently being recorded, if any. The camera capture
    /// loop doesn't know about directions — it hands frames to the
    /// `RecordSink` impl below, which routes them to whichever direction is
    /// active. Only one direction records at a time (spec.md §4.9).
    current: Mutex<Option<crate::types::Direction>>,
    /// Identifies this recording session in the metadata document — the
    /// analysis pipeline has nothing else that ties a run's containers
    /// together once they're split across `{direction}_camera.bin` files.
    session_id: uuid::Uuid,
    /// The most recent camera frame observed via `RecordSink`, independent
    /// of whether a direction is currently recording. The anatomical
    /// reference frame is drawn from this during the acquisition's initial
    /// baseline (spec.md §3, §4.8).
    last_frame: Mutex<Option<Vec<u8>>>,
}

impl Recorder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            active: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            session_id: uuid::Uuid::new_v4(),
            last_frame: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    pub fn start_recording(&self, direction: crate::types::Direction, width_px: u32, height_px: u32) {
        self.active.lock().unwrap().insert(
            direction,
            DirectionBuffers {
                camera_frames: SegQueue::new(),
                stimulus_events: SegQueue::new(),
                width_px,
                height_px,
            },
        );
        *self.current.lock().unwrap() = Some(direction);
    }

    pub fn record_camera_frame(&self, direction: crate::types::Direction, data: &[u8], timestamp_us: i64) {
        if let Some(buffers) = self.active.lock().unwrap().get(&direction) {
            buffers.camera_frames.push(CameraFrameRecord {
                data: data.to_vec(),
                timestamp_us,
            });
        }
    }

    pub fn record_stimulus_event(&self, direction: crate::types::Direction, timestamp_us: i64, frame_index: u32, angle_deg: f32) {
        if let Some(buffers) = self.active.lock().unwrap().get(&direction) {
            buffers.stimulus_events.push(StimulusEventRecord {
                timestamp_us,
                frame_index,
                angle_deg,
            });
        }
    }

    /// Flushes `direction`'s buffers to `{direction}_camera.bin` and
    /// `{direction}_stimulus.bin` under the output directory.
    pub fn stop_recording(&self, direction: crate::types::Direction, attrs: MonitorAttrs) -> Result<()> {
        let buffers = self
            .active
            .lock()
            .unwrap()
            .remove(&direction)
            .expect("stop_recording called without a matching start_recording");

        let mut camera_timestamps = Vec::new();
        let mut frame_bytes = Vec::new();
        let mut frame_count = 0u32;
        while let Some(record) = buffers.camera_frames.pop() {
            camera_timestamps.push(record.timestamp_us);
            frame_bytes.extend_from_slice(&record.data);
            frame_count += 1;
        }

        let camera_container = CameraContainer {
            header: CameraHeader {
                width_px: buffers.width_px,
                height_px: buffers.height_px,
                frame_count,
                dtype: "u8".to_string(),
            },
            frames: frame_bytes,
            timestamps_us: camera_timestamps,
            attrs: attrs.clone(),
        };
        write_bincode(&self.output_dir.join(format!("{direction}_camera.bin")), &camera_container)?;

        let mut timestamps = Vec::new();
        let mut frame_indices = Vec::new();
        let mut angles = Vec::new();
        while let Some(event) = buffers.stimulus_events.pop() {
            timestamps.push(event.timestamp_us);
            frame_indices.push(event.frame_index);
            angles.push(event.angle_deg);
        }
        let stimulus_container = StimulusContainer {
            timestamps_us: timestamps,
            frame_indices,
            angles_deg: angles,
            attrs,
        };
        write_bincode(&self.output_dir.join(format!("{direction}_stimulus.bin")), &stimulus_container)?;

        let mut current = self.current.lock().unwrap();
        if *current == Some(direction) {
            *current = None;
        }
        Ok(())
    }

    pub fn discard_recording(&self, direction: crate::types::Direction) {
        self.active.lock().unwrap().remove(&direction);
        let mut current = self.current.lock().unwrap();
        if *current == Some(direction) {
            *current = None;
        }
    }

    /// Writes the session-level anatomical baseline frame.
    pub fn write_anatomical_image(&self, data: &[u8], width_px: u32, height_px: u32) -> Result<()> {
        #[derive(Serialize)]
        struct Anatomical<'a> {
            width_px: u32,
            height_px: u32,
            data: &'a [u8],
        }
        write_bincode(
            &self.output_dir.join("anatomical.bin"),
            &Anatomical { width_px, height_px, data },
        )
    }

    /// Writes the anatomical reference frame from the most recently observed
    /// camera frame. A no-op, not an error, if no frame has arrived yet —
    /// the anatomical image is a best-effort session artifact rather than a
    /// precondition of the acquisition itself.
    pub fn capture_anatomical_snapshot(&self, width_px: u32, height_px: u32) -> Result<()> {
        let Some(frame) = self.last_frame.lock().unwrap().clone() else {
            return Ok(());
        };
        self.write_anatomical_image(&frame, width_px, height_px)
    }

    /// Writes the session metadata document embedding every parameter group
    /// as captured at start-of-acquisition, named by this session's id so
    /// multiple sessions recorded under the same root don't collide.
    pub fn write_session_metadata(&self, groups: &HashMap<String, ParamGroup>) -> Result<()> {
        #[derive(Serialize)]
        struct SessionMetadata<'a> {
            session_id: uuid::Uuid,
            groups: &'a HashMap<String, ParamGroup>,
        }
        let json = serde_json::to_string_pretty(&SessionMetadata {
            session_id: self.session_id,
            groups,
        })?;
        let path = self.output_dir.join(format!("session_{}_metadata.json", self.session_id));
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// One session discovered under a sessions root by `list_sessions`.
#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub session_id: uuid::Uuid,
    pub path: PathBuf,
}

/// Enumerates sessions recorded under `root` by their metadata documents
/// (spec.md §6 `list_sessions`). A root that doesn't exist yet has no
/// sessions, not an error.
pub fn list_sessions(root: &Path) -> Result<Vec<SessionSummary>> {
    let mut sessions = Vec::new();
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return Ok(sessions),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(id) = name.strip_prefix("session_").and_then(|rest| rest.strip_suffix("_metadata.json")) {
            if let Ok(session_id) = id.parse::<uuid::Uuid>() {
                sessions.push(SessionSummary {
                    session_id,
                    path: root.to_path_buf(),
                });
            }
        }
    }
    sessions.sort_by_key(|s| s.session_id);
    Ok(sessions)
}

fn write_bincode<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    std::fs::create_dir_all(path.parent().unwrap_or_else(|| Path::new(".")))?;
    let bytes = bincode::serialize(value)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl crate::camera::RecordSink for Recorder {
    fn record_camera_frame(&self, data: &[u8], timestamp_us: i64, frame_index: u32) {
        *self.last_frame.lock().unwrap() = Some(data.to_vec());
        let Some(direction) = *self.current.lock().unwrap() else {
            return;
        };
        self.record_camera_frame(direction, data, timestamp_us);
        let _ = frame_index;
    }
}

pub fn read_camera_container(path: &Path) -> Result<CameraContainer> {
    let bytes = std::fs::read(path)?;
    Ok(bincode::deserialize(&bytes)?)
}

pub fn read_stimulus_container(path: &Path) -> Result<StimulusContainer> {
    let bytes = std::fs::read(path)?;
    Ok(bincode::deserialize(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use tempfile::tempdir;

    fn attrs() -> MonitorAttrs {
        MonitorAttrs {
            monitor_fps: 60.0,
            monitor_width_px: 1920,
            monitor_height_px: 1080,
            monitor_distance_cm: 10.0,
            monitor_width_cm: 60.0,
            monitor_height_cm: 34.0,
            monitor_lateral_angle_deg: 30.0,
            monitor_tilt_angle_deg: 0.0,
            camera_fps: 30.0,
            direction: "LR".to_string(),
        }
    }

    #[test]
    fn round_trip_preserves_timestamps_and_attrs() {
        let dir = tempdir().unwrap();
        let recorder = Recorder::new(dir.path());
        recorder.start_recording(Direction::LR, 4, 4);
        recorder.record_camera_frame(Direction::LR, &[1u8; 16], 1_000);
        recorder.record_camera_frame(Direction::LR, &[2u8; 16], 2_000);
        recorder.record_stimulus_event(Direction::LR, 1_000, 0, 10.0);
        recorder.record_stimulus_event(Direction::LR, 2_000, 1, 11.0);
        recorder.stop_recording(Direction::LR, attrs()).unwrap();

        let camera = read_camera_container(&dir.path().join("LR_camera.bin")).unwrap();
        assert_eq!(camera.header.frame_count, 2);
        assert_eq!(camera.timestamps_us.len(), 2);
        assert_eq!(camera.attrs.monitor_fps, 60.0);

        let stimulus = read_stimulus_container(&dir.path().join("LR_stimulus.bin")).unwrap();
        assert_eq!(stimulus.timestamps_us, vec![1_000, 2_000]);
        assert_eq!(stimulus.frame_indices, vec![0, 1]);
        assert_eq!(stimulus.angles_deg, vec![10.0, 11.0]);
    }

    #[test]
    fn discard_recording_drops_buffer_without_writing() {
        let dir = tempdir().unwrap();
        let recorder = Recorder::new(dir.path());
        recorder.start_recording(Direction::RL, 4, 4);
        recorder.record_camera_frame(Direction::RL, &[1u8; 16], 1_000);
        recorder.discard_recording(Direction::RL);
        assert!(!dir.path().join("RL_camera.bin").exists());
    }

    #[test]
    fn anatomical_snapshot_is_a_no_op_before_any_frame_arrives() {
        let dir = tempdir().unwrap();
        let recorder = Recorder::new(dir.path());
        recorder.capture_anatomical_snapshot(4, 4).unwrap();
        assert!(!dir.path().join("anatomical.bin").exists());
    }

    #[test]
    fn anatomical_snapshot_uses_the_last_frame_observed_through_record_sink() {
        use crate::camera::RecordSink;
        let dir = tempdir().unwrap();
        let recorder = Recorder::new(dir.path());
        RecordSink::record_camera_frame(&recorder, &[9u8; 16], 1_000, 0);
        recorder.capture_anatomical_snapshot(4, 4).unwrap();
        assert!(dir.path().join("anatomical.bin").exists());
    }

    #[test]
    fn list_sessions_finds_every_session_metadata_document() {
        let dir = tempdir().unwrap();
        let first = Recorder::new(dir.path());
        first.write_session_metadata(&HashMap::new()).unwrap();
        let second = Recorder::new(dir.path());
        second.write_session_metadata(&HashMap::new()).unwrap();

        let sessions = list_sessions(dir.path()).unwrap();
        assert_eq!(sessions.len(), 2);
        let ids: Vec<_> = sessions.iter().map(|s| s.session_id).collect();
        assert!(ids.contains(&first.session_id()));
        assert!(ids.contains(&second.session_id()));
    }

    #[test]
    fn list_sessions_on_a_missing_root_is_empty_not_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does_not_exist");
        assert!(list_sessions(&missing).unwrap().is_empty());
    }
}
