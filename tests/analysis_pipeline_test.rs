//! End-to-end analysis pipeline test: records synthetic sinusoidal frames
//! for all four directions via the real `Recorder`, then runs the full
//! session analysis against them.

use isi_macroscope::acquisition::Recorder;
use isi_macroscope::analysis::run_session;
use isi_macroscope::bus::{SyncBus, SyncEvent};
use isi_macroscope::param::ParameterStore;
use isi_macroscope::shmem::SharedFrameChannel;
use isi_macroscope::types::Direction;
use tempfile::tempdir;

const WIDTH: u32 = 8;
const HEIGHT: u32 = 8;
const N_FRAMES: usize = 32;

fn monitor_attrs(direction: Direction) -> isi_macroscope::acquisition::recorder::MonitorAttrs {
    let params = ParameterStore::new(isi_macroscope::param::defaults::bootstrap());
    let monitor = params.get("monitor").unwrap();
    let camera = params.get("camera").unwrap();
    isi_macroscope::acquisition::recorder::MonitorAttrs::from_params(&monitor, &camera, direction).unwrap()
}

fn record_synthetic_direction(recorder: &Recorder, direction: Direction) {
    recorder.start_recording(direction, WIDTH, HEIGHT);
    for t in 0..N_FRAMES {
        let theta = 2.0 * std::f64::consts::PI * t as f64 / N_FRAMES as f64;
        let value = (128.0 + 80.0 * theta.cos()) as u8;
        let frame = vec![value; (WIDTH * HEIGHT) as usize];
        recorder.record_camera_frame(direction, &frame, t as i64 * 1_000);
    }
    recorder.stop_recording(direction, monitor_attrs(direction)).unwrap();
}

#[test]
fn full_session_produces_vfs_within_range_and_respects_calibration_requirement() {
    let dir = tempdir().unwrap();
    let recorder = Recorder::new(dir.path());
    for &direction in &Direction::ALL {
        record_synthetic_direction(&recorder, direction);
    }

    let params = ParameterStore::new(isi_macroscope::param::defaults::bootstrap());
    let sync_bus = SyncBus::default();

    let result = run_session(dir.path(), &params, &sync_bus, None, None).unwrap();
    assert_eq!(result.width, WIDTH as usize);
    assert_eq!(result.height, HEIGHT as usize);
    assert!(result.raw_vfs.values.iter().all(|&v| (-1.0..=1.0).contains(&v)));

    // Default analysis params have no pixel_scale_mm_per_px calibrated, so
    // segmentation never ran: thresholded_vfs exists but no area list.
    assert!(result.areas.is_empty() || result.areas.iter().all(|a| a.area_mm2 > 0.0));
}

#[test]
fn rendered_layers_are_published_through_the_shared_frame_channel_when_wired() {
    let dir = tempdir().unwrap();
    let recorder = Recorder::new(dir.path());
    for &direction in &Direction::ALL {
        record_synthetic_direction(&recorder, direction);
    }

    let params = ParameterStore::new(isi_macroscope::param::defaults::bootstrap());
    let sync_bus = SyncBus::default();
    let mut sync_rx = sync_bus.subscribe();

    let shm_dir = tempdir().unwrap();
    let channel = SharedFrameChannel::create(&shm_dir.path().join("analysis.shm"), 1 << 24).unwrap();

    run_session(dir.path(), &params, &sync_bus, Some(&channel), None).unwrap();

    let mut published_directions = Vec::new();
    while let Ok(event) = sync_rx.try_recv() {
        if let SyncEvent::SharedFrameMetadata(meta) = event {
            if let Some(direction) = meta.direction {
                published_directions.push(direction);
            }
        }
    }
    for expected in ["azimuth", "elevation", "vfs"] {
        assert!(published_directions.contains(&expected.to_string()), "expected '{expected}' layer to be published, got {published_directions:?}");
    }
}

#[test]
fn missing_direction_container_is_a_hard_error() {
    let dir = tempdir().unwrap();
    let recorder = Recorder::new(dir.path());
    // Only record two of the four required directions.
    record_synthetic_direction(&recorder, Direction::LR);
    record_synthetic_direction(&recorder, Direction::RL);

    let params = ParameterStore::new(isi_macroscope::param::defaults::bootstrap());
    let sync_bus = SyncBus::default();

    let result = run_session(dir.path(), &params, &sync_bus, None, None);
    assert!(result.is_err());
}
