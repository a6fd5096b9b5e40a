//! A synthetic camera used for development and tests, grounded on the
//! teacher's `instrument::mock::MockInstrument`: a `tokio::spawn`ed loop
//! ticking at the configured rate, pushing synthetic frames to a callback.

use crate::camera::driver::{CameraDriver, CameraInfo, CapturedFrame};
use crate::error::{IsiError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::info;

struct RunningCapture {
    handle: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
}

/// A fixed inventory of simulated devices. `no_hw_ts` names a device that
/// reports no hardware timestamp support, for exercising the hard-fail path
/// (spec.md §4.6, testable property 12).
pub struct MockCameraDriver {
    devices: Vec<CameraInfo>,
    running: Mutex<Option<RunningCapture>>,
    start_time: Instant,
    frame_counter: AtomicI64,
    /// The device id `detect(keep_first_open=true)` opened and retained, if
    /// any. `start_capture` reuses an already-running loop for this id
    /// instead of tearing it down and reopening (spec.md §4.6, testable
    /// property 13).
    retained: Mutex<Option<String>>,
    /// Counts genuine opens (a `detect` that retains a fresh handle, or a
    /// `start_capture` that isn't reusing one) so tests can observe that
    /// retention actually skips reopening.
    open_count: AtomicU64,
}

impl MockCameraDriver {
    pub fn new() -> Self {
        Self {
            devices: vec![
                CameraInfo {
                    id: "cam0".into(),
                    name: "Mock Camera 0".into(),
                    supports_hardware_timestamp: true,
                },
                CameraInfo {
                    id: "cam_no_hwts".into(),
                    name: "Mock Camera (no hw timestamps)".into(),
                    supports_hardware_timestamp: false,
                },
            ],
            running: Mutex::new(None),
            start_time: Instant::now(),
            frame_counter: AtomicI64::new(0),
            retained: Mutex::new(None),
            open_count: AtomicU64::new(0),
        }
    }

    pub fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::Relaxed)
    }
}

impl Default for MockCameraDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraDriver for MockCameraDriver {
    async fn detect(&self, keep_first_open: bool, force: bool) -> Result<Vec<CameraInfo>> {
        if force {
            *self.retained.lock() = None;
        }
        if keep_first_open {
            let mut retained = self.retained.lock();
            if retained.is_none() {
                if let Some(first) = self.devices.first() {
                    self.open_count.fetch_add(1, Ordering::Relaxed);
                    *retained = Some(first.id.clone());
                }
            }
        }
        Ok(self.devices.clone())
    }

    async fn start_capture(
        &self,
        camera_id: &str,
        width_px: u32,
        height_px: u32,
        fps: f64,
        on_frame: Box<dyn Fn(CapturedFrame) + Send + Sync>,
    ) -> Result<()> {
        let info = self
            .devices
            .iter()
            .find(|d| d.id == camera_id)
            .cloned()
            .ok_or_else(|| IsiError::HardwareUnavailable {
                component: "camera".into(),
                name: camera_id.into(),
            })?;

        if !info.supports_hardware_timestamp {
            return Err(IsiError::HardwareCapabilityMissing {
                device: info.id,
                capability: "hardware_timestamp".into(),
            });
        }

        let reuses_retained_handle = self.retained.lock().as_deref() == Some(camera_id);
        if reuses_retained_handle && self.is_capturing() {
            return Ok(());
        }

        self.stop_capture().await.ok();
        if !reuses_retained_handle {
            self.open_count.fetch_add(1, Ordering::Relaxed);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let loop_cancel = cancel.clone();
        let start_time = self.start_time;
        let frame_counter = Arc::new(AtomicI64::new(0));
        let camera_id = camera_id.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs_f64(1.0 / fps));
            loop {
                if loop_cancel.load(Ordering::Relaxed) {
                    break;
                }
                ticker.tick().await;
                if loop_cancel.load(Ordering::Relaxed) {
                    break;
                }

                let index = frame_counter.fetch_add(1, Ordering::Relaxed) as u32;
                let timestamp_ns = start_time.elapsed().as_nanos() as i64;
                let data = synthetic_frame(width_px, height_px, index);
                on_frame(CapturedFrame {
                    data,
                    width_px,
                    height_px,
                    timestamp_ns,
                    frame_index: index,
                });
            }
            info!("mock capture loop for {camera_id} exited");
        });

        *self.running.lock() = Some(RunningCapture { handle, cancel });
        Ok(())
    }

    async fn stop_capture(&self) -> Result<()> {
        if let Some(running) = self.running.lock().take() {
            running.cancel.store(true, Ordering::Relaxed);
            running.handle.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.running.lock().is_some()
    }
}

fn synthetic_frame(width_px: u32, height_px: u32, frame_index: u32) -> Vec<u8> {
    let phase = (frame_index % 256) as u8;
    vec![phase; (width_px as usize) * (height_px as usize)]
}
