//! Capture orchestration (spec.md §4.6): wires a `CameraDriver` to the
//! shared-frame channel, the sync channel's histogram publish, and an
//! optional recorder sink.

use crate::bus::{SyncBus, SyncEvent};
use crate::camera::driver::{CameraDriver, CapturedFrame};
use crate::error::{IsiError, Result};
use crate::param::{ParameterStore, ParamValue};
use crate::shmem::SharedFrameChannel;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const HISTOGRAM_BINS: usize = 256;
const HISTOGRAM_INTERVAL_FRAMES: u64 = 3; // ~10 Hz at a 30 fps capture rate.

/// Receives `(frame_data, timestamp_us)` for every captured frame while
/// recording is active. The Recorder implements this; capture never knows
/// about buffers or disk.
pub trait RecordSink: Send + Sync {
    fn record_camera_frame(&self, data: &[u8], timestamp_us: i64, frame_index: u32);
}

pub struct CameraCapture<D: CameraDriver> {
    driver: Arc<D>,
    params: Arc<ParameterStore>,
    channel: Arc<SharedFrameChannel>,
    sync_bus: SyncBus,
    record_sink: Mutex<Option<Arc<dyn RecordSink>>>,
    frames_since_histogram: AtomicU64,
    last_histogram: Mutex<Option<Vec<u32>>>,
}

impl<D: CameraDriver + 'static> CameraCapture<D> {
    pub fn new(driver: Arc<D>, params: Arc<ParameterStore>, channel: Arc<SharedFrameChannel>, sync_bus: SyncBus) -> Arc<Self> {
        Arc::new(Self {
            driver,
            params,
            channel,
            sync_bus,
            record_sink: Mutex::new(None),
            frames_since_histogram: AtomicU64::new(0),
            last_histogram: Mutex::new(None),
        })
    }

    pub fn set_record_sink(&self, sink: Option<Arc<dyn RecordSink>>) {
        *self.record_sink.lock() = sink;
    }

    pub async fn detect_cameras(&self, keep_first_open: bool, force: bool) -> Result<Vec<crate::camera::driver::CameraInfo>> {
        self.driver.detect(keep_first_open, force).await
    }

    /// The most recently computed on-demand histogram, if capture has
    /// delivered enough frames to compute one yet (spec.md §4.6).
    pub fn last_histogram(&self) -> Option<Vec<u32>> {
        self.last_histogram.lock().clone()
    }

    /// Reads `camera_width_px`/`camera_height_px`/`camera_fps` from the
    /// parameter store and starts the capture loop (spec.md §4.6).
    pub async fn start(self: &Arc<Self>, camera_id: &str) -> Result<()> {
        let camera = self.params.get("camera")?;
        let width = require_i64(&camera, "camera_width_px")? as u32;
        let height = require_i64(&camera, "camera_height_px")? as u32;
        let fps = camera
            .get("camera_fps")
            .and_then(ParamValue::as_f64)
            .ok_or_else(|| IsiError::missing_parameter("camera", "camera_fps"))?;

        let this = self.clone();
        self.driver
            .start_capture(
                camera_id,
                width,
                height,
                fps,
                Box::new(move |frame| this.on_frame(frame)),
            )
            .await?;
        self.sync_bus.publish(SyncEvent::CameraAcquisitionStarted);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.driver.stop_capture().await?;
        self.sync_bus.publish(SyncEvent::CameraAcquisitionStopped);
        Ok(())
    }

    fn on_frame(&self, frame: CapturedFrame) {
        let timestamp_us = frame.timestamp_ns / 1_000;

        let meta = self.channel.publish(
            &frame.data,
            None,
            frame.frame_index,
            timestamp_us,
            None,
            frame.width_px,
            frame.height_px,
        );
        self.sync_bus.publish(SyncEvent::SharedFrameMetadata(meta));

        if let Some(sink) = self.record_sink.lock().clone() {
            sink.record_camera_frame(&frame.data, timestamp_us, frame.frame_index);
        }

        let n = self.frames_since_histogram.fetch_add(1, Ordering::Relaxed) + 1;
        if n >= HISTOGRAM_INTERVAL_FRAMES {
            self.frames_since_histogram.store(0, Ordering::Relaxed);
            let bins = histogram(&frame.data);
            *self.last_histogram.lock() = Some(bins.clone());
            self.sync_bus.publish(SyncEvent::CameraHistogramUpdate { bins });
        }
    }
}

fn histogram(data: &[u8]) -> Vec<u32> {
    let mut bins = vec![0u32; HISTOGRAM_BINS];
    for &byte in data {
        bins[byte as usize] += 1;
    }
    bins
}

fn require_i64(group: &crate::param::ParamGroup, key: &str) -> Result<i64> {
    group
        .get(key)
        .and_then(ParamValue::as_i64)
        .ok_or_else(|| IsiError::missing_parameter("camera", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::mock::MockCameraDriver;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    fn capture() -> Arc<CameraCapture<MockCameraDriver>> {
        let driver = Arc::new(MockCameraDriver::new());
        let params = Arc::new(ParameterStore::new(crate::param::defaults::bootstrap()));
        let dir = tempdir().unwrap();
        let channel = Arc::new(SharedFrameChannel::create(&dir.path().join("cam.bin"), 1 << 20).unwrap());
        CameraCapture::new(driver, params, channel, SyncBus::default())
    }

    #[tokio::test]
    async fn start_publishes_frame_metadata() {
        let capture = capture();
        let mut sync_rx = capture.sync_bus.subscribe();
        capture.start("cam0").await.unwrap();

        let mut saw_metadata = false;
        for _ in 0..20 {
            if let Ok(event) = tokio::time::timeout(std::time::Duration::from_millis(100), sync_rx.recv()).await {
                if matches!(event.unwrap(), SyncEvent::SharedFrameMetadata(_)) {
                    saw_metadata = true;
                    break;
                }
            }
        }
        capture.stop().await.unwrap();
        assert!(saw_metadata);
    }

    #[tokio::test]
    async fn record_sink_receives_frames_while_set() {
        struct CountingSink(Arc<AtomicUsize>);
        impl RecordSink for CountingSink {
            fn record_camera_frame(&self, _data: &[u8], _timestamp_us: i64, _frame_index: u32) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let capture = capture();
        let count = Arc::new(AtomicUsize::new(0));
        capture.set_record_sink(Some(Arc::new(CountingSink(count.clone()))));
        capture.start("cam0").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        capture.stop().await.unwrap();
        assert!(count.load(Ordering::Relaxed) > 0);
    }
}
