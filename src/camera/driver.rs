//! Camera Driver Wrapper contract (spec.md §4.6): device enumeration and
//! hardware-timestamped frame capture. Modeled as a trait so the mock
//! implementation and a future vendor SDK binding share one interface,
//! the way the teacher's `core::Instrument` trait abstracts over
//! heterogeneous hardware behind one async lifecycle.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CameraInfo {
    pub id: String,
    pub name: String,
    pub supports_hardware_timestamp: bool,
}

/// One captured frame with its hardware timestamp. `timestamp_ns` is
/// monotonic and nanosecond-precision per spec.md §4.6 — there is no
/// software-clock variant of this type, by design.
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    pub data: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
    pub timestamp_ns: i64,
    pub frame_index: u32,
}

/// A camera device. `start_capture`/`stop_capture` bracket a capture loop
/// that the driver itself owns; callers receive frames through the
/// `on_frame` callback rather than polling, mirroring the `Instrument`
/// trait's `data_stream` handoff.
#[async_trait]
pub trait CameraDriver: Send + Sync {
    /// Enumerates available devices. When `keep_first_open` is true, the
    /// first successfully opened handle is retained for reuse by a
    /// subsequent `start_capture`; this is an optimization, not a cache.
    /// `force` always re-enumerates, clearing any retained handle even if a
    /// prior `keep_first_open` call set one (spec.md §4.6).
    async fn detect(&self, keep_first_open: bool, force: bool) -> Result<Vec<CameraInfo>>;

    /// Opens (or reuses a retained handle for) `camera_id` and starts the
    /// capture loop, invoking `on_frame` for every captured frame. Returns
    /// once the loop has started; the loop itself runs until `stop`.
    async fn start_capture(
        &self,
        camera_id: &str,
        width_px: u32,
        height_px: u32,
        fps: f64,
        on_frame: Box<dyn Fn(CapturedFrame) + Send + Sync>,
    ) -> Result<()>;

    async fn stop_capture(&self) -> Result<()>;

    fn is_capturing(&self) -> bool;
}
