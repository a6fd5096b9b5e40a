//! Camera Driver Wrapper (spec.md §4.6): device abstraction, a mock
//! implementation, and the capture loop orchestration that feeds the
//! shared-frame channel, the histogram publish, and the recorder.

pub mod capture;
pub mod driver;
pub mod mock;

pub use capture::{CameraCapture, RecordSink};
pub use driver::{CameraDriver, CameraInfo, CapturedFrame};
pub use mock::MockCameraDriver;
