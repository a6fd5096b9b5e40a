//! Analysis Pipeline (spec.md §4.10): per-direction Fourier analysis,
//! bidirectional combine, frequency-domain smoothing, visual field sign,
//! thresholding, segmentation, and rendered colormap layers.

pub mod colormap;
pub mod combine;
pub mod fft;
pub mod pipeline;
pub mod segmentation;
pub mod smoothing;
pub mod vfs;

pub use fft::{analyze_direction, DirectionAnalysis};
pub use pipeline::{composite_layers, run_session, SessionResult};
pub use segmentation::{segment, Sign, VisualArea};
pub use smoothing::Map2D;
