//! Synchronization Tracker (spec.md §4.7): rolling-window correlation
//! between stimulus-event and camera-frame timestamps. Purely observational
//! — it never influences acquisition, only reports on it.

use crate::bus::{SyncBus, SyncEvent};
use std::collections::VecDeque;
use std::sync::Mutex;

const WINDOW: usize = 256;

struct Window {
    stimulus_us: VecDeque<i64>,
    camera_us: VecDeque<i64>,
}

pub struct SyncTracker {
    window: Mutex<Window>,
    sync_bus: SyncBus,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationMetrics {
    pub matched_pairs: usize,
    pub mean_latency_us: f64,
    pub stddev_latency_us: f64,
    pub dropped: u64,
}

impl SyncTracker {
    pub fn new(sync_bus: SyncBus) -> Self {
        Self {
            window: Mutex::new(Window {
                stimulus_us: VecDeque::with_capacity(WINDOW),
                camera_us: VecDeque::with_capacity(WINDOW),
            }),
            sync_bus,
        }
    }

    pub fn observe_stimulus_event(&self, timestamp_us: i64) {
        let mut window = self.window.lock().unwrap();
        push_bounded(&mut window.stimulus_us, timestamp_us);
    }

    pub fn observe_camera_frame(&self, timestamp_us: i64) {
        let mut window = self.window.lock().unwrap();
        push_bounded(&mut window.camera_us, timestamp_us);
    }

    /// Matches each camera timestamp to its nearest stimulus timestamp
    /// within `±inter_frame_interval_us`; unmatched camera frames count as
    /// drops (spec.md §4.7).
    pub fn correlate(&self, inter_frame_interval_us: i64) -> CorrelationMetrics {
        let window = self.window.lock().unwrap();
        let stimulus: Vec<i64> = window.stimulus_us.iter().copied().collect();
        let camera: Vec<i64> = window.camera_us.iter().copied().collect();
        drop(window);

        let mut latencies = Vec::new();
        let mut dropped = 0u64;

        for &cam_ts in &camera {
            let nearest = stimulus
                .iter()
                .map(|&s| (s, (s - cam_ts).abs()))
                .min_by_key(|&(_, delta)| delta);

            match nearest {
                Some((stim_ts, delta)) if delta <= inter_frame_interval_us => {
                    latencies.push((cam_ts - stim_ts) as f64);
                }
                _ => dropped += 1,
            }
        }

        let matched_pairs = latencies.len();
        let mean = if matched_pairs == 0 {
            0.0
        } else {
            latencies.iter().sum::<f64>() / matched_pairs as f64
        };
        let variance = if matched_pairs == 0 {
            0.0
        } else {
            latencies.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / matched_pairs as f64
        };

        CorrelationMetrics {
            matched_pairs,
            mean_latency_us: mean,
            stddev_latency_us: variance.sqrt(),
            dropped,
        }
    }

    pub fn publish_correlation(&self, inter_frame_interval_us: i64) {
        let metrics = self.correlate(inter_frame_interval_us);
        self.sync_bus.publish(SyncEvent::CorrelationUpdate {
            mean_latency_us: metrics.mean_latency_us,
            stddev_latency_us: metrics.stddev_latency_us,
            dropped: metrics.dropped,
        });
    }

    pub fn reset(&self) {
        let mut window = self.window.lock().unwrap();
        window.stimulus_us.clear();
        window.camera_us.clear();
    }
}

fn push_bounded(deque: &mut VecDeque<i64>, value: i64) {
    if deque.len() == WINDOW {
        deque.pop_front();
    }
    deque.push_back(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matched_pairs_within_tolerance_are_counted() {
        let tracker = SyncTracker::new(SyncBus::default());
        tracker.observe_stimulus_event(1000);
        tracker.observe_camera_frame(1010);
        let metrics = tracker.correlate(50);
        assert_eq!(metrics.matched_pairs, 1);
        assert_eq!(metrics.dropped, 0);
        assert!((metrics.mean_latency_us - 10.0).abs() < 1e-9);
    }

    #[test]
    fn camera_frame_outside_tolerance_is_dropped() {
        let tracker = SyncTracker::new(SyncBus::default());
        tracker.observe_stimulus_event(1000);
        tracker.observe_camera_frame(5000);
        let metrics = tracker.correlate(50);
        assert_eq!(metrics.matched_pairs, 0);
        assert_eq!(metrics.dropped, 1);
    }

    #[test]
    fn window_is_bounded() {
        let tracker = SyncTracker::new(SyncBus::default());
        for i in 0..(WINDOW * 2) {
            tracker.observe_stimulus_event(i as i64);
        }
        let window = tracker.window.lock().unwrap();
        assert_eq!(window.stimulus_us.len(), WINDOW);
    }
}
