//! Sync channel: fire-and-forget broadcast of state-change events (spec.md
//! §4.3, §6). Nothing replies; a slow or absent subscriber never blocks a
//! publisher. Grounded on `tokio::sync::broadcast`, the same primitive the
//! teacher reaches for whenever one writer fans out to many readers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// The closed set of events a running system can announce. Every variant
/// corresponds to a named transition in spec.md §6; there is no generic
/// "other" catch-all by design — an event the table doesn't name doesn't get
/// published.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    ParameterGroupUpdated { group: String },
    StimulusPreGenerationStarted,
    StimulusPreGenerationCompleted,
    StimulusPreGenerationFailed { message: String },
    /// The retained stimulus library was dropped by a parameter update that
    /// invalidated it (spec.md §4.5 "Smart invalidation"); playback/preview
    /// must pre-generate again before it can run.
    StimulusLibraryInvalidated,
    StimulusPlaybackStarted { direction: String },
    StimulusPlaybackStopped { direction: String },
    CameraAcquisitionStarted,
    CameraAcquisitionStopped,
    /// Published at every phase transition (spec.md §4.9): the phase name,
    /// the 0-based index of the direction and cycle currently running (0 if
    /// not applicable to the phase), and elapsed seconds since
    /// `start_acquisition`.
    AcquisitionProgress {
        phase: String,
        direction_index: usize,
        cycle_index: usize,
        elapsed_sec: f64,
    },
    AcquisitionCompleted,
    AcquisitionAborted { reason: String },
    AnalysisStarted,
    AnalysisStageCompleted { stage: String },
    AnalysisCompleted,
    AnalysisFailed { stage: String, message: String },
    CameraHistogramUpdate { bins: Vec<u32> },
    CorrelationUpdate { mean_latency_us: f64, stddev_latency_us: f64, dropped: u64 },
    SharedFrameMetadata(crate::shmem::FrameMetadata),
}

/// Publish-only broadcast bus. Cloning is cheap and shares the underlying
/// channel, matching how the teacher's components each hold their own
/// `Sender` clone rather than a shared lock.
#[derive(Clone)]
pub struct SyncBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl SyncBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Returns the number of live subscribers it reached;
    /// zero is not an error, since nothing guarantees a listener exists.
    pub fn publish(&self, event: SyncEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

impl Default for SyncBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = SyncBus::default();
        let mut rx = bus.subscribe();
        bus.publish(SyncEvent::AcquisitionCompleted);
        let event = rx.recv().await.unwrap();
        assert_eq!(event, SyncEvent::AcquisitionCompleted);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = SyncBus::default();
        assert_eq!(bus.publish(SyncEvent::CameraAcquisitionStarted), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_the_event() {
        let bus = SyncBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(SyncEvent::AnalysisStarted);
        assert_eq!(a.recv().await.unwrap(), SyncEvent::AnalysisStarted);
        assert_eq!(b.recv().await.unwrap(), SyncEvent::AnalysisStarted);
    }
}
