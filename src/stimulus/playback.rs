//! Playback Engine (spec.md §4.5): pre-generates the stimulus library, then
//! plays a direction's frames at monitor FPS on its own task, publishing
//! each frame through the shared-frame channel.

use crate::bus::{SyncBus, SyncEvent};
use crate::error::{IsiError, Result};
use crate::param::ParameterStore;
use crate::shmem::SharedFrameChannel;
use crate::stimulus::generator::StimulusParams;
use crate::stimulus::library::StimulusLibrary;
use crate::types::Direction;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Generating,
    Ready,
    Playing,
}

struct RunningPlayback {
    direction: Direction,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns the stimulus library exclusively (spec.md §9 single-writer
/// ownership); external code only ever observes frames via the shared-frame
/// channel, never through this type directly.
pub struct PlaybackEngine {
    params: Arc<ParameterStore>,
    channel: Arc<SharedFrameChannel>,
    sync_bus: SyncBus,
    state: Mutex<PlaybackState>,
    library: Mutex<Option<StimulusLibrary>>,
    running: Mutex<Option<RunningPlayback>>,
}

impl PlaybackEngine {
    pub fn new(params: Arc<ParameterStore>, channel: Arc<SharedFrameChannel>, sync_bus: SyncBus) -> Arc<Self> {
        Arc::new(Self {
            params,
            channel,
            sync_bus,
            state: Mutex::new(PlaybackState::Idle),
            library: Mutex::new(None),
            running: Mutex::new(None),
        })
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.lock().unwrap()
    }

    /// Captures the current `monitor`/`stimulus` snapshot, builds the
    /// per-direction library, and publishes completion (spec.md §4.5).
    pub fn pre_generate_all(&self, directions: &[Direction]) -> Result<()> {
        *self.state.lock().unwrap() = PlaybackState::Generating;
        self.sync_bus.publish(SyncEvent::StimulusPreGenerationStarted);

        let monitor = self.params.get("monitor")?;
        let stimulus = self.params.get("stimulus")?;
        let result = StimulusLibrary::build(directions, monitor, stimulus);

        match result {
            Ok(library) => {
                *self.library.lock().unwrap() = Some(library);
                *self.state.lock().unwrap() = PlaybackState::Ready;
                self.sync_bus.publish(SyncEvent::StimulusPreGenerationCompleted);
                Ok(())
            }
            Err(err) => {
                *self.state.lock().unwrap() = PlaybackState::Idle;
                self.sync_bus.publish(SyncEvent::StimulusPreGenerationFailed {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    pub fn frame_count(&self, direction: Direction) -> Option<usize> {
        self.library.lock().unwrap().as_ref().and_then(|lib| lib.frame_count(direction))
    }

    pub fn is_ready_for(&self, direction: Direction) -> bool {
        self.library
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|lib| lib.get(direction).is_some())
    }

    /// Checks an invalidating parameter change against the retained
    /// library's snapshot; if invalidated, drops the library and forces the
    /// engine back to `idle` (spec.md §4.5 "Smart invalidation").
    pub fn on_parameter_update(&self, group: &str, partial: &crate::param::ParamGroup) {
        let mut library = self.library.lock().unwrap();
        let invalidated = library
            .as_ref()
            .is_some_and(|lib| lib.is_invalidated_by(group, partial));
        if invalidated {
            *library = None;
            drop(library);
            *self.state.lock().unwrap() = PlaybackState::Idle;
            self.sync_bus.publish(SyncEvent::StimulusLibraryInvalidated);
            warn!("stimulus library invalidated by update to '{group}'");
        }
    }

    /// Starts (or restarts, idempotently) a playback loop for `direction` at
    /// `fps`. `loop_forever = true` is preview mode; `false` plays the
    /// library exactly once (used during acquisition).
    pub fn start_playback(self: &Arc<Self>, direction: Direction, fps: f64, loop_forever: bool) -> Result<()> {
        self.stop_playback();

        if !self.is_ready_for(direction) {
            return Err(IsiError::stimulus_not_pre_generated("start_playback"));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let engine = self.clone();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            engine.run_playback_loop(direction, fps, loop_forever, loop_cancel).await;
        });

        *self.running.lock().unwrap() = Some(RunningPlayback {
            direction,
            cancel,
            handle,
        });
        *self.state.lock().unwrap() = PlaybackState::Playing;
        self.sync_bus.publish(SyncEvent::StimulusPlaybackStarted {
            direction: direction.to_string(),
        });
        Ok(())
    }

    async fn run_playback_loop(
        self: Arc<Self>,
        direction: Direction,
        fps: f64,
        loop_forever: bool,
        cancel: Arc<AtomicBool>,
    ) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs_f64(1.0 / fps));
        let mut index: usize = 0;

        loop {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            ticker.tick().await;
            if cancel.load(Ordering::Relaxed) {
                break;
            }

            let frame_and_angle = {
                let library = self.library.lock().unwrap();
                library.as_ref().and_then(|lib| lib.get(direction)).and_then(|frames| {
                    if index >= frames.frame_count() {
                        None
                    } else {
                        Some((frames.frames[index].clone(), frames.angles[index]))
                    }
                })
            };

            let Some((frame, angle)) = frame_and_angle else {
                if loop_forever {
                    index = 0;
                    continue;
                }
                break;
            };

            let meta = self.channel.publish(
                &frame,
                Some(direction.to_string()),
                index as u32,
                now_us(),
                Some(angle),
                0,
                0,
            );
            self.sync_bus.publish(SyncEvent::SharedFrameMetadata(meta));

            index += 1;
            if loop_forever {
                let count = {
                    let library = self.library.lock().unwrap();
                    library.as_ref().and_then(|lib| lib.get(direction)).map(|f| f.frame_count())
                };
                if count.is_some_and(|c| index >= c) {
                    index = 0;
                }
            }
        }

        *self.running.lock().unwrap() = None;
        *self.state.lock().unwrap() = PlaybackState::Ready;
        self.sync_bus.publish(SyncEvent::StimulusPlaybackStopped {
            direction: direction.to_string(),
        });
        info!("playback loop for {direction} exited");
    }

    /// Terminates the running loop and waits for it to exit, then publishes
    /// a neutral background frame (spec.md §4.5).
    pub fn stop_playback(&self) {
        let running = self.running.lock().unwrap().take();
        if let Some(running) = running {
            running.cancel.store(true, Ordering::Relaxed);
            running.handle.abort();
            let _ = running.direction;
        }
        self.display_baseline();
    }

    /// Publishes a single background-luminance frame (inter-trial / baseline).
    pub fn display_baseline(&self) {
        let monitor = match self.params.get("monitor") {
            Ok(m) => m,
            Err(_) => return,
        };
        let stimulus = match self.params.get("stimulus") {
            Ok(s) => s,
            Err(_) => return,
        };
        let Ok(params) = StimulusParams::from_params(&monitor, &stimulus) else {
            return;
        };

        let width = monitor
            .get("monitor_width_px")
            .and_then(crate::param::ParamValue::as_i64)
            .unwrap_or(0) as u32;
        let height = monitor
            .get("monitor_height_px")
            .and_then(crate::param::ParamValue::as_i64)
            .unwrap_or(0) as u32;

        let background = (params.background_luminance * 255.0).clamp(0.0, 255.0) as u8;
        let frame = vec![background; (width as usize) * (height as usize)];
        let meta = self.channel.publish(&frame, None, 0, now_us(), None, width, height);
        self.sync_bus.publish(SyncEvent::SharedFrameMetadata(meta));
        if *self.state.lock().unwrap() == PlaybackState::Playing {
            *self.state.lock().unwrap() = PlaybackState::Ready;
        }
    }
}

fn now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn engine() -> Arc<PlaybackEngine> {
        let params = Arc::new(ParameterStore::new(crate::param::defaults::bootstrap()));
        let dir = tempdir().unwrap();
        let channel = Arc::new(SharedFrameChannel::create(&dir.path().join("stim.bin"), 1 << 20).unwrap());
        PlaybackEngine::new(params, channel, SyncBus::default())
    }

    #[test]
    fn starts_idle() {
        assert_eq!(engine().state(), PlaybackState::Idle);
    }

    #[test]
    fn pre_generate_all_reaches_ready() {
        let engine = engine();
        engine.pre_generate_all(&[Direction::LR]).unwrap();
        assert_eq!(engine.state(), PlaybackState::Ready);
        assert!(engine.is_ready_for(Direction::LR));
        assert!(!engine.is_ready_for(Direction::RL));
    }

    #[tokio::test]
    async fn start_playback_without_pregeneration_fails() {
        let engine = engine();
        let err = engine.start_playback(Direction::LR, 60.0, true).unwrap_err();
        assert!(matches!(err, IsiError::PreconditionViolated { .. }));
    }

    #[tokio::test]
    async fn start_playback_transitions_to_playing() {
        eprintln!("DBG: begin");
        let engine = engine();
        eprintln!("DBG: engine built");
        engine.pre_generate_all(&[Direction::LR]).unwrap();
        eprintln!("DBG: pre_generate_all done");
        engine.start_playback(Direction::LR, 200.0, true).unwrap();
        eprintln!("DBG: start_playback done");
        assert_eq!(engine.state(), PlaybackState::Playing);
        eprintln!("DBG: state checked");
        engine.stop_playback();
        eprintln!("DBG: stop_playback done");
    }
}
