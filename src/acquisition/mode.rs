//! Mode Controller (spec.md §4.11): mutually exclusive preview / record /
//! playback modes. Each transition tears down whatever the outgoing mode
//! owns before the new mode starts.

use crate::acquisition::orchestrator::Orchestrator;
use crate::stimulus::PlaybackEngine;
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Preview,
    Record,
    Playback,
}

pub struct ModeController {
    current: Mutex<Option<Mode>>,
    playback_engine: Arc<PlaybackEngine>,
    orchestrator: Arc<Orchestrator>,
}

impl ModeController {
    pub fn new(playback_engine: Arc<PlaybackEngine>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            current: Mutex::new(None),
            playback_engine,
            orchestrator,
        }
    }

    pub fn current(&self) -> Option<Mode> {
        *self.current.lock().unwrap()
    }

    /// Tears down whatever the previous mode owned, then records the switch
    /// (spec.md §4.11). Callers perform the new mode's own startup — e.g.
    /// `start_playback` for preview, `start_acquisition` for record —
    /// separately, after this returns.
    pub async fn switch_to(&self, mode: Mode) {
        let previous = { *self.current.lock().unwrap() };
        match previous {
            Some(Mode::Preview) => self.playback_engine.stop_playback(),
            Some(Mode::Record) => self.orchestrator.stop_acquisition().await,
            Some(Mode::Playback) | None => {}
        }
        *self.current.lock().unwrap() = Some(mode);
    }
}
