//! Health channel: periodic per-subsystem state publish (spec.md §4.3, §6),
//! grounded on the teacher's `health::monitor::{ModuleHealth, SystemHealth,
//! SystemHealthMonitor}` shape — one state per named module, aggregated and
//! broadcast on an interval so headless operation never fails silently.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Online,
    Degraded,
    Offline,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ModuleHealth {
    pub module: String,
    pub state: HealthState,
    pub detail: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SystemHealth {
    pub modules: Vec<ModuleHealth>,
}

/// Holds the last-reported state of every named module and broadcasts the
/// full table on a fixed interval. Modules report through `set`; nothing
/// about `set` itself is time-driven, so a module that dies stops updating
/// but the periodic tick keeps announcing its last known (stale) state —
/// callers detect that via `detail`/timestamps at a higher layer.
pub struct HealthBus {
    modules: RwLock<BTreeMap<String, ModuleHealth>>,
    tx: broadcast::Sender<SystemHealth>,
}

impl HealthBus {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(64);
        Arc::new(Self {
            modules: RwLock::new(BTreeMap::new()),
            tx,
        })
    }

    pub fn set(&self, module: impl Into<String>, state: HealthState, detail: Option<String>) {
        let module = module.into();
        self.modules.write().insert(
            module.clone(),
            ModuleHealth {
                module,
                state,
                detail,
            },
        );
    }

    pub fn snapshot(&self) -> SystemHealth {
        SystemHealth {
            modules: self.modules.read().values().cloned().collect(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SystemHealth> {
        self.tx.subscribe()
    }

    /// Spawn the periodic publisher. The returned handle aborts the task
    /// when dropped via `JoinHandle::abort` — callers that want it to
    /// outlive their own scope should hold the handle, not just the bus.
    pub fn spawn_periodic(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let _ = bus.tx.send(bus.snapshot());
            }
        })
    }
}

impl Default for HealthBus {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self {
            modules: RwLock::new(BTreeMap::new()),
            tx,
        }
    }
}
