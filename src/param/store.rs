//! The parameter store: the system's single source of configuration truth.
//!
//! Every runtime read returns a coherent snapshot (spec.md §4.1); no
//! component is allowed to cache a default. `update` validates a partial
//! against the group's schema, merges it atomically under a short critical
//! section, persists the whole store to disk via temp-file-then-rename, and
//! then — outside the lock — calls every subscriber registered for that
//! group. A panicking subscriber is caught and logged; it never blocks its
//! siblings (spec.md §4.1).

use super::schema::{self, validate_complete, validate_partial};
use super::value::ParamGroup;
use crate::error::{IsiError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

/// Callback invoked after a group update commits: `(group_name, changed_partial)`.
pub type Subscriber = Arc<dyn Fn(&str, &ParamGroup) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct ParameterStore {
    groups: RwLock<HashMap<String, ParamGroup>>,
    subscribers: RwLock<HashMap<String, Vec<(SubscriptionId, Subscriber)>>>,
    next_id: AtomicU64,
    persist_path: Option<PathBuf>,
}

impl ParameterStore {
    /// Construct a store from an already-validated initial snapshot. The
    /// core never parses a parameter file itself (spec.md §1 names that an
    /// external collaborator's job) — callers hand in typed groups.
    pub fn new(initial: HashMap<String, ParamGroup>) -> Self {
        Self {
            groups: RwLock::new(initial),
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            persist_path: None,
        }
    }

    pub fn with_persist_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(path.into());
        self
    }

    /// Returns a coherent snapshot of `group`. Unknown groups are a fatal
    /// configuration error naming the group, matching the "no silent
    /// defaults" invariant.
    pub fn get(&self, group: &str) -> Result<ParamGroup> {
        self.groups
            .read()
            .get(group)
            .cloned()
            .ok_or_else(|| IsiError::invalid_parameter(group, "<group>", "unknown group"))
    }

    pub fn get_all(&self) -> HashMap<String, ParamGroup> {
        self.groups.read().clone()
    }

    /// Validate `partial` against the group's schema, merge it in under the
    /// lock, persist (if configured), then notify subscribers outside the
    /// lock.
    pub fn update(&self, group: &str, partial: ParamGroup) -> Result<()> {
        let schema = schema::schema_for(group)
            .ok_or_else(|| IsiError::invalid_parameter(group, "<group>", "unknown group"))?;
        validate_partial(group, schema, &partial)?;

        if group == "analysis" && partial.contains_key("gradient_window_size") {
            warn!(
                "analysis.gradient_window_size was written but is unused; \
                 gradients use central differences (spec.md §9)"
            );
        }

        {
            let mut groups = self.groups.write();
            let entry = groups.entry(group.to_string()).or_default();
            for (k, v) in &partial {
                entry.insert(k.clone(), v.clone());
            }
        }

        if let Some(path) = &self.persist_path {
            self.persist_to(path)?;
        }

        self.notify(group, &partial);
        Ok(())
    }

    /// Validate that `group`'s current snapshot has every required key
    /// present and in-bound. Used before starting an acquisition or
    /// pre-generation.
    pub fn validate_group_complete(&self, group: &str) -> Result<ParamGroup> {
        let schema = schema::schema_for(group)
            .ok_or_else(|| IsiError::invalid_parameter(group, "<group>", "unknown group"))?;
        let snapshot = self.get(group)?;
        validate_complete(group, schema, &snapshot)?;
        Ok(snapshot)
    }

    pub fn subscribe(
        &self,
        group: impl Into<String>,
        callback: impl Fn(&str, &ParamGroup) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .entry(group.into())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, group: &str, id: SubscriptionId) {
        if let Some(list) = self.subscribers.write().get_mut(group) {
            list.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    fn notify(&self, group: &str, partial: &ParamGroup) {
        let callbacks: Vec<Subscriber> = self
            .subscribers
            .read()
            .get(group)
            .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        for callback in callbacks {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(group, partial)));
            if result.is_err() {
                error!("parameter subscriber for group '{group}' panicked; continuing");
            }
        }
    }

    fn persist_to(&self, path: &Path) -> Result<()> {
        let snapshot = self.get_all();
        let json = serde_json::to_string_pretty(&snapshot)?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::value::ParamValue;

    fn store() -> ParameterStore {
        ParameterStore::new(crate::param::defaults::bootstrap())
    }

    #[test]
    fn get_returns_last_successful_update() {
        let store = store();
        let mut partial = ParamGroup::new();
        partial.insert("contrast".to_string(), ParamValue::Float(0.75));
        store.update("stimulus", partial).unwrap();
        assert_eq!(
            store.get("stimulus").unwrap().get("contrast"),
            Some(&ParamValue::Float(0.75))
        );
    }

    #[test]
    fn subscriber_registered_before_update_is_called_with_changed_partial() {
        let store = store();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let seen2 = seen.clone();
        store.subscribe("stimulus", move |group, partial| {
            *seen2.lock() = Some((group.to_string(), partial.clone()));
        });

        let mut partial = ParamGroup::new();
        partial.insert("contrast".to_string(), ParamValue::Float(0.5));
        store.update("stimulus", partial.clone()).unwrap();

        let (group, got) = seen.lock().clone().unwrap();
        assert_eq!(group, "stimulus");
        assert_eq!(got, partial);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let store = store();
        let called = Arc::new(parking_lot::Mutex::new(false));
        let called2 = called.clone();
        store.subscribe("stimulus", |_, _| panic!("boom"));
        store.subscribe("stimulus", move |_, _| *called2.lock() = true);

        let mut partial = ParamGroup::new();
        partial.insert("contrast".to_string(), ParamValue::Float(0.9));
        store.update("stimulus", partial).unwrap();

        assert!(*called.lock());
    }

    #[test]
    fn update_with_out_of_bound_value_fails_and_does_not_mutate() {
        let store = store();
        let before = store.get("stimulus").unwrap();
        let mut partial = ParamGroup::new();
        partial.insert("contrast".to_string(), ParamValue::Float(5.0));
        assert!(store.update("stimulus", partial).is_err());
        assert_eq!(store.get("stimulus").unwrap(), before);
    }

    #[test]
    fn unknown_group_get_is_an_error() {
        let store = store();
        assert!(store.get("nonexistent").is_err());
    }

    #[tracing_test::traced_test]
    #[test]
    fn writing_gradient_window_size_logs_an_unused_warning() {
        let store = store();
        let mut partial = ParamGroup::new();
        partial.insert("gradient_window_size".to_string(), ParamValue::Int(5));
        store.update("analysis", partial).unwrap();
        assert!(logs_contain("gradient_window_size was written but is unused"));
    }

    #[test]
    fn unsubscribe_stops_future_notifications() {
        let store = store();
        let called = Arc::new(parking_lot::Mutex::new(0));
        let called2 = called.clone();
        let id = store.subscribe("stimulus", move |_, _| {
            *called2.lock() += 1;
        });
        store.unsubscribe("stimulus", id);

        let mut partial = ParamGroup::new();
        partial.insert("contrast".to_string(), ParamValue::Float(0.3));
        store.update("stimulus", partial).unwrap();

        assert_eq!(*called.lock(), 0);
    }
}
