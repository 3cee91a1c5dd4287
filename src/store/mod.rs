//! Host state container.
//!
//! The [`Store`] owns the combined state and the [`ReducerManager`]. Plugins
//! only ever hand in reducer functions; state is written solely by
//! [`Store::dispatch`] and by slice attachment/removal.

mod reducer;

pub use reducer::{
    Action, CombinedReducer, CombinedState, Reducer, ReducerManager, ReducerSlice, SharedReducer,
};

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

/// The integration seam between the composition engine and the host's
/// global state container.
pub trait HostStore: Send + Sync {
    /// Attach or replace a reducer slice.
    fn add_reducer(&self, slice: ReducerSlice);

    /// Detach a reducer slice. Returns `true` if a slice was removed.
    fn remove_reducer(&self, key: &str) -> bool;

    /// Detach a reducer slice only while `owner` still owns it.
    fn remove_reducer_owned(&self, key: &str, owner: &str) -> bool;
}

#[derive(Default)]
struct StoreInner {
    reducers: ReducerManager,
    state: CombinedState,
}

/// Global store combining every attached slice.
///
/// Reducers run while the store lock is held and must not call back into
/// the store.
#[derive(Default)]
pub struct Store {
    inner: Mutex<StoreInner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Store")
            .field("reducers", &inner.reducers)
            .field("keys", &inner.state.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run an action through every live slice and return the new state.
    pub fn dispatch(&self, action: &Action) -> CombinedState {
        let mut inner = self.inner.lock();
        let next = inner.reducers.reduce(&inner.state, action);
        inner.state = next;
        inner.state.clone()
    }

    /// Snapshot of the whole combined state.
    pub fn state(&self) -> CombinedState {
        self.inner.lock().state.clone()
    }

    /// State of a single slice.
    pub fn slice(&self, key: &str) -> Option<Arc<Value>> {
        self.inner.lock().state.get(key).cloned()
    }

    /// Keys of the attached slices.
    pub fn slice_keys(&self) -> Vec<String> {
        self.inner.lock().reducers.keys().into_iter().map(str::to_string).collect()
    }

    /// Owner of an attached slice.
    pub fn slice_owner(&self, key: &str) -> Option<String> {
        self.inner.lock().reducers.owner(key).map(str::to_string)
    }

    /// Serialize the combined state, e.g. for persistence.
    pub fn to_json(&self) -> Value {
        let inner = self.inner.lock();
        Value::Object(
            inner.state.iter().map(|(key, value)| (key.clone(), value.as_ref().clone())).collect(),
        )
    }
}

impl HostStore for Store {
    /// The new reducer is initialized immediately with the slice's current
    /// state, so the key is present before the next dispatch.
    fn add_reducer(&self, slice: ReducerSlice) {
        let mut inner = self.inner.lock();
        let previous = inner.state.get(&slice.key).cloned();
        let initial = slice.reducer.reduce(previous.as_deref(), &Action::init());
        let key = slice.key.clone();

        inner.reducers.add_slice(slice);
        inner.state.insert(key, Arc::new(initial));
    }

    /// The key is purged from the state right away so no orphaned slice
    /// survives into a serialized snapshot.
    fn remove_reducer(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.reducers.remove(key).is_some();
        inner.state.remove(key);
        removed
    }

    fn remove_reducer_owned(&self, key: &str, owner: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.reducers.owner(key) {
            Some(current) if current == owner => {}
            Some(current) => {
                tracing::debug!(slice = %key, owner = %current, requested_by = %owner, "Slice owned by another plugin, keeping it");
                return false;
            }
            None => return false,
        }
        inner.reducers.remove(key);
        inner.state.remove(key);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn donor_reducer() -> SharedReducer {
        Arc::new(|state: Option<&Value>, action: &Action| {
            let mut state = state.cloned().unwrap_or_else(|| json!({ "donor": null }));
            if action.kind == "stock-donor/set" {
                state["donor"] = action.payload.clone();
            }
            state
        })
    }

    #[test]
    fn test_add_reducer_initializes_slice() {
        let store = Store::new();
        store.add_reducer(ReducerSlice::new("stock-donor", donor_reducer()));

        assert_eq!(store.slice("stock-donor").as_deref(), Some(&json!({ "donor": null })));
        assert_eq!(store.slice_keys(), vec!["stock-donor".to_string()]);
    }

    #[test]
    fn test_dispatch_updates_slice() {
        let store = Store::new();
        store.add_reducer(ReducerSlice::new("stock-donor", donor_reducer()));

        let state = store.dispatch(&Action::new("stock-donor/set", json!("UNICEF")));

        assert_eq!(*state["stock-donor"], json!({ "donor": "UNICEF" }));
        assert_eq!(store.to_json(), json!({ "stock-donor": { "donor": "UNICEF" } }));
    }

    #[test]
    fn test_replace_keeps_single_key_and_new_logic() {
        let store = Store::new();
        store.add_reducer(ReducerSlice::new("stock-donor", donor_reducer()));
        store.add_reducer(ReducerSlice::new(
            "stock-donor",
            Arc::new(|_: Option<&Value>, action: &Action| json!({ "last": action.kind })),
        ));

        let state = store.dispatch(&Action::new("stock-donor/set", json!("UNICEF")));

        assert_eq!(state.len(), 1);
        assert_eq!(*state["stock-donor"], json!({ "last": "stock-donor/set" }));
    }

    #[test]
    fn test_remove_reducer_purges_eagerly() {
        let store = Store::new();
        store.add_reducer(ReducerSlice::new("stock-donor", donor_reducer()));
        store.dispatch(&Action::new("stock-donor/set", json!("UNICEF")));

        assert!(store.remove_reducer("stock-donor"));
        assert!(store.state().is_empty());
        assert_eq!(store.to_json(), json!({}));

        let state = store.dispatch(&Action::new("stock-donor/set", json!("WHO")));
        assert!(!state.contains_key("stock-donor"));
        assert!(!store.remove_reducer("stock-donor"));
    }

    #[test]
    fn test_owned_removal_respects_new_owner() {
        let store = Store::new();
        store.add_reducer(ReducerSlice::new("shared", donor_reducer()).owned_by("plugin-a"));
        store.add_reducer(ReducerSlice::new("shared", donor_reducer()).owned_by("plugin-b"));

        assert!(!store.remove_reducer_owned("shared", "plugin-a"));
        assert_eq!(store.slice_owner("shared").as_deref(), Some("plugin-b"));
        assert!(store.slice("shared").is_some());

        assert!(store.remove_reducer_owned("shared", "plugin-b"));
        assert!(store.state().is_empty());
        assert!(!store.remove_reducer_owned("shared", "plugin-b"));
    }

    #[test]
    fn test_slice_owner() {
        let store = Store::new();
        store.add_reducer(ReducerSlice::new("donorState", donor_reducer()).owned_by("stock-donor"));
        assert_eq!(store.slice_owner("donorState").as_deref(), Some("stock-donor"));
        assert_eq!(store.slice_owner("missing"), None);
    }
}
