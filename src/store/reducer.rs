//! Reducer composition.
//!
//! Each plugin may own one named slice of the combined state. The
//! [`ReducerManager`] keeps the live slices and rebuilds a
//! [`CombinedReducer`] whenever the set changes. A combined reducer is
//! immutable, so a dispatch always sees one consistent slice map.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Combined state: slice key to slice state.
///
/// Slice states are reference counted so a dispatch that leaves a slice
/// alone hands back the same allocation.
pub type CombinedState = BTreeMap<String, Arc<Value>>;

/// A dispatched action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action type, e.g. `stock-donor/setDonor`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Action payload.
    #[serde(default)]
    pub payload: Value,
}

impl Action {
    /// Action type sent to a reducer when its slice is (re)attached.
    pub const INIT: &'static str = "@@composer/INIT";

    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self { kind: kind.into(), payload }
    }

    /// The initialization action.
    pub fn init() -> Self {
        Self::new(Self::INIT, Value::Null)
    }
}

/// A pure state transition for one slice.
///
/// `state` is `None` the first time the slice is reduced.
pub trait Reducer: Send + Sync {
    fn reduce(&self, state: Option<&Value>, action: &Action) -> Value;
}

impl<F> Reducer for F
where
    F: Fn(Option<&Value>, &Action) -> Value + Send + Sync,
{
    fn reduce(&self, state: Option<&Value>, action: &Action) -> Value {
        self(state, action)
    }
}

/// Shared handle to a reducer.
pub type SharedReducer = Arc<dyn Reducer>;

/// A named reducer and the plugin that supplied it.
#[derive(Clone)]
pub struct ReducerSlice {
    pub key: String,
    pub owner: String,
    pub reducer: SharedReducer,
}

impl std::fmt::Debug for ReducerSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReducerSlice").field("key", &self.key).field("owner", &self.owner).finish()
    }
}

impl ReducerSlice {
    /// Create a slice owned by a plugin of the same name as the key.
    pub fn new(key: impl Into<String>, reducer: SharedReducer) -> Self {
        let key = key.into();
        Self { owner: key.clone(), key, reducer }
    }

    /// Set the owning plugin.
    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }
}

/// An immutable snapshot of the live slices.
#[derive(Default)]
pub struct CombinedReducer {
    slices: Vec<(String, SharedReducer)>,
}

impl CombinedReducer {
    /// Apply every slice reducer to its own sub-state.
    ///
    /// Keys without a live slice are dropped from the result. Slices whose
    /// state is unchanged keep their previous allocation.
    pub fn reduce(&self, state: &CombinedState, action: &Action) -> CombinedState {
        self.slices
            .iter()
            .map(|(key, reducer)| {
                let previous = state.get(key);
                let next = reducer.reduce(previous.map(|s| s.as_ref()), action);
                let next = match previous {
                    Some(prev) if **prev == next => Arc::clone(prev),
                    _ => Arc::new(next),
                };
                (key.clone(), next)
            })
            .collect()
    }

    /// Slice keys in application order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slices.iter().map(|(key, _)| key.as_str())
    }
}

/// Registry of live reducer slices.
#[derive(Default)]
pub struct ReducerManager {
    slices: BTreeMap<String, ReducerSlice>,
    combined: Arc<CombinedReducer>,
}

impl std::fmt::Debug for ReducerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReducerManager").field("slices", &self.slices.keys()).finish()
    }
}

impl ReducerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the slice under `key`, owned by `key`.
    pub fn add(&mut self, key: impl Into<String>, reducer: SharedReducer) {
        self.add_slice(ReducerSlice::new(key, reducer));
    }

    /// Insert or replace a slice.
    ///
    /// Replacing a slice owned by a different plugin is allowed (last write
    /// wins) but logged.
    pub fn add_slice(&mut self, slice: ReducerSlice) {
        if let Some(existing) = self.slices.get(&slice.key) {
            if existing.owner != slice.owner {
                tracing::warn!(
                    slice = %slice.key,
                    previous_owner = %existing.owner,
                    new_owner = %slice.owner,
                    "Reducer slice key claimed by another plugin, replacing"
                );
            }
        }

        self.slices.insert(slice.key.clone(), slice);
        self.rebuild();
    }

    /// Remove a slice. Returns the removed slice, if any.
    pub fn remove(&mut self, key: &str) -> Option<ReducerSlice> {
        let removed = self.slices.remove(key);
        if removed.is_some() {
            self.rebuild();
        }
        removed
    }

    /// Reduce with the current slice map.
    pub fn reduce(&self, state: &CombinedState, action: &Action) -> CombinedState {
        self.combined.reduce(state, action)
    }

    /// Snapshot of the current combined reducer.
    pub fn combined(&self) -> Arc<CombinedReducer> {
        Arc::clone(&self.combined)
    }

    pub fn get(&self, key: &str) -> Option<&ReducerSlice> {
        self.slices.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slices.contains_key(key)
    }

    /// Owner of the slice under `key`.
    pub fn owner(&self, key: &str) -> Option<&str> {
        self.slices.get(key).map(|s| s.owner.as_str())
    }

    pub fn keys(&self) -> Vec<&str> {
        self.slices.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    fn rebuild(&mut self) {
        let slices = self
            .slices
            .values()
            .map(|slice| (slice.key.clone(), Arc::clone(&slice.reducer)))
            .collect();
        self.combined = Arc::new(CombinedReducer { slices });
    }
}
