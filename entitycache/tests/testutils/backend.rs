//! In-memory storage backend driven by the test
//!
//! Handles materialize to `size` entities of their entity type (1 by default). A
//! gated handle blocks inside `materialize` until the gate opens, polling the
//! cancellation policy while it waits. Scripted errors are returned first, one per call.

use entitycache::{
    CachedInstanceIterable, CachedValue, CancellationPolicy, EntityId, HandleId, IterableHandle,
    StoreBackend, StoreError,
};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

#[derive(Default)]
struct State {
    sizes: HashMap<HandleId, u64>,
    closed: HashSet<HandleId>,
    entered: HashSet<HandleId>,
    failures: HashMap<HandleId, VecDeque<StoreError>>,
    calls: HashMap<HandleId, usize>,
}

#[derive(Default)]
pub struct ScriptedBackend {
    state: Mutex<State>,
    changed: Condvar,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_size(&self, handle: &IterableHandle, size: u64) {
        self.state.lock().sizes.insert(handle.id().clone(), size);
    }

    /// Make the next call for `handle` fail with `error`
    pub fn fail_next(&self, handle: &IterableHandle, error: StoreError) {
        self.state
            .lock()
            .failures
            .entry(handle.id().clone())
            .or_default()
            .push_back(error);
    }

    pub fn close_gate(&self, handle: &IterableHandle) {
        self.state.lock().closed.insert(handle.id().clone());
    }

    pub fn open_gate(&self, handle: &IterableHandle) {
        self.state.lock().closed.remove(handle.id());
        self.changed.notify_all();
    }

    /// Wait until a call for `handle` is blocked on (or passed) its gate
    pub fn wait_entered(&self, handle: &IterableHandle, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.entered.contains(handle.id()) {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.entered.contains(handle.id());
            }
        }
        true
    }

    /// Number of calls made for `handle`
    pub fn calls(&self, handle: &IterableHandle) -> usize {
        self.state.lock().calls.get(handle.id()).copied().unwrap_or(0)
    }

    /// Common prologue: count the call, pop a scripted failure, honor the gate
    fn enter(&self, handle: &IterableHandle, policy: &CancellationPolicy) -> Result<u64, StoreError> {
        let mut state = self.state.lock();
        *state.calls.entry(handle.id().clone()).or_default() += 1;
        if let Some(error) = state
            .failures
            .get_mut(handle.id())
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        state.entered.insert(handle.id().clone());
        self.changed.notify_all();
        while state.closed.contains(handle.id()) {
            policy.check()?;
            self.changed.wait_for(&mut state, Duration::from_millis(5));
        }
        policy.check()?;
        Ok(state.sizes.get(handle.id()).copied().unwrap_or(1))
    }
}

impl StoreBackend for ScriptedBackend {
    fn materialize(
        &self,
        handle: &IterableHandle,
        policy: &CancellationPolicy,
    ) -> Result<CachedValue, StoreError> {
        let size = self.enter(handle, policy)?;
        let type_id = handle.entity_type_id();
        let entities = (0..size).map(|i| EntityId::new(type_id, i)).collect();
        Ok(CachedInstanceIterable::sorted(handle.clone(), entities).into_value())
    }

    fn approximate_size(
        &self,
        handle: &IterableHandle,
        policy: &CancellationPolicy,
    ) -> Result<u64, StoreError> {
        self.enter(handle, policy)
    }
}
