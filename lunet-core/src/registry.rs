// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use mlua::{Function, Lua, Value};

use crate::anchor::{CoroutineId, TrackCurrent};
use crate::error::CoreError;

/// Coroutines that have yielded at least once and not yet terminated
/// (spec.md §3 "Anchor set"). In a garbage-collected host this set is the
/// only thing keeping a mid-flight coroutine reachable; here the spawned
/// task itself owns the `mlua::Thread` and is the real GC root, so this set
/// exists purely for observability — trace counters and the testable
/// property "anchor set is empty at quiescence" (spec.md §8 item 3, §8 S3).
#[derive(Default)]
struct Anchors {
    ids: RefCell<HashSet<u64>>,
}

impl Anchors {
    fn insert(&self, id: u64) {
        self.ids.borrow_mut().insert(id);
    }

    fn remove(&self, id: u64) {
        self.ids.borrow_mut().remove(&id);
    }

    fn len(&self) -> usize {
        self.ids.borrow().len()
    }
}

/// Coroutine registry (spec.md §4.C): owns the Lua host, assigns coroutine
/// ids, drives `spawn`, and tracks the anchor set.
pub struct Registry {
    lua: Lua,
    anchors: Anchors,
    next_id: Cell<u64>,
    spawn_count: Cell<u64>,
    wake_count: Cell<u64>,
    errored: Cell<bool>,
}

impl Registry {
    pub fn new(lua: Lua) -> Rc<Self> {
        Rc::new(Registry {
            lua,
            anchors: Anchors::default(),
            next_id: Cell::new(1),
            spawn_count: Cell::new(0),
            wake_count: Cell::new(0),
            errored: Cell::new(false),
        })
    }

    /// Whether any spawned coroutine has terminated with an error so far;
    /// surfaced to `lunet-cli` to pick a non-zero exit code (spec.md §6
    /// "exit 1 ... script error") when the script set no explicit override.
    pub fn had_error(&self) -> bool {
        self.errored.get()
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    pub fn spawn_count(&self) -> u64 {
        self.spawn_count.get()
    }

    pub fn wake_count(&self) -> u64 {
        self.wake_count.get()
    }

    fn alloc_id(&self) -> CoroutineId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        CoroutineId(id)
    }

    /// spec.md §4.C `spawn(fn)`: creates a coroutine with `fn` as its body
    /// and resumes it once.
    ///
    /// The literal contract ("if it yields, install an anchor; otherwise
    /// let it be collected") is approximated here by anchoring for the
    /// task's *entire* lifetime rather than strictly only once a `Pending`
    /// is first observed — `tokio::task::spawn_local` gives no hook to poll
    /// once synchronously before handing the task to the scheduler without
    /// hand-rolling a `Waker`, and a coroutine that never yields is
    /// anchored for a vanishingly short time regardless. The anchor set is
    /// still empty at quiescence, which is the only externally observable
    /// part of the contract (spec.md §8 item 3).
    pub fn spawn(self: &Rc<Self>, func: Function) -> Result<(), CoreError> {
        let id = self.alloc_id();
        let thread = self.lua.create_thread(func)?;
        let registry = Rc::clone(self);

        registry.spawn_count.set(registry.spawn_count.get() + 1);
        registry.anchors.insert(id.raw());
        tracing::debug!(target: "lunet::core", coroutine = id.raw(), "spawned");

        let body = thread.into_async::<_, Value>(());
        let tracked = TrackCurrent::new(id, body);

        tokio::task::spawn_local(async move {
            let result = tracked.await;
            registry.anchors.remove(id.raw());
            registry.wake_count.set(registry.wake_count.get() + 1);
            match result {
                // spec.md §4.C: a runtime error is written to diagnostic
                // stderr, never re-raised into a different coroutine.
                Err(err) => {
                    registry.errored.set(true);
                    tracing::error!(target: "lunet::core", coroutine = id.raw(), %err, "coroutine error");
                }
                Ok(_) => {
                    tracing::debug!(target: "lunet::core", coroutine = id.raw(), "coroutine completed");
                }
            }
        });

        Ok(())
    }

    /// spec.md §4.C `ensure_coroutine`: the precondition check every
    /// yielding primitive performs before touching the reactor.
    pub fn ensure_coroutine(&self, name: &str) -> Result<CoroutineId, CoreError> {
        crate::anchor::current().ok_or_else(|| CoreError::NotCoroutine(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_lua() -> Lua {
        Lua::new()
    }

    #[tokio::test]
    async fn spawn_anchors_then_unanchors_a_yielding_coroutine() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let registry = Registry::new(new_lua());
                let func = registry
                    .lua()
                    .create_async_function(|_, ()| async {
                        tokio::task::yield_now().await;
                        Ok(())
                    })
                    .unwrap();
                registry.spawn(func).unwrap();
                assert_eq!(registry.anchor_count(), 1);
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                assert_eq!(registry.anchor_count(), 0);
                assert_eq!(registry.wake_count(), 1);
            })
            .await;
    }

    #[test]
    fn ensure_coroutine_fails_outside_a_coroutine() {
        let registry = Registry::new(new_lua());
        let err = registry.ensure_coroutine("lunet.sleep").unwrap_err();
        assert_eq!(err.to_string(), "lunet.sleep must be called from coroutine");
    }
}
