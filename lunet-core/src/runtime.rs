// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::cell::Cell;
use std::rc::Rc;

use lunet_alloc::Facade;
use mlua::{Function, Lua, Table, Value};

use crate::registry::Registry;

/// Fetches a script-visible module table, creating it empty if this is the
/// first module crate to touch it. `core` in particular is populated by two
/// independent crates (`lunet-core`'s own `spawn`, `lunet-timer`'s `sleep`;
/// spec.md §6), so whichever installs first must not clobber the other.
pub fn get_or_create_table(lua: &Lua, name: &str) -> mlua::Result<Table> {
    match lua.globals().get::<_, Value>(name)? {
        Value::Table(table) => Ok(table),
        _ => {
            let table = lua.create_table()?;
            lua.globals().set(name, table.clone())?;
            Ok(table)
        }
    }
}

const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Process-wide counters (spec.md §9 design note, component L), surfaced as
/// `tracing` events rather than a bespoke metrics sink — the bridge has no
/// other metrics dependency to piggy-back on.
#[derive(Default)]
pub struct Counters {
    sleep: Cell<u64>,
    wake: Cell<u64>,
}

impl Counters {
    pub fn record_sleep(&self) {
        self.sleep.set(self.sleep.get() + 1);
        tracing::trace!(target: "lunet::core", sleep = self.sleep.get(), "sleep armed");
    }

    pub fn record_wake(&self) {
        self.wake.set(self.wake.get() + 1);
        tracing::trace!(target: "lunet::core", wake = self.wake.get(), "wake delivered");
    }

    pub fn sleep(&self) -> u64 {
        self.sleep.get()
    }

    pub fn wake(&self) -> u64 {
        self.wake.get()
    }
}

/// Reified global state (spec.md §9 design note: "reify as a `Runtime`
/// value created at program start, passed by shared reference to
/// modules"). Replaces the source's global mutable singletons — default
/// state pointer, read-buffer size, loopback-restriction flag.
pub struct Runtime {
    pub registry: Rc<Registry>,
    pub counters: Counters,
    /// Shared allocation facade every module crate routes real buffers
    /// through (socket write requests, storage-unit blocks; spec.md §9
    /// component A), so the balance counters mean something at shutdown.
    pub alloc: Rc<Facade>,
    allow_non_loopback_bind: Cell<bool>,
    read_buffer_size: Cell<usize>,
}

impl Runtime {
    pub fn new(lua: Lua, allow_non_loopback_bind: bool) -> Rc<Self> {
        Rc::new(Runtime {
            registry: Registry::new(lua),
            counters: Counters::default(),
            alloc: Rc::new(Facade::new()),
            allow_non_loopback_bind: Cell::new(allow_non_loopback_bind),
            read_buffer_size: Cell::new(DEFAULT_READ_BUFFER_SIZE),
        })
    }

    pub fn lua(&self) -> &Lua {
        self.registry.lua()
    }

    pub fn allow_non_loopback_bind(&self) -> bool {
        self.allow_non_loopback_bind.get()
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size.get()
    }

    /// spec.md §4.F `set_read_buffer_size`: `n <= 0` is ignored.
    pub fn set_read_buffer_size(&self, n: i64) {
        if n > 0 {
            self.read_buffer_size.set(n as usize);
        }
    }

    /// spec.md §6 `core.spawn(fn)`. `sleep` is installed into the same
    /// table separately, by `lunet-timer` (component H belongs to that
    /// crate, not this one).
    pub fn install_spawn(self: &Rc<Self>, lua: &Lua) -> mlua::Result<()> {
        let registry = Rc::clone(&self.registry);
        let spawn = lua.create_function(move |_lua, func: Function| {
            registry.spawn(func).map_err(mlua::Error::external)
        })?;
        get_or_create_table(lua, "core")?.set("spawn", spawn)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_buffer_size_ignores_non_positive_values() {
        let rt = Runtime::new(Lua::new(), false);
        let default = rt.read_buffer_size();
        rt.set_read_buffer_size(0);
        assert_eq!(rt.read_buffer_size(), default);
        rt.set_read_buffer_size(-5);
        assert_eq!(rt.read_buffer_size(), default);
        rt.set_read_buffer_size(4096);
        assert_eq!(rt.read_buffer_size(), 4096);
    }

    #[tokio::test]
    async fn core_spawn_runs_the_given_function() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let rt = Runtime::new(Lua::new(), false);
                rt.install_spawn(rt.lua()).unwrap();
                rt.lua()
                    .load(r#"core.spawn(function() _G.ran = true end)"#)
                    .exec()
                    .unwrap();
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                let ran: bool = rt.lua().globals().get("ran").unwrap();
                assert!(ran);
            })
            .await;
    }
}
