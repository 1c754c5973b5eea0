// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::rc::Rc;

use lunet_core::Runtime;
use lunet_reactor::Reactor;
use mlua::{Lua, UserData, UserDataMethods};

use crate::unit::StorageUnit;

/// Wraps a storage unit so it can be handed to scripts as an opaque
/// `userdata` object with methods (spec.md §6: "constructor returns an
/// opaque object with methods `write_once`, `read`, `is_written`, `close`").
/// Carries the owning `Runtime` too, since `write_once`/`read` are
/// suspension points that must validate their calling coroutine just like
/// every other yielding primitive (spec.md §5).
pub struct StorageUnitLua {
    pub unit: Rc<StorageUnit>,
    pub runtime: Rc<Runtime>,
}

impl UserData for StorageUnitLua {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_async_method("write_once", |lua, this, (addr, data): (u64, mlua::String)| {
            let unit = Rc::clone(&this.unit);
            let runtime = Rc::clone(&this.runtime);
            async move {
                runtime.registry.ensure_coroutine("lunet.su.write_once")?;
                let bytes = data.as_bytes().to_vec();
                match unit.write_once(addr, bytes).await {
                    Ok(()) => Ok(mlua::Value::Nil),
                    Err(msg) => Ok(mlua::Value::String(lua.create_string(&msg)?)),
                }
            }
        });

        methods.add_async_method("read", |lua, this, addr: u64| {
            let unit = Rc::clone(&this.unit);
            let runtime = Rc::clone(&this.runtime);
            async move {
                runtime.registry.ensure_coroutine("lunet.su.read")?;
                match unit.read(addr).await {
                    Ok(bytes) => Ok((Some(lua.create_string(&bytes)?), None)),
                    Err(msg) => Ok((None, Some(msg))),
                }
            }
        });

        methods.add_method("is_written", |_lua, this, addr: u64| Ok(this.unit.is_written(addr)));

        methods.add_method("close", |_lua, this, ()| {
            let unit = Rc::clone(&this.unit);
            tokio::task::spawn_local(async move {
                unit.close().await;
            });
            Ok(())
        });
    }
}

/// Installs the `su` module table into `lua` (spec.md §4.K, §6).
pub fn install(lua: &Lua, runtime: &Rc<Runtime>, reactor: Rc<dyn Reactor>) -> mlua::Result<()> {
    let table = lua.create_table()?;
    let runtime = Rc::clone(runtime);
    let open = lua.create_async_function(move |_lua, (dir, max_addresses): (String, u64)| {
        let runtime = Rc::clone(&runtime);
        let reactor = Rc::clone(&reactor);
        async move {
            runtime.registry.ensure_coroutine("lunet.su.open")?;
            let alloc = Rc::clone(&runtime.alloc);
            match StorageUnit::open(reactor, alloc, PathBuf::from(dir), max_addresses).await {
                Ok(unit) => Ok((
                    Some(StorageUnitLua {
                        unit,
                        runtime: Rc::clone(&runtime),
                    }),
                    None,
                )),
                Err(err) => Ok((None, Some(err))),
            }
        }
    })?;
    table.set("open", open)?;

    lua.globals().set("su", table)?;
    Ok(())
}
