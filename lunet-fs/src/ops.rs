// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::rc::Rc;

use lunet_core::{guarded, Runtime};
use lunet_reactor::Reactor;
use mlua::{AnyUserData, Lua, Table, UserData};

use crate::context::FsContext;

/// Wraps an open-file context so it can be handed to scripts as an opaque
/// `userdata` value (spec.md §4.J `open`'s return value).
pub struct FsHandleLua(pub Rc<FsContext>);
impl UserData for FsHandleLua {}

fn fs_ctx(ud: &AnyUserData) -> mlua::Result<Rc<FsContext>> {
    Ok(ud.borrow::<FsHandleLua>()?.0.clone())
}

fn stat_table(lua: &Lua, stat: lunet_reactor::Stat) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.set("size", stat.size)?;
    table.set("mtime", stat.mtime)?;
    table.set("mode", stat.mode)?;
    table.set("type", stat.kind.as_str())?;
    Ok(table)
}

/// Installs the `fs` module table into `lua` (spec.md §4.J, §6).
pub fn install(lua: &Lua, runtime: &Rc<Runtime>, reactor: Rc<dyn Reactor>) -> mlua::Result<()> {
    let table = lua.create_table()?;

    {
        let runtime = Rc::clone(runtime);
        let reactor = Rc::clone(&reactor);
        let open = lua.create_async_function(
            move |_lua, (path, flags, mode): (String, i32, u32)| {
                let runtime = Rc::clone(&runtime);
                let reactor = Rc::clone(&reactor);
                async move {
                    runtime.registry.ensure_coroutine("lunet.fs.open")?;
                    match reactor.fs_open(PathBuf::from(path), flags, mode).await {
                        Ok(handle) => Ok((Some(FsHandleLua(FsContext::new(handle))), None)),
                        Err(err) => Ok((None, Some(err.script_message()))),
                    }
                }
            },
        )?;
        table.set("open", open)?;
    }

    {
        let runtime = Rc::clone(runtime);
        let reactor = Rc::clone(&reactor);
        let read = lua.create_async_function(
            move |lua, (handle_ud, size, offset): (AnyUserData, usize, Option<u64>)| {
                let runtime = Rc::clone(&runtime);
                let reactor = Rc::clone(&reactor);
                async move {
                    runtime.registry.ensure_coroutine("lunet.fs.read")?;
                    let ctx = fs_ctx(&handle_ud)?;
                    let result = guarded(&ctx.head, reactor.fs_read(&ctx.handle, size, offset)).await;
                    match result {
                        Ok(bytes) => Ok((Some(lua.create_string(&bytes)?), None)),
                        Err(err) => Ok((None, Some(err.script_message()))),
                    }
                }
            },
        )?;
        table.set("read", read)?;
    }

    {
        let runtime = Rc::clone(runtime);
        let reactor = Rc::clone(&reactor);
        let write = lua.create_async_function(
            move |_lua, (handle_ud, data, offset): (AnyUserData, mlua::String, Option<u64>)| {
                let runtime = Rc::clone(&runtime);
                let reactor = Rc::clone(&reactor);
                async move {
                    runtime.registry.ensure_coroutine("lunet.fs.write")?;
                    let ctx = fs_ctx(&handle_ud)?;
                    let bytes = data.as_bytes().to_vec();
                    let result = guarded(&ctx.head, reactor.fs_write(&ctx.handle, bytes, offset)).await;
                    match result {
                        Ok(n) => Ok((Some(n as i64), None)),
                        Err(err) => Ok((None, Some(err.script_message()))),
                    }
                }
            },
        )?;
        table.set("write", write)?;
    }

    {
        let reactor = Rc::clone(&reactor);
        let close = lua.create_function(move |_lua, handle_ud: AnyUserData| {
            let ctx = fs_ctx(&handle_ud)?;
            if ctx.head.mark_closing() {
                let handle = ctx.handle.clone();
                let reactor = Rc::clone(&reactor);
                tokio::task::spawn_local(async move {
                    reactor.fs_close(handle).await;
                });
            }
            Ok(())
        })?;
        table.set("close", close)?;
    }

    {
        let reactor = Rc::clone(&reactor);
        let stat = lua.create_async_function(move |lua, path: String| {
            let reactor = Rc::clone(&reactor);
            async move {
                match reactor.fs_stat(&PathBuf::from(path)).await {
                    Ok(stat) => Ok((Some(stat_table(lua, stat)?), None)),
                    Err(err) => Ok((None, Some(err.script_message()))),
                }
            }
        })?;
        table.set("stat", stat)?;
    }

    {
        let reactor = Rc::clone(&reactor);
        let scandir = lua.create_async_function(move |lua, path: String| {
            let reactor = Rc::clone(&reactor);
            async move {
                match reactor.fs_scandir(&PathBuf::from(path)).await {
                    Ok(entries) => {
                        let seq = lua.create_table()?;
                        for (i, entry) in entries.into_iter().enumerate() {
                            let row = lua.create_table()?;
                            row.set("name", entry.name)?;
                            row.set("type", entry.kind.as_str())?;
                            seq.set(i + 1, row)?;
                        }
                        Ok((Some(seq), None))
                    }
                    Err(err) => Ok((None, Some(err.script_message()))),
                }
            }
        })?;
        table.set("scandir", scandir)?;
    }

    lua.globals().set("fs", table)?;
    Ok(())
}
