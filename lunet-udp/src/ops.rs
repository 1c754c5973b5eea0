// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::net::SocketAddr;
use std::rc::Rc;

use lunet_core::{enforce_loopback, guarded, validate_bind_port, validate_port, Runtime};
use lunet_reactor::Reactor;
use mlua::{AnyUserData, Lua, UserData, UserDataMethods, Value};

use crate::context::DatagramContext;

/// Wraps a datagram context so it can be handed to scripts as an opaque
/// `userdata` value (spec.md §4.G `bind`'s return value). Exposes
/// `local_port()` so a script that bound to port `0` can learn the
/// OS-assigned ephemeral port (spec.md §8 S1).
pub struct DatagramHandleLua(pub Rc<DatagramContext>);
impl UserData for DatagramHandleLua {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("local_port", |_, this, ()| {
            Ok(this.0.handle.local_addr().ok().map(|a| a.port()))
        });
    }
}

fn datagram_ctx(ud: &AnyUserData) -> mlua::Result<Rc<DatagramContext>> {
    Ok(ud.borrow::<DatagramHandleLua>()?.0.clone())
}

/// Resolves `bind`'s own address: port `0` asks the OS to choose an
/// ephemeral port (spec.md §8 S1), so unlike [`resolve_send_addr`] the
/// valid range is `[0, 65535]`.
fn resolve_bind_addr(host: &str, port: i64) -> mlua::Result<SocketAddr> {
    let port = validate_bind_port(port).map_err(mlua::Error::RuntimeError)?;
    format!("{host}:{port}")
        .parse()
        .map_err(|_| mlua::Error::RuntimeError(format!("invalid host {host:?}")))
}

/// Resolves `send`'s destination address, where port `0` is never meaningful.
fn resolve_send_addr(host: &str, port: i64) -> mlua::Result<SocketAddr> {
    let port = validate_port(port).map_err(mlua::Error::RuntimeError)?;
    format!("{host}:{port}")
        .parse()
        .map_err(|_| mlua::Error::RuntimeError(format!("invalid host {host:?}")))
}

/// Installs the `udp` module table into `lua` (spec.md §4.G, §6). The
/// loopback rule mirrors `socket.listen`'s for TCP (spec.md §4.G: "Loopback
/// rule identical to TCP listen").
pub fn install(lua: &Lua, runtime: &Rc<Runtime>, reactor: Rc<dyn Reactor>) -> mlua::Result<()> {
    let table = lua.create_table()?;

    {
        let runtime = Rc::clone(runtime);
        let reactor = Rc::clone(&reactor);
        let bind = lua.create_async_function(move |_lua, (host, port): (String, i64)| {
            let runtime = Rc::clone(&runtime);
            let reactor = Rc::clone(&reactor);
            async move {
                enforce_loopback(&host, runtime.allow_non_loopback_bind())
                    .map_err(mlua::Error::RuntimeError)?;
                let addr = resolve_bind_addr(&host, port)?;
                match reactor.udp_bind(addr).await {
                    Ok(handle) => Ok((Some(DatagramHandleLua(DatagramContext::new(handle))), None)),
                    Err(err) => Ok((None, Some(err.script_message()))),
                }
            }
        })?;
        table.set("bind", bind)?;
    }

    {
        let runtime = Rc::clone(runtime);
        let reactor = Rc::clone(&reactor);
        let send = lua.create_async_function(
            move |lua, (handle_ud, data, host, port): (AnyUserData, mlua::String, String, i64)| {
                let runtime = Rc::clone(&runtime);
                let reactor = Rc::clone(&reactor);
                async move {
                    runtime.registry.ensure_coroutine("lunet.udp.send")?;
                    let ctx = datagram_ctx(&handle_ud)?;
                    let to = resolve_send_addr(&host, port)?;
                    let bytes = data.as_bytes().to_vec();
                    let result = guarded(&ctx.head, reactor.udp_send(&ctx.handle, bytes, to)).await;
                    match result {
                        Ok(()) => Ok(Value::Nil),
                        Err(err) => Ok(Value::String(lua.create_string(&err.script_message())?)),
                    }
                }
            },
        )?;
        table.set("send", send)?;
    }

    {
        let runtime = Rc::clone(runtime);
        let reactor = Rc::clone(&reactor);
        let recv = lua.create_async_function(move |lua, handle_ud: AnyUserData| {
            let runtime = Rc::clone(&runtime);
            let reactor = Rc::clone(&reactor);
            async move {
                runtime.registry.ensure_coroutine("lunet.udp.recv")?;
                let ctx = datagram_ctx(&handle_ud)?;
                if ctx.recv_in_flight.replace(true) {
                    return Err(mlua::Error::RuntimeError(
                        "at most one outstanding recv per datagram socket".to_string(),
                    ));
                }
                let max = runtime.read_buffer_size();
                let result = guarded(&ctx.head, reactor.udp_recv(&ctx.handle, max)).await;
                ctx.recv_in_flight.set(false);
                match result {
                    Ok((bytes, from)) => {
                        let data = lua.create_string(&bytes)?;
                        let host = lua.create_string(&from.ip().to_string())?;
                        Ok((Some(data), Some(host), Some(from.port() as i64), None))
                    }
                    Err(err) => Ok((None, None, None, Some(err.script_message()))),
                }
            }
        })?;
        table.set("recv", recv)?;
    }

    {
        let reactor = Rc::clone(&reactor);
        let close = lua.create_function(move |_lua, handle_ud: AnyUserData| {
            let ctx = datagram_ctx(&handle_ud)?;
            // Identical lifecycle to stream close (spec.md §4.G): marking
            // closed stops any in-flight recv/send from ever resuming its
            // waiter, and the reactor releases the socket the same way it
            // releases a stream's fd.
            if ctx.head.mark_closing() {
                let ctx = Rc::clone(&ctx);
                let reactor = Rc::clone(&reactor);
                tokio::task::spawn_local(async move {
                    reactor.udp_close(&ctx.handle).await;
                });
            }
            Ok(())
        })?;
        table.set("close", close)?;
    }

    lua.globals().set("udp", table)?;
    Ok(())
}
