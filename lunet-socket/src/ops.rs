// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::net::SocketAddr;
use std::path::PathBuf;
use std::rc::Rc;

use lunet_core::{guarded_cancelable, AllocBuf, Runtime};
use lunet_reactor::{Endpoint, ListenerHandle, Reactor};
use mlua::{AnyUserData, Lua, UserData, UserDataMethods, Value};

use crate::context::{ClientContext, ListenerContext};

/// Wraps a listener context so it can be handed to scripts as an opaque
/// `userdata` value (spec.md §4.F `listen`'s return value). Exposes
/// `local_port()` so a script that bound to port `0` can learn the
/// OS-assigned ephemeral port (spec.md §8 S1).
pub struct ListenerHandleLua(pub Rc<ListenerContext>);
impl UserData for ListenerHandleLua {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("local_port", |_, this, ()| Ok(this.0.local_port.get()));
    }
}

/// Wraps a client context so it can be handed to scripts as an opaque
/// `userdata` value (spec.md §4.F `accept`/`connect`'s return values).
pub struct ClientHandleLua(pub Rc<ClientContext>);
impl UserData for ClientHandleLua {}

fn client_ctx(ud: &AnyUserData) -> mlua::Result<Rc<ClientContext>> {
    Ok(ud.borrow::<ClientHandleLua>()?.0.clone())
}

fn listener_ctx(ud: &AnyUserData) -> mlua::Result<Rc<ListenerContext>> {
    Ok(ud.borrow::<ListenerHandleLua>()?.0.clone())
}

fn parse_tcp_endpoint(host: &str, port: i64) -> mlua::Result<Endpoint> {
    if !(1..=65535).contains(&port) {
        return Err(mlua::Error::RuntimeError(
            "port must be between 1 and 65535".to_string(),
        ));
    }
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|_| mlua::Error::RuntimeError(format!("invalid host {host:?}")))?;
    Ok(Endpoint::Tcp(addr))
}

/// Like [`parse_tcp_endpoint`] but for `listen`: port `0` asks the OS to
/// choose an ephemeral port (spec.md §8 S1), so the valid range is
/// `[0, 65535]` rather than `[1, 65535]`.
fn parse_tcp_bind_endpoint(host: &str, port: i64) -> mlua::Result<Endpoint> {
    if !(0..=65535).contains(&port) {
        return Err(mlua::Error::RuntimeError(
            "port must be between 0 and 65535".to_string(),
        ));
    }
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|_| mlua::Error::RuntimeError(format!("invalid host {host:?}")))?;
    Ok(Endpoint::Tcp(addr))
}

fn resolve_listen_endpoint(proto: &str, host: &str, port: i64) -> mlua::Result<Endpoint> {
    match proto {
        "unix" => Ok(Endpoint::Unix(PathBuf::from(host))),
        "tcp" => parse_tcp_bind_endpoint(host, port),
        other => Err(mlua::Error::RuntimeError(format!(
            "unknown protocol {other:?}, expected \"tcp\" or \"unix\""
        ))),
    }
}

fn check_loopback(runtime: &Runtime, proto: &str, host: &str) -> mlua::Result<()> {
    if proto != "tcp" || runtime.allow_non_loopback_bind() {
        return Ok(());
    }
    let is_loopback = matches!(host, "127.0.0.1" | "::1" | "localhost");
    if is_loopback {
        Ok(())
    } else {
        Err(mlua::Error::RuntimeError(
            "binding to non-loopback addresses requires --dangerously-skip-loopback-restriction flag"
                .to_string(),
        ))
    }
}

/// Background task owning the reactor's `ListenerHandle` directly: the only
/// place in `lunet-socket` that needs the coref/pending-queue machinery,
/// since inbound connections can arrive with no `accept()` currently
/// waiting (spec.md §3 "Pending-accept queue", §4.F "Listener callback").
fn spawn_accept_loop(reactor: Rc<dyn Reactor>, ctx: Rc<ListenerContext>, listener: ListenerHandle) {
    tokio::task::spawn_local(async move {
        loop {
            let outcome = tokio::select! {
                biased;
                _ = ctx.close_notify.notified() => None,
                result = reactor.accept(&listener) => Some(result),
            };
            match outcome {
                None => break,
                Some(Ok(stream)) => {
                    let peer = ClientContext::new(stream);
                    let mut coref = ctx.accept_coref.borrow_mut();
                    if coref.is_armed() {
                        coref.fire(Ok(peer));
                    } else {
                        drop(coref);
                        ctx.pending.borrow_mut().push_back(peer);
                    }
                }
                Some(Err(err)) => {
                    let mut coref = ctx.accept_coref.borrow_mut();
                    if coref.is_armed() {
                        coref.fire(Err(err));
                    } else {
                        tracing::warn!(target: "lunet::socket", %err, "listener error with no waiting accept");
                    }
                    break;
                }
            }
        }
        reactor.close_listener(listener).await;
        ctx.accept_coref.borrow_mut().close();
        ctx.pending.borrow_mut().clear();
        ctx.head.release();
    });
}

/// Installs the `socket` module table into `lua` (spec.md §6).
pub fn install(lua: &Lua, runtime: &Rc<Runtime>, reactor: Rc<dyn Reactor>) -> mlua::Result<()> {
    let table = lua.create_table()?;

    {
        let runtime = Rc::clone(runtime);
        let reactor = Rc::clone(&reactor);
        let listen = lua.create_async_function(
            move |_lua, (proto, host, port): (String, String, i64)| {
                let runtime = Rc::clone(&runtime);
                let reactor = Rc::clone(&reactor);
                async move {
                    check_loopback(&runtime, &proto, &host)?;
                    let endpoint = resolve_listen_endpoint(&proto, &host, port)?;
                    match reactor.listen(endpoint, 128).await {
                        Ok(listener) => {
                            let ctx = ListenerContext::new();
                            let local_port = match &listener {
                                ListenerHandle::Tcp(l) => l.local_addr().ok().map(|a| a.port()),
                                ListenerHandle::Unix(_) => None,
                            };
                            ctx.local_port.set(local_port);
                            spawn_accept_loop(Rc::clone(&reactor), Rc::clone(&ctx), listener);
                            Ok((Some(ListenerHandleLua(ctx)), None))
                        }
                        Err(err) => Ok((None, Some(err.script_message()))),
                    }
                }
            },
        )?;
        table.set("listen", listen)?;
    }

    {
        let runtime = Rc::clone(runtime);
        let accept = lua.create_async_function(move |_lua, listener_ud: AnyUserData| {
            let runtime = Rc::clone(&runtime);
            async move {
                runtime.registry.ensure_coroutine("lunet.socket.accept")?;
                let ctx = listener_ctx(&listener_ud)?;
                if let Some(peer) = ctx.pending.borrow_mut().pop_front() {
                    return Ok((Some(ClientHandleLua(peer)), None));
                }
                if ctx.accept_coref.borrow().is_armed() {
                    return Err(mlua::Error::RuntimeError(
                        "at most one outstanding accept per listener".to_string(),
                    ));
                }
                let rx = ctx.accept_coref.borrow_mut().arm();
                ctx.head.retain();
                let outcome = rx.await;
                ctx.head.release();
                match outcome {
                    Ok(Ok(peer)) => Ok((Some(ClientHandleLua(peer)), None)),
                    Ok(Err(err)) => Ok((None, Some(err.script_message()))),
                    // The sender is only ever dropped without firing by a bug;
                    // a closed listener instead forgets it (see CorefSlot::close),
                    // so this coroutine would already be suspended forever there.
                    Err(_) => std::future::pending().await,
                }
            }
        })?;
        table.set("accept", accept)?;
    }

    {
        let runtime = Rc::clone(runtime);
        let reactor = Rc::clone(&reactor);
        let connect = lua.create_async_function(move |_lua, (host, port): (String, i64)| {
            let runtime = Rc::clone(&runtime);
            let reactor = Rc::clone(&reactor);
            async move {
                runtime.registry.ensure_coroutine("lunet.socket.connect")?;
                let endpoint = if host.contains('/') {
                    Endpoint::Unix(PathBuf::from(host))
                } else {
                    parse_tcp_endpoint(&host, port)?
                };
                match reactor.connect(endpoint).await {
                    Ok(stream) => Ok((Some(ClientHandleLua(ClientContext::new(stream))), None)),
                    Err(err) => Ok((None, Some(err.script_message()))),
                }
            }
        })?;
        table.set("connect", connect)?;
    }

    {
        let runtime = Rc::clone(runtime);
        let reactor = Rc::clone(&reactor);
        let read = lua.create_async_function(move |lua, client_ud: AnyUserData| {
            let runtime = Rc::clone(&runtime);
            let reactor = Rc::clone(&reactor);
            async move {
                runtime.registry.ensure_coroutine("lunet.socket.read")?;
                let ctx = client_ctx(&client_ud)?;
                if ctx.read_in_flight.replace(true) {
                    return Err(mlua::Error::RuntimeError(
                        "at most one outstanding read per socket".to_string(),
                    ));
                }
                let max = runtime.read_buffer_size();
                let result =
                    guarded_cancelable(&ctx.head, &ctx.close_notify, reactor.read(&ctx.stream, max))
                        .await;
                ctx.read_in_flight.set(false);
                match result {
                    Some(Ok(Some(bytes))) => Ok((Some(lua.create_string(&bytes)?), None)),
                    Some(Ok(None)) => Ok((None, None)),
                    Some(Err(err)) => Ok((None, Some(err.script_message()))),
                    // Closed out from under us while the read was pending;
                    // the coroutine must never resume (spec.md §4.F).
                    None => std::future::pending().await,
                }
            }
        })?;
        table.set("read", read)?;
    }

    {
        let runtime = Rc::clone(runtime);
        let reactor = Rc::clone(&reactor);
        let write = lua.create_async_function(
            move |lua, (client_ud, data): (AnyUserData, mlua::String)| {
                let runtime = Rc::clone(&runtime);
                let reactor = Rc::clone(&reactor);
                async move {
                    runtime.registry.ensure_coroutine("lunet.socket.write")?;
                    let ctx = client_ctx(&client_ud)?;
                    if ctx.write_in_flight.replace(true) {
                        return Err(mlua::Error::RuntimeError(
                            "at most one outstanding write per socket".to_string(),
                        ));
                    }
                    let buf = AllocBuf::copy_from(&runtime.alloc, data.as_bytes()).ok_or_else(|| {
                        mlua::Error::RuntimeError("allocation failure".to_string())
                    })?;
                    let result = guarded_cancelable(
                        &ctx.head,
                        &ctx.close_notify,
                        reactor.write(&ctx.stream, buf.to_vec()),
                    )
                    .await;
                    ctx.write_in_flight.set(false);
                    match result {
                        Some(Ok(())) => Ok(Value::Nil),
                        Some(Err(err)) => {
                            Ok(Value::String(lua.create_string(&err.script_message())?))
                        }
                        None => std::future::pending().await,
                    }
                }
            },
        )?;
        table.set("write", write)?;
    }

    {
        let getpeername = lua.create_function(move |lua, client_ud: AnyUserData| {
            let ctx = client_ctx(&client_ud)?;
            lua.create_string(&ctx.peer_name().0)
        })?;
        table.set("getpeername", getpeername)?;
    }

    {
        let reactor = Rc::clone(&reactor);
        let close = lua.create_function(move |_lua, handle: AnyUserData| {
            if let Ok(listener) = handle.borrow::<ListenerHandleLua>() {
                if listener.0.head.mark_closing() {
                    listener.0.close_notify.notify_one();
                }
                return Ok(());
            }
            if let Ok(client) = handle.borrow::<ClientHandleLua>() {
                if client.0.head.mark_closing() {
                    client.0.close_notify.notify_waiters();
                    let ctx = Rc::clone(&client.0);
                    let reactor = Rc::clone(&reactor);
                    tokio::task::spawn_local(async move {
                        reactor.close_stream(&ctx.stream).await;
                    });
                }
                return Ok(());
            }
            Err(mlua::Error::RuntimeError(
                "close() expects a listener or client handle".to_string(),
            ))
        })?;
        table.set("close", close)?;
    }

    {
        let runtime = Rc::clone(runtime);
        let set_read_buffer_size = lua.create_function(move |_lua, n: i64| {
            runtime.set_read_buffer_size(n);
            Ok(())
        })?;
        table.set("set_read_buffer_size", set_read_buffer_size)?;
    }

    lua.globals().set("socket", table)?;
    Ok(())
}
