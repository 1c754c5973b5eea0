// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::rc::Rc;
use std::time::Duration;

use lunet_core::Runtime;
use lunet_reactor::{Reactor, TokioReactor};
use mlua::{Function, Lua};

/// spec.md §8 S1 — echo server: listen, accept and echo in one spawned
/// coroutine, connect/write/read in another, assert the round trip.
#[tokio::test(flavor = "current_thread")]
async fn echo_server_round_trip() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let lua = Lua::new();
            let runtime = Runtime::new(lua, false);
            let reactor: Rc<dyn Reactor> = Rc::new(TokioReactor::new());
            lunet_socket::install(runtime.lua(), &runtime, reactor).unwrap();

            let setup: Function = runtime
                .lua()
                .load(
                    r#"
                    return function()
                        local l = socket.listen("tcp", "127.0.0.1", 0)
                        _G.listener = l
                        _G.port = l:local_port()
                    end
                    "#,
                )
                .eval()
                .unwrap();
            runtime.registry.spawn(setup).unwrap();
            wait_for_global(&runtime, "listener").await;

            let port: u16 = runtime.lua().globals().get("port").unwrap();
            assert_ne!(port, 0, "listen(\"tcp\", ..., 0) must report the OS-assigned port");

            let server: Function = runtime
                .lua()
                .load(
                    r#"
                    return function()
                        local c = socket.accept(_G.listener)
                        local data = socket.read(c)
                        socket.write(c, data)
                        socket.close(c)
                        socket.close(_G.listener)
                    end
                    "#,
                )
                .eval()
                .unwrap();
            runtime.registry.spawn(server).unwrap();

            let client: Function = runtime
                .lua()
                .load(format!(
                    r#"
                    return function()
                        local c = socket.connect("127.0.0.1", {port})
                        socket.write(c, "hello\n")
                        local y = socket.read(c)
                        socket.close(c)
                        _G.result = y
                    end
                    "#
                ))
                .eval()
                .unwrap();
            runtime.registry.spawn(client).unwrap();

            let result = wait_for_global_string(&runtime, "result").await;
            assert_eq!(result, "hello\n");
        })
        .await;
}

async fn wait_for_global(runtime: &Rc<Runtime>, name: &str) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let present = runtime
                .lua()
                .globals()
                .get::<_, mlua::Value>(name)
                .map(|v| !v.is_nil())
                .unwrap_or(false);
            if present {
                return;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("timed out waiting for global")
}

async fn wait_for_global_string(runtime: &Rc<Runtime>, name: &str) -> String {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(value) = runtime.lua().globals().get::<_, String>(name) {
                return value;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("timed out waiting for global")
}
