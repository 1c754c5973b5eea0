// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::rc::Rc;
use std::time::Duration;

use lunet_core::Runtime;
use lunet_reactor::{Reactor, TokioReactor};
use mlua::{Function, Lua};

/// spec.md §8 — a datagram sent by one bound socket and received by
/// another round-trips the payload and the sender's address.
#[tokio::test(flavor = "current_thread")]
async fn udp_send_recv_round_trip() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let lua = Lua::new();
            let runtime = Runtime::new(lua, false);
            let reactor: Rc<dyn Reactor> = Rc::new(TokioReactor::new());
            lunet_udp::install(runtime.lua(), &runtime, reactor).unwrap();

            let setup: Function = runtime
                .lua()
                .load(
                    r#"
                    return function()
                        _G.a = udp.bind("127.0.0.1", 18573)
                        _G.b = udp.bind("127.0.0.1", 18574)
                    end
                    "#,
                )
                .eval()
                .unwrap();
            runtime.registry.spawn(setup).unwrap();
            wait_for_global(&runtime, "b").await;

            let receiver: Function = runtime
                .lua()
                .load(
                    r#"
                    return function()
                        local data, host, port = udp.recv(_G.b)
                        _G.received = data
                        _G.from_port = port
                    end
                    "#,
                )
                .eval()
                .unwrap();
            runtime.registry.spawn(receiver).unwrap();

            let sender: Function = runtime
                .lua()
                .load(
                    r#"
                    return function()
                        udp.send(_G.a, "ping", "127.0.0.1", 18574)
                    end
                    "#,
                )
                .eval()
                .unwrap();
            runtime.registry.spawn(sender).unwrap();

            let received = wait_for_global_string(&runtime, "received").await;
            assert_eq!(received, "ping");
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
