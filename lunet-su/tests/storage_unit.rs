// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::rc::Rc;
use std::time::Duration;

use lunet_core::Runtime;
use lunet_reactor::{Reactor, TokioReactor};
use mlua::{Function, Lua};

/// spec.md §8 S4 — write, close, reopen, and read back the same block.
#[tokio::test(flavor = "current_thread")]
async fn crash_safety_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let dir_str = dir.path().to_str().unwrap().to_string();

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let lua = Lua::new();
            let runtime = Runtime::new(lua, false);
            let reactor: Rc<dyn Reactor> = Rc::new(TokioReactor::new());
            lunet_su::install(runtime.lua(), &runtime, reactor).unwrap();

            let script: Function = runtime
                .lua()
                .load(format!(
                    r#"
                    return function()
                        local su = su.open("{dir}", 1024)
                        local data = string.rep("D", 4096)
                        local err = su:write_once(7, data)
                        assert(err == nil, tostring(err))
                        su:close()

                        local su2 = su.open("{dir}", 1024)
                        _G.was_written = su2:is_written(7)
                        local bytes = su2:read(7)
                        _G.readback = bytes
                    end
                    "#,
                    dir = dir_str
                ))
                .eval()
                .unwrap();
            runtime.registry.spawn(script).unwrap();

            wait_for_global(&runtime, "readback").await;
            let was_written: bool = runtime.lua().globals().get("was_written").unwrap();
            let readback: String = runtime.lua().globals().get("readback").unwrap();
            assert!(was_written);
            assert_eq!(readback, "D".repeat(4096));
        })
        .await;
}

/// spec.md §8 item 6 — a second write to an already-committed address
/// fails without touching disk.
#[tokio::test(flavor = "current_thread")]
async fn already_written_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let dir_str = dir.path().to_str().unwrap().to_string();

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let lua = Lua::new();
            let runtime = Runtime::new(lua, false);
            let reactor: Rc<dyn Reactor> = Rc::new(TokioReactor::new());
            lunet_su::install(runtime.lua(), &runtime, reactor).unwrap();

            let script: Function = runtime
                .lua()
                .load(format!(
                    r#"
                    return function()
                        local su = su.open("{dir}", 1024)
                        local data = string.rep("A", 4096)
                        su:write_once(3, data)
                        _G.second = su:write_once(3, data)
                    end
                    "#,
                    dir = dir_str
                ))
                .eval()
                .unwrap();
            runtime.registry.spawn(script).unwrap();

            wait_for_global(&runtime, "second").await;
            let second: String = runtime.lua().globals().get("second").unwrap();
            assert_eq!(second, "ALREADY_WRITTEN");
        })
        .await;
}

/// spec.md §8 item 7 — two concurrent writers to the same address: one
/// gets BUSY, the other completes normally.
#[tokio::test(flavor = "current_thread")]
async fn concurrent_writers_same_address_one_is_busy() {
    let dir = tempfile::tempdir().unwrap();
    let dir_str = dir.path().to_str().unwrap().to_string();

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let lua = Lua::new();
            let runtime = Runtime::new(lua, false);
            let reactor: Rc<dyn Reactor> = Rc::new(TokioReactor::new());
            lunet_su::install(runtime.lua(), &runtime, reactor).unwrap();

            let setup: Function = runtime
                .lua()
                .load(format!(
                    r#"
                    return function()
                        _G.su = su.open("{dir}", 1024)
                        _G.result_a = "PENDING"
                        _G.result_b = "PENDING"
                    end
                    "#,
                    dir = dir_str
                ))
                .eval()
                .unwrap();
            runtime.registry.spawn(setup).unwrap();
            wait_for_global(&runtime, "su").await;

            let writer_a: Function = runtime
                .lua()
                .load(
                    r#"
                    return function()
                        local err = _G.su:write_once(9, string.rep("A", 4096))
                        _G.result_a = err or "OK"
                    end
                    "#,
                )
                .eval()
                .unwrap();
            let writer_b: Function = runtime
                .lua()
                .load(
                    r#"
                    return function()
                        local err = _G.su:write_once(9, string.rep("B", 4096))
                        _G.result_b = err or "OK"
                    end
                    "#,
                )
                .eval()
                .unwrap();
            runtime.registry.spawn(writer_a).unwrap();
            runtime.registry.spawn(writer_b).unwrap();

            tokio::time::timeout(Duration::from_secs(2), async {
                loop {
                    let a: String = runtime.lua().globals().get("result_a").unwrap();
                    let b: String = runtime.lua().globals().get("result_b").unwrap();
                    if a != "PENDING" && b != "PENDING" {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
            })
            .await
            .expect("timed out waiting for both writers");

            let a: String = runtime.lua().globals().get("result_a").unwrap();
            let b: String = runtime.lua().globals().get("result_b").unwrap();
            let busy_count = [&a, &b].iter().filter(|v| v.as_str() == "BUSY").count();
            let ok_count = [&a, &b].iter().filter(|v| v.as_str() == "OK").count();
            assert_eq!(busy_count, 1, "exactly one writer must observe BUSY, got a={a} b={b}");
            assert_eq!(ok_count, 1, "exactly one writer must succeed, got a={a} b={b}");
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
