// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::rc::Rc;
use std::time::Duration;

use lunet_core::Runtime;
use lunet_reactor::{Reactor, TokioReactor};
use mlua::{Function, Lua};

/// spec.md §4.J — write then read back at an explicit offset, then stat
/// and scandir the containing directory.
#[tokio::test(flavor = "current_thread")]
async fn write_read_stat_scandir_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.bin");
    let path_str = path.to_str().unwrap().to_string();
    let dir_str = dir.path().to_str().unwrap().to_string();

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let lua = Lua::new();
            let runtime = Runtime::new(lua, false);
            let reactor: Rc<dyn Reactor> = Rc::new(TokioReactor::new());
            lunet_fs::install(runtime.lua(), &runtime, reactor).unwrap();

            let script: Function = runtime
                .lua()
                .load(format!(
                    r#"
                    return function()
                        local f = fs.open("{path}", 0x42, 420)
                        fs.write(f, "hello")
                        local data = fs.read(f, 5, 0)
                        fs.close(f)
                        _G.data = data

                        local st = fs.stat("{path}")
                        _G.size = st.size
                        _G.kind = st.type

                        local entries = fs.scandir("{dir}")
                        _G.entry_count = #entries
                    end
                    "#,
                    path = path_str,
                    dir = dir_str,
                ))
                .eval()
                .unwrap();
            runtime.registry.spawn(script).unwrap();

            wait_for_global(&runtime, "entry_count").await;

            let data: String = runtime.lua().globals().get("data").unwrap();
            let size: i64 = runtime.lua().globals().get("size").unwrap();
            let kind: String = runtime.lua().globals().get("kind").unwrap();
            let entry_count: i64 = runtime.lua().globals().get("entry_count").unwrap();

            assert_eq!(data, "hello");
            assert_eq!(size, 5);
            assert_eq!(kind, "file");
            assert_eq!(entry_count, 1);
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
