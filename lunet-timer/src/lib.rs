// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
//! Cooperative `sleep(ms)` (spec.md §4.H), installed as `core.sleep`
//! alongside `lunet-core`'s `core.spawn` (spec.md §6).

use std::rc::Rc;

use lunet_core::{get_or_create_table, Runtime};
use lunet_reactor::Reactor;
use mlua::Lua;

/// Installs `core.sleep` into `lua`.
///
/// `sleep` allocates no handle context of its own — unlike every other
/// primitive here, the source never exposes a way to cancel an armed timer
/// early, so there is nothing for a script to `close()` and no in-flight
/// flag to guard (spec.md §4.H: "arms a one-shot timer, yields... the close
/// callback frees the context" describes bookkeeping internal to the
/// reactor, not anything reachable from scripts).
///
/// `sleep(0)` still resumes on the next reactor tick rather than
/// synchronously (spec.md §8 boundary behavior): `tokio::time::sleep`
/// always registers with the timer wheel and is driven to completion by a
/// later wake, even for a zero duration, so this falls out of delegating
/// straight to the reactor rather than special-casing zero.
pub fn install(lua: &Lua, runtime: &Rc<Runtime>, reactor: Rc<dyn Reactor>) -> mlua::Result<()> {
    let runtime = Rc::clone(runtime);
    let sleep = lua.create_async_function(move |_lua, ms: i64| {
        let runtime = Rc::clone(&runtime);
        let reactor = Rc::clone(&reactor);
        async move {
            runtime.registry.ensure_coroutine("lunet.sleep")?;
            if ms < 0 {
                return Err(mlua::Error::RuntimeError(
                    "sleep(ms) requires ms >= 0".to_string(),
                ));
            }
            runtime.counters.record_sleep();
            reactor.sleep_ms(ms as u64).await;
            runtime.counters.record_wake();
            Ok(())
        }
    })?;
    get_or_create_table(lua, "core")?.set("sleep", sleep)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lunet_reactor::TokioReactor;
    use mlua::Function;

    #[tokio::test(start_paused = true)]
    async fn sleep_resumes_after_the_requested_delay() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let lua = Lua::new();
                let runtime = Runtime::new(lua, false);
                runtime.install_spawn(runtime.lua()).unwrap();
                let reactor: Rc<dyn Reactor> = Rc::new(TokioReactor::new());
                install(runtime.lua(), &runtime, reactor).unwrap();

                let body: Function = runtime
                    .lua()
                    .load("return function() core.sleep(50); _G.done = true end")
                    .eval()
                    .unwrap();
                runtime.registry.spawn(body).unwrap();

                tokio::time::advance(std::time::Duration::from_millis(60)).await;
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;

                let done: bool = runtime.lua().globals().get("done").unwrap();
                assert!(done);
                assert_eq!(runtime.counters.sleep(), 1);
                assert_eq!(runtime.counters.wake(), 1);
            })
            .await;
    }

    #[test]
    fn negative_ms_outside_coroutine_reports_not_coroutine_first() {
        // ensure_coroutine runs before the ms >= 0 check, matching the
        // reference order of validation in spec.md §4.C.
        let runtime = Runtime::new(Lua::new(), false);
        let err = runtime.registry.ensure_coroutine("lunet.sleep").unwrap_err();
        assert_eq!(err.to_string(), "lunet.sleep must be called from coroutine");
    }
}
