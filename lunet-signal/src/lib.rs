// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
//! POSIX signal delivery exposed to scripts as the `signal` module
//! (spec.md §4.I, §6).

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use lunet_core::Runtime;
use lunet_reactor::Reactor;
use mlua::Lua;

fn signum_for(name: &str) -> mlua::Result<i32> {
    match name {
        "INT" => Ok(libc::SIGINT),
        "TERM" => Ok(libc::SIGTERM),
        "HUP" => Ok(libc::SIGHUP),
        "QUIT" => Ok(libc::SIGQUIT),
        other => Err(mlua::Error::RuntimeError(format!(
            "unknown signal name {other:?}, expected one of INT, TERM, HUP, QUIT"
        ))),
    }
}

/// spec.md §4.I: "other numeric signals are reported as `SIGNAL_<n>`" —
/// reachable if a future caller passes a raw signum the reactor itself
/// observed, even though `wait` today only ever submits the four named
/// signums above.
fn name_for(signum: i32) -> String {
    match signum {
        s if s == libc::SIGINT => "INT".to_string(),
        s if s == libc::SIGTERM => "TERM".to_string(),
        s if s == libc::SIGHUP => "HUP".to_string(),
        s if s == libc::SIGQUIT => "QUIT".to_string(),
        other => format!("SIGNAL_{other}"),
    }
}

/// Installs the `signal` module table into `lua`.
///
/// The reactor keeps one shared watcher per signum (see
/// `TokioReactor::signal_handle`); a second concurrent `wait` on the same
/// signum would otherwise contend on that watcher's lock mid-await. This
/// module tracks in-flight signums itself so a second waiter gets a script
/// error instead of a panic, the same "at most one outstanding op" contract
/// every other primitive here enforces.
pub fn install(lua: &Lua, runtime: &Rc<Runtime>, reactor: Rc<dyn Reactor>) -> mlua::Result<()> {
    let table = lua.create_table()?;
    let in_flight: Rc<RefCell<HashSet<i32>>> = Rc::new(RefCell::new(HashSet::new()));

    let runtime = Rc::clone(runtime);
    let wait = lua.create_async_function(move |lua, name: String| {
        let runtime = Rc::clone(&runtime);
        let reactor = Rc::clone(&reactor);
        let in_flight = Rc::clone(&in_flight);
        async move {
            runtime.registry.ensure_coroutine("lunet.signal.wait")?;
            let signum = signum_for(&name)?;
            if !in_flight.borrow_mut().insert(signum) {
                return Err(mlua::Error::RuntimeError(format!(
                    "at most one outstanding wait per signal ({name})"
                )));
            }
            let result = reactor.signal_wait(signum).await;
            in_flight.borrow_mut().remove(&signum);
            match result {
                Ok(delivered) => Ok((Some(lua.create_string(&name_for(delivered))?), None)),
                Err(err) => Ok((None, Some(err.script_message()))),
            }
        }
    })?;
    table.set("wait", wait)?;

    lua.globals().set("signal", table)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signum_for_rejects_unknown_names() {
        assert!(signum_for("KILL").is_err());
        assert_eq!(signum_for("INT").unwrap(), libc::SIGINT);
    }

    #[test]
    fn name_for_falls_back_to_numeric_form() {
        assert_eq!(name_for(libc::SIGTERM), "TERM");
        assert_eq!(name_for(12345), "SIGNAL_12345");
    }
}
