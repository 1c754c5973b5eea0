// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use lunet_core::Runtime;
use lunet_reactor::{Reactor, TokioReactor};
use mlua::Lua;

/// Script-settable process exit code (spec.md §6: "exit 0 — normal
/// termination (unless script sets an integer exit override in a global
/// slot)").
const EXIT_CODE_SLOT: &str = "__lunet_exit_code";

#[derive(Parser, Debug)]
#[command(name = "lunet", about = "Cooperative async I/O runtime for Lua scripts")]
struct Args {
    /// Allow binding TCP/UDP listeners to non-loopback addresses.
    #[arg(long = "dangerously-skip-loopback-restriction")]
    dangerously_skip_loopback_restriction: bool,

    /// Raise the default tracing verbosity (reserved at the script level,
    /// spec.md §9 open question; here it controls the `tracing` filter).
    #[arg(long = "verbose-trace")]
    verbose_trace: bool,

    /// Path to the Lua script to run.
    script: Option<PathBuf>,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    // clap's default parse-error exit code is 2; spec.md §6 wants exit 1 for
    // "missing script / unknown option" uniformly with script errors.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    let Some(script_path) = args.script else {
        eprintln!("lunet: missing script argument");
        std::process::exit(1);
    };

    init_tracing(args.verbose_trace);

    let exit_code = match run(script_path, args.dangerously_skip_loopback_restriction) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("lunet: {err:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

fn run(script_path: PathBuf, allow_non_loopback_bind: bool) -> Result<i32> {
    let source = std::fs::read_to_string(&script_path)
        .with_context(|| format!("reading script {}", script_path.display()))?;

    let tokio_rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building the tokio runtime")?;

    let local = tokio::task::LocalSet::new();
    local.block_on(&tokio_rt, async move {
        let lua = Lua::new();
        let runtime = Runtime::new(lua, allow_non_loopback_bind);
        let reactor: Rc<dyn Reactor> = Rc::new(TokioReactor::new());

        install_modules(&runtime, Rc::clone(&reactor))?;

        let entry = runtime
            .lua()
            .load(&source)
            .set_name(script_path.display().to_string())
            .into_function()
            .with_context(|| format!("compiling script {}", script_path.display()))?;
        runtime
            .registry
            .spawn(entry)
            .context("spawning the script's entry coroutine")?;

        // Drains every local task — the entry coroutine and every
        // `core.spawn`'d descendant — until the reactor has no more work,
        // the component B "run-until-idle" contract (spec.md §4.B).
        local_set_idle(&runtime).await;

        let counters = runtime.alloc.counters();
        assert!(
            counters.is_balanced(),
            "lunet-alloc balance violated at shutdown: alloc_count={} free_count={} current_bytes={}",
            counters.alloc_count(),
            counters.free_count(),
            counters.current_bytes(),
        );

        let override_code: Option<i64> = runtime.lua().globals().get(EXIT_CODE_SLOT).ok();
        Ok(match override_code {
            Some(code) => code as i32,
            None if runtime.registry.had_error() => 1,
            None => 0,
        })
    })
}

/// Approximates the component B "run-until-idle" contract: returns once no
/// coroutine has woken for a few consecutive ticks and the anchor set is
/// empty. This only tracks coroutines, not raw background tasks outside the
/// coroutine bridge (a listener's accept loop, a storage unit's bitmap-flush
/// loop) — a script that opens a listener and never closes it will still
/// see the process exit once its own coroutines are done, same as any other
/// handle the script didn't explicitly wait on.
async fn local_set_idle(runtime: &Rc<Runtime>) {
    let mut idle_ticks = 0;
    let mut last_wake = runtime.counters.wake();
    loop {
        if runtime.registry.anchor_count() == 0 {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        let wake = runtime.counters.wake();
        if wake == last_wake && runtime.registry.anchor_count() == 0 {
            idle_ticks += 1;
        } else {
            idle_ticks = 0;
        }
        last_wake = wake;
        if idle_ticks > 4 {
            break;
        }
    }
}

fn install_modules(runtime: &Rc<Runtime>, reactor: Rc<dyn Reactor>) -> Result<()> {
    let lua = runtime.lua();
    runtime
        .install_spawn(lua)
        .context("installing core.spawn")?;
    lunet_timer::install(lua, runtime, Rc::clone(&reactor)).context("installing lunet-timer")?;
    lunet_socket::install(lua, runtime, Rc::clone(&reactor)).context("installing lunet-socket")?;
    lunet_udp::install(lua, runtime, Rc::clone(&reactor)).context("installing lunet-udp")?;
    lunet_signal::install(lua, runtime, Rc::clone(&reactor)).context("installing lunet-signal")?;
    lunet_fs::install(lua, runtime, Rc::clone(&reactor)).context("installing lunet-fs")?;
    lunet_su::install(lua, runtime, reactor).context("installing lunet-su")?;
    Ok(())
}

