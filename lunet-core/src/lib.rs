// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
//! Coroutine registry, wake-handle (coref) protocol, and handle-context
//! bookkeeping binding Lua coroutines to [`lunet_reactor::Reactor`]
//! completions on a single-threaded event loop.

mod anchor;
mod coref;
mod error;
mod handle;
mod policy;
mod registry;
mod runtime;

pub use anchor::{current, CoroutineId, TrackCurrent};
pub use coref::CorefSlot;
pub use lunet_alloc::{AllocBuf, Facade};
pub use error::CoreError;
pub use handle::{guarded, guarded_cancelable, HandleHead};
pub use policy::{enforce_loopback, validate_bind_port, validate_port};
pub use registry::Registry;
pub use runtime::{get_or_create_table, Counters, Runtime};
