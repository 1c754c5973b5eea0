// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
//! Abstract event-loop interface consumed by the coroutine bridge in
//! `lunet-core`, plus the `tokio`-backed default implementation used by
//! `lunet-cli`.

mod error;
mod reactor;
mod tokio_reactor;
mod types;

pub use error::ReactorError;
pub use reactor::Reactor;
pub use tokio_reactor::TokioReactor;
pub use types::{
    DirEntry, Endpoint, EntryKind, FsHandle, ListenerHandle, PeerName, Stat, StreamHandle,
    UdpHandle,
};
