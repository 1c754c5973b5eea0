// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
//! UDP datagram sockets exposed to scripts as the `udp` module (spec.md
//! §4.G, §6).

mod context;
mod ops;

pub use context::DatagramContext;
pub use ops::{install, DatagramHandleLua};
