// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
//! TCP and Unix-domain stream sockets exposed to scripts as the `socket`
//! module (spec.md §4.F, §6).

mod context;
mod ops;

pub use context::{ClientContext, ListenerContext};
pub use ops::{install, ClientHandleLua, ListenerHandleLua};
