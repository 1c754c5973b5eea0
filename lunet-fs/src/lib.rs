// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
//! Off-thread filesystem primitives exposed to scripts as the `fs` module
//! (spec.md §4.J, §6).

mod context;
mod ops;

pub use context::FsContext;
pub use ops::{install, FsHandleLua};
