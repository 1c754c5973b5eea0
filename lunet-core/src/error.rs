// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
/// Errors raised by `lunet-core` itself — precondition failures reported
/// synchronously as script errors (spec.md §7's "argument validation" row),
/// never delivered through a coref.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0} must be called from coroutine")]
    NotCoroutine(String),

    /// Reserved for a context that is a coroutine but not currently
    /// yield-legal (e.g. inside a non-yieldable callback boundary). Every
    /// yield point in this bridge runs as part of an `mlua` async call, which
    /// is always yield-legal by construction, so this variant is presently
    /// unreachable in practice; kept so `ensure_coroutine`'s two documented
    /// failure messages both exist.
    #[error("{0} called in non-yieldable context")]
    NotYieldable(String),

    #[error(transparent)]
    Lua(#[from] mlua::Error),
}
