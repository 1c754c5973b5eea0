// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
/// Error returned by a [`crate::Reactor`] operation. Reported to scripts as
/// `(nil, errmsg)` (or just `errmsg`) per spec.md §7.
#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ReactorError {
    pub fn other(msg: impl Into<String>) -> Self {
        ReactorError::Other(msg.into())
    }

    /// Rendered the way every error string reaching a script is rendered:
    /// UTF-8, `strerror`-equivalent where the source is I/O (spec.md §7).
    pub fn script_message(&self) -> String {
        self.to_string()
    }
}

