// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::rc::Rc;

use lunet_core::HandleHead;
use lunet_reactor::FsHandle;

/// Handle context for an open file (spec.md §4.J). `FsHandle` wraps an
/// `Arc<std::fs::File>` already, so independent positioned reads and
/// writes against the same fd run concurrently on the blocking thread
/// pool without needing an in-flight flag the way stream sockets do.
pub struct FsContext {
    pub head: HandleHead,
    pub handle: FsHandle,
}

impl FsContext {
    pub fn new(handle: FsHandle) -> Rc<Self> {
        Rc::new(FsContext {
            head: HandleHead::new(),
            handle,
        })
    }
}
