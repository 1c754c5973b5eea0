// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::cell::Cell;
use std::rc::Rc;

use lunet_core::HandleHead;
use lunet_reactor::UdpHandle;

/// Handle context for a bound UDP socket (spec.md §4.G). Datagram send has
/// no "one outstanding per handle" rule — it needs no in-flight flag the
/// way `read`/`write` do on a stream — but `recv` does.
pub struct DatagramContext {
    pub head: HandleHead,
    pub handle: UdpHandle,
    pub recv_in_flight: Cell<bool>,
}

impl DatagramContext {
    pub fn new(handle: UdpHandle) -> Rc<Self> {
        Rc::new(DatagramContext {
            head: HandleHead::new(),
            handle,
            recv_in_flight: Cell::new(false),
        })
    }
}
