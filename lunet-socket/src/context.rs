// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use lunet_core::{CorefSlot, HandleHead};
use lunet_reactor::{PeerName, ReactorError, StreamHandle};
use tokio::sync::Notify;

/// Handle context for a bound listener (spec.md §3/§4.F). `accept_coref`
/// and `pending` together implement the pending-accept queue: an inbound
/// connection is delivered to a waiting `accept()` if one is armed,
/// otherwise queued. A background task owns the reactor's `ListenerHandle`
/// directly and feeds both; `close_notify` is how `close()` interrupts that
/// task's otherwise-unbounded `accept().await`. `local_port` is set once the
/// listener is bound, so a script that asked for port `0` can recover the
/// OS-assigned ephemeral port (spec.md §8 S1).
pub struct ListenerContext {
    pub head: HandleHead,
    pub accept_coref: RefCell<CorefSlot<Result<Rc<ClientContext>, ReactorError>>>,
    pub pending: RefCell<VecDeque<Rc<ClientContext>>>,
    pub close_notify: Rc<Notify>,
    pub local_port: Cell<Option<u16>>,
}

impl ListenerContext {
    pub fn new() -> Rc<Self> {
        Rc::new(ListenerContext {
            head: HandleHead::new(),
            accept_coref: RefCell::new(CorefSlot::new()),
            pending: RefCell::new(VecDeque::new()),
            close_notify: Rc::new(Notify::new()),
            local_port: Cell::new(None),
        })
    }
}

/// Handle context for a connected stream, TCP or Unix-domain (spec.md
/// §4.F). Read and write are independent: each has its own in-flight flag,
/// and the underlying [`StreamHandle`] already splits its halves so the two
/// never contend on one `RefCell`. `close_notify` races a concurrent
/// `close()` against an in-flight `read`/`write` that the reactor has no
/// other way to cancel (the peer simply hasn't sent anything yet).
pub struct ClientContext {
    pub head: HandleHead,
    pub stream: StreamHandle,
    pub read_in_flight: Cell<bool>,
    pub write_in_flight: Cell<bool>,
    pub close_notify: Notify,
}

impl ClientContext {
    pub fn new(stream: StreamHandle) -> Rc<Self> {
        Rc::new(ClientContext {
            head: HandleHead::new(),
            stream,
            read_in_flight: Cell::new(false),
            write_in_flight: Cell::new(false),
            close_notify: Notify::new(),
        })
    }

    pub fn peer_name(&self) -> &PeerName {
        self.stream.peer_name()
    }
}
