// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tokio::sync::oneshot;

/// Per-bitmap-byte flush coordination (spec.md §4.K "Bitmap flush machine").
/// Shared via `Rc<RefCell<_>>` so the flush loop can hold it across awaits
/// while `write_once` calls keep enqueuing new waiters concurrently.
#[derive(Default)]
pub struct ByteCoord {
    pub flushing: bool,
    pub current_gen: u64,
    pub flushed_gen: u64,
    pub waiters: Vec<(u64, oneshot::Sender<Result<(), String>>)>,
}

/// One entry per bitmap byte that has ever had a writer (spec.md §4.K:
/// "a per-bitmap-byte coordination table"). Bytes never written through
/// `write_once` need no entry at all.
#[derive(Default)]
pub struct ByteTable {
    bytes: RefCell<HashMap<usize, Rc<RefCell<ByteCoord>>>>,
}

impl ByteTable {
    pub fn entry(&self, byte_index: usize) -> Rc<RefCell<ByteCoord>> {
        Rc::clone(
            self.bytes
                .borrow_mut()
                .entry(byte_index)
                .or_insert_with(|| Rc::new(RefCell::new(ByteCoord::default()))),
        )
    }

    /// spec.md §4.K `close`: "drains active waiter queues with `storage
    /// unit closed` errors."
    pub fn drain_all(&self) {
        for coord in self.bytes.borrow().values() {
            let mut coord = coord.borrow_mut();
            for (_, tx) in coord.waiters.drain(..) {
                let _ = tx.send(Err("storage unit closed".to_string()));
            }
        }
    }
}

pub fn byte_index(addr: u64) -> usize {
    (addr / 8) as usize
}

pub fn bit_mask(addr: u64) -> u8 {
    1 << (addr % 8)
}
