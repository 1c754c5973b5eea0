// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::path::PathBuf;
use std::rc::Rc;

use lunet_core::AllocBuf;
use lunet_reactor::{FsHandle, Reactor};

use crate::bitmap::{bit_mask, byte_index, ByteTable};

const MAGIC: &[u8; 4] = b"SUBM";
const VERSION: u32 = 1;
const HEADER_LEN: u64 = 16;
const BLOCK_LEN: usize = 4096;

fn body_len(max_addresses: u64) -> usize {
    ((max_addresses + 7) / 8) as usize
}

/// Write-once, randomly-addressed 4 KiB block store (spec.md §4.K). Holds
/// its own `Rc<dyn Reactor>` (unlike the other module crates, which borrow
/// one per call) because the bitmap-flush loop is a persistent background
/// task decoupled from whichever `write_once` call happens to kick it off —
/// the same reason the listener's accept loop owns its reactor directly.
pub struct StorageUnit {
    reactor: Rc<dyn Reactor>,
    alloc: Rc<lunet_core::Facade>,
    data_fd: FsHandle,
    bitmap_fd: FsHandle,
    max_addresses: u64,
    committed: RefCell<Vec<u8>>,
    pending: RefCell<HashSet<u64>>,
    bytes: ByteTable,
    closed: Cell<bool>,
}

impl StorageUnit {
    /// spec.md §4.K `open(dir, max_addresses)`.
    pub async fn open(
        reactor: Rc<dyn Reactor>,
        alloc: Rc<lunet_core::Facade>,
        dir: PathBuf,
        max_addresses: u64,
    ) -> Result<Rc<Self>, String> {
        tokio::task::spawn_blocking({
            let dir = dir.clone();
            move || std::fs::create_dir_all(&dir)
        })
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;

        let data_path = dir.join("data.bin");
        let bitmap_path = dir.join("bitmap.bin");
        let open_flags = libc::O_CREAT | libc::O_RDWR;

        let data_fd = reactor
            .fs_open(data_path, open_flags, 0o644)
            .await
            .map_err(|e| e.script_message())?;
        let bitmap_fd = reactor
            .fs_open(bitmap_path.clone(), open_flags, 0o644)
            .await
            .map_err(|e| e.script_message())?;

        let body = body_len(max_addresses);
        let existing_size = reactor.fs_stat(&bitmap_path).await.ok().map(|s| s.size);

        let committed = if existing_size.map(|size| size >= HEADER_LEN + body as u64) == Some(true) {
            let header = reactor
                .fs_read(&bitmap_fd, HEADER_LEN as usize, Some(0))
                .await
                .map_err(|e| e.script_message())?;
            if &header[0..4] != MAGIC {
                return Err("bitmap file has bad magic".to_string());
            }
            let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
            if version != VERSION {
                return Err(format!("bitmap file has unsupported version {version}"));
            }
            let on_disk_max = u64::from_le_bytes(header[8..16].try_into().unwrap());
            if on_disk_max != max_addresses {
                return Err(format!(
                    "bitmap file max_addresses mismatch: on-disk {on_disk_max}, requested {max_addresses}"
                ));
            }
            reactor
                .fs_read(&bitmap_fd, body, Some(HEADER_LEN))
                .await
                .map_err(|e| e.script_message())?
        } else {
            let mut buf = Vec::with_capacity(HEADER_LEN as usize + body);
            buf.extend_from_slice(MAGIC);
            buf.extend_from_slice(&VERSION.to_le_bytes());
            buf.extend_from_slice(&max_addresses.to_le_bytes());
            buf.extend(std::iter::repeat(0u8).take(body));
            reactor
                .fs_write(&bitmap_fd, buf, Some(0))
                .await
                .map_err(|e| e.script_message())?;
            reactor
                .fs_fsync(&bitmap_fd)
                .await
                .map_err(|e| e.script_message())?;
            vec![0u8; body]
        };

        Ok(Rc::new(StorageUnit {
            reactor,
            alloc,
            data_fd,
            bitmap_fd,
            max_addresses,
            committed: RefCell::new(committed),
            pending: RefCell::new(HashSet::new()),
            bytes: ByteTable::default(),
            closed: Cell::new(false),
        }))
    }

    pub fn is_written(&self, addr: u64) -> bool {
        if addr >= self.max_addresses {
            return false;
        }
        let idx = byte_index(addr);
        self.committed
            .borrow()
            .get(idx)
            .map(|byte| byte & bit_mask(addr) != 0)
            .unwrap_or(false)
    }

    fn current_byte(&self, idx: usize) -> u8 {
        self.committed.borrow().get(idx).copied().unwrap_or(0)
    }

    fn bitmap_byte_offset(idx: usize) -> u64 {
        HEADER_LEN + idx as u64
    }

    /// spec.md §4.K `write_once(addr, data)`.
    pub async fn write_once(self: &Rc<Self>, addr: u64, data: Vec<u8>) -> Result<(), String> {
        if self.closed.get() {
            return Err("storage unit closed".to_string());
        }
        if data.len() != BLOCK_LEN {
            return Err("data must be exactly 4096 bytes".to_string());
        }
        if addr >= self.max_addresses {
            return Err("address out of range".to_string());
        }
        if self.is_written(addr) {
            return Err("ALREADY_WRITTEN".to_string());
        }
        if !self.pending.borrow_mut().insert(addr) {
            return Err("BUSY".to_string());
        }

        let buf = match AllocBuf::copy_from(&self.alloc, &data) {
            Some(buf) => buf,
            None => {
                self.pending.borrow_mut().remove(&addr);
                return Err("allocation failure".to_string());
            }
        };
        let offset = addr * BLOCK_LEN as u64;
        let n = match self.reactor.fs_write(&self.data_fd, buf.to_vec(), Some(offset)).await {
            Ok(n) => n,
            Err(err) => {
                self.pending.borrow_mut().remove(&addr);
                return Err(err.script_message());
            }
        };
        if n != BLOCK_LEN {
            self.pending.borrow_mut().remove(&addr);
            return Err("SHORT_WRITE".to_string());
        }
        if let Err(err) = self.reactor.fs_fsync(&self.data_fd).await {
            self.pending.borrow_mut().remove(&addr);
            return Err(err.script_message());
        }

        let idx = byte_index(addr);
        {
            let mut committed = self.committed.borrow_mut();
            if committed.len() <= idx {
                committed.resize(idx + 1, 0);
            }
            committed[idx] |= bit_mask(addr);
        }
        self.pending.borrow_mut().remove(&addr);

        let coord = self.bytes.entry(idx);
        let (rx, should_kick) = {
            let mut coord_mut = coord.borrow_mut();
            coord_mut.current_gen += 1;
            let target_gen = coord_mut.current_gen;
            let (tx, rx) = tokio::sync::oneshot::channel();
            coord_mut.waiters.push((target_gen, tx));
            let should_kick = !coord_mut.flushing;
            if should_kick {
                coord_mut.flushing = true;
            }
            (rx, should_kick)
        };
        if should_kick {
            spawn_flush_loop(Rc::clone(self), idx);
        }
        rx.await.unwrap_or_else(|_| Err("storage unit closed".to_string()))
    }

    /// spec.md §4.K `read(addr)`.
    pub async fn read(&self, addr: u64) -> Result<Vec<u8>, String> {
        if self.closed.get() {
            return Err("storage unit closed".to_string());
        }
        if !self.is_written(addr) {
            return Err("NOT_WRITTEN".to_string());
        }
        let offset = addr * BLOCK_LEN as u64;
        self.reactor
            .fs_read(&self.data_fd, BLOCK_LEN, Some(offset))
            .await
            .map_err(|e| e.script_message())
    }

    /// spec.md §4.K `close`: "closes both fds, drains active waiter queues
    /// with `storage unit closed` errors, frees state."
    pub async fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        self.bytes.drain_all();
        self.reactor.fs_close(self.data_fd.clone()).await;
        self.reactor.fs_close(self.bitmap_fd.clone()).await;
    }

    async fn flush_byte(&self, idx: usize, byte_value: u8) -> Result<(), String> {
        self.reactor
            .fs_write(&self.bitmap_fd, vec![byte_value], Some(Self::bitmap_byte_offset(idx)))
            .await
            .map_err(|e| e.script_message())?;
        self.reactor
            .fs_fsync(&self.bitmap_fd)
            .await
            .map_err(|e| e.script_message())
    }
}

/// Runs the flush loop for one bitmap byte until no waiters remain (spec.md
/// §4.K "Bitmap flush machine"): write the byte's current value, fsync,
/// resolve every waiter whose target generation has been reached, and loop
/// again if writes accumulated during the flush ("flushing-with-pending").
fn spawn_flush_loop(unit: Rc<StorageUnit>, idx: usize) {
    tokio::task::spawn_local(async move {
        loop {
            let coord = unit.bytes.entry(idx);
            let byte_value = unit.current_byte(idx);
            let attempt_gen = coord.borrow().current_gen;

            let result = unit.flush_byte(idx, byte_value).await;

            let mut coord_mut = coord.borrow_mut();
            let (resolved, pending): (Vec<_>, Vec<_>) = coord_mut
                .waiters
                .drain(..)
                .partition(|(gen, _)| *gen <= attempt_gen);
            coord_mut.waiters = pending;
            if result.is_ok() {
                coord_mut.flushed_gen = attempt_gen;
            }
            let remaining = !coord_mut.waiters.is_empty();
            if !remaining {
                coord_mut.flushing = false;
            }
            drop(coord_mut);

            match &result {
                Ok(()) => {
                    for (_, tx) in resolved {
                        let _ = tx.send(Ok(()));
                    }
                }
                Err(msg) => {
                    tracing::warn!(target: "lunet::su", byte = idx, %msg, "bitmap flush failed");
                    for (_, tx) in resolved {
                        let _ = tx.send(Err(msg.clone()));
                    }
                }
            }

            if !remaining {
                break;
            }
        }
    });
}
