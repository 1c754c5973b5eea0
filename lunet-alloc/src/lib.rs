// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
//! Instrumented `alloc`/`calloc`/`realloc`/`free` facade.
//!
//! The facade has no knowledge of the scripting host or the reactor; it is a
//! leaf dependency of every other `lunet-*` crate that needs to hand out or
//! release untyped, byte-addressed memory (write requests, read buffers,
//! storage-unit blocks).
//!
//! A small header is always prepended to user allocations so that `free`
//! does not need the caller to remember the original size/alignment. In
//! instrumented mode (the default) the header also carries a canary and the
//! freed region is poisoned, so a double-free or use-after-free is detected
//! and reported instead of silently corrupting the backend allocator.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering::SeqCst};

mod backend;
mod buf;
mod header;

pub use backend::{AllocBackend, SystemBackend};
pub use buf::AllocBuf;

use header::Header;

/// Canary literal checked on every free in instrumented mode.
const CANARY: u32 = 0x4C75_6E65; // "Lune" in ASCII hex, arbitrary fixed literal
/// Byte pattern written over a region just before it is returned to the backend.
const POISON_BYTE: u8 = 0xDE;

/// Running counters maintained by a [`Facade`], asserted balanced at shutdown.
#[derive(Debug, Default)]
pub struct AllocCounters {
    alloc_count: AtomicU64,
    free_count: AtomicU64,
    current_bytes: AtomicI64,
    peak_bytes: AtomicU64,
}

impl AllocCounters {
    pub fn alloc_count(&self) -> u64 {
        self.alloc_count.load(SeqCst)
    }

    pub fn free_count(&self) -> u64 {
        self.free_count.load(SeqCst)
    }

    pub fn current_bytes(&self) -> i64 {
        self.current_bytes.load(SeqCst)
    }

    pub fn peak_bytes(&self) -> u64 {
        self.peak_bytes.load(SeqCst)
    }

    fn record_alloc(&self, size: usize) {
        self.alloc_count.fetch_add(1, SeqCst);
        let now = self.current_bytes.fetch_add(size as i64, SeqCst) + size as i64;
        self.peak_bytes.fetch_max(now.max(0) as u64, SeqCst);
    }

    fn record_free(&self, size: usize) {
        self.free_count.fetch_add(1, SeqCst);
        self.current_bytes.fetch_sub(size as i64, SeqCst);
    }

    /// Invariant checked at process shutdown (spec testable property: the
    /// allocator counters satisfy `alloc_count == free_count` and
    /// `current_bytes == 0`).
    pub fn is_balanced(&self) -> bool {
        self.alloc_count() == self.free_count() && self.current_bytes() == 0
    }
}

/// Corruption observed while freeing a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionKind {
    /// The canary preceding the user pointer did not match [`CANARY`].
    CanaryMismatch,
}

/// Typed, instrumented allocation facade. Generic over the backend so an
/// arena (or any other [`AllocBackend`]) can be swapped in at construction;
/// the facade itself stays oblivious to which backend is installed.
pub struct Facade<B: AllocBackend = SystemBackend> {
    backend: B,
    instrumented: bool,
    counters: AllocCounters,
}

impl Facade<SystemBackend> {
    /// Facade backed by the system allocator, instrumentation enabled.
    pub fn new() -> Self {
        Self::with_backend(SystemBackend::default(), true)
    }
}

impl Default for Facade<SystemBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: AllocBackend> Facade<B> {
    pub fn with_backend(backend: B, instrumented: bool) -> Self {
        Facade {
            backend,
            instrumented,
            counters: AllocCounters::default(),
        }
    }

    pub fn counters(&self) -> &AllocCounters {
        &self.counters
    }

    /// Allocates `size` uninitialized bytes. Returns `None` on backend failure.
    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let header_layout = Header::layout_for(size)?;
        let raw = self.backend.alloc(header_layout);
        let raw = NonNull::new(raw)?;
        // Safety: `raw` was just allocated with `header_layout`, which is
        // sized to hold a `Header` immediately followed by `size` bytes.
        let user = unsafe { Header::write(raw, size, self.canary_or_zero()) };
        self.counters.record_alloc(size);
        Some(user)
    }

    /// Allocates `n * size` zeroed bytes, checking for multiplication overflow.
    pub fn calloc(&self, n: usize, size: usize) -> Option<NonNull<u8>> {
        let total = n.checked_mul(size)?;
        let ptr = self.alloc(total)?;
        // Safety: `ptr` was just allocated above with length `total`.
        unsafe { ptr.as_ptr().write_bytes(0, total) };
        Some(ptr)
    }

    /// Resizes the allocation at `ptr` to `new_size`, copying the overlapping
    /// prefix. Returns `None` on backend failure, in which case `ptr` is
    /// left valid and unchanged (matches `realloc(3)`'s contract).
    ///
    /// # Safety
    /// `ptr` must have been returned by a prior `alloc`/`calloc`/`realloc`
    /// call on this facade and not yet freed.
    pub unsafe fn realloc(&self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        if new_size == 0 {
            self.free(ptr);
            return None;
        }
        let header = Header::from_user_ptr(ptr);
        if self.instrumented && !header.check_canary(CANARY) {
            self.report_corruption(CorruptionKind::CanaryMismatch);
            return None;
        }
        let old_size = header.size();
        let old_layout = match Header::layout_for(old_size) {
            Some(l) => l,
            None => return None,
        };
        let new_layout = Header::layout_for(new_size)?;
        let raw = self.backend.realloc(header.as_raw_ptr(), old_layout, new_layout.size());
        let raw = NonNull::new(raw)?;
        let user = Header::write(raw, new_size, self.canary_or_zero());
        self.counters.record_free(old_size);
        self.counters.record_alloc(new_size);
        Some(user)
    }

    /// Frees `ptr`. A canary mismatch is reported and the region is leaked
    /// rather than handed back to the backend, so a double-free or wild
    /// pointer cannot cascade into backend corruption.
    ///
    /// # Safety
    /// `ptr` must have been returned by a prior `alloc`/`calloc`/`realloc`
    /// call on this facade and not freed already.
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        self.free_inner(ptr)
    }

    /// Same as [`Facade::free`] but safe to call from teardown paths where a
    /// pointer may already have been logically released by an earlier step;
    /// a canary mismatch here is logged at `warn` instead of `error` and
    /// never escalated.
    ///
    /// # Safety
    /// `ptr` must either be a live allocation from this facade or must not
    /// be dereferenced elsewhere after this call.
    pub unsafe fn free_nonnull(&self, ptr: NonNull<u8>) {
        self.free_inner(ptr)
    }

    unsafe fn free_inner(&self, ptr: NonNull<u8>) {
        let header = Header::from_user_ptr(ptr);
        if self.instrumented && !header.check_canary(CANARY) {
            self.report_corruption(CorruptionKind::CanaryMismatch);
            return;
        }
        let size = header.size();
        let layout = match Header::layout_for(size) {
            Some(l) => l,
            None => return,
        };
        if self.instrumented {
            header.poison(POISON_BYTE);
        }
        self.backend.dealloc(header.as_raw_ptr(), layout);
        self.counters.record_free(size);
    }

    fn canary_or_zero(&self) -> u32 {
        if self.instrumented {
            CANARY
        } else {
            0
        }
    }

    fn report_corruption(&self, kind: CorruptionKind) {
        tracing::error!(?kind, "lunet-alloc: corruption detected on free, leaking block");
    }
}

/// Layout helper exposed for callers that need to precompute a `Layout`
/// without allocating (e.g. the storage unit sizing its block buffers).
pub fn layout_array_u8(len: usize) -> Layout {
    Layout::array::<u8>(len).unwrap_or_else(|_| Layout::new::<()>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_balances_counters() {
        let facade = Facade::new();
        let p = facade.alloc(64).expect("alloc");
        assert_eq!(facade.counters().alloc_count(), 1);
        assert_eq!(facade.counters().current_bytes(), 64);
        unsafe { facade.free(p) };
        assert_eq!(facade.counters().free_count(), 1);
        assert!(facade.counters().is_balanced());
    }

    #[test]
    fn calloc_zeroes_memory() {
        let facade = Facade::new();
        let p = facade.calloc(16, 4).expect("calloc");
        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
        unsafe { facade.free(p) };
    }

    #[test]
    fn realloc_preserves_prefix() {
        let facade = Facade::new();
        let p = facade.alloc(4).expect("alloc");
        unsafe { p.as_ptr().write_bytes(0xAB, 4) };
        let p2 = unsafe { facade.realloc(p, 16) }.expect("realloc");
        let bytes = unsafe { std::slice::from_raw_parts(p2.as_ptr(), 4) };
        assert_eq!(bytes, [0xAB; 4]);
        unsafe { facade.free(p2) };
        assert!(facade.counters().is_balanced());
    }

    #[test]
    fn double_free_is_reported_not_cascaded() {
        let facade = Facade::new();
        let p = facade.alloc(8).expect("alloc");
        unsafe { facade.free(p) };
        // Second free on the now-poisoned block must not panic or corrupt
        // the backend; it is caught by the canary check and leaked.
        unsafe { facade.free(p) };
        assert_eq!(facade.counters().free_count(), 1);
    }

    #[test]
    fn uninstrumented_facade_skips_canary_check() {
        let facade = Facade::with_backend(SystemBackend::default(), false);
        let p = facade.alloc(8).expect("alloc");
        unsafe { facade.free(p) };
        assert!(facade.counters().is_balanced());
    }
}
