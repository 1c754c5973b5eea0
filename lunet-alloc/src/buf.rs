// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::ptr::NonNull;
use std::rc::Rc;

use crate::{AllocBackend, Facade, SystemBackend};

/// Owned, facade-backed byte buffer: the `AllocBuf::copy_from` ->
/// `as_slice`/`to_vec` -> drop cycle is how socket writes and storage-unit
/// blocks route real bytes through [`Facade`] instead of a bare `Vec<u8>`,
/// so the balance counters it maintains mean something (spec testable
/// property: `alloc_count == free_count` at shutdown).
///
/// A zero-length buffer never touches the backend at all — [`Facade::alloc`]
/// rejects `size == 0` by design, and an empty write is common enough (e.g.
/// `socket.write("")`) that it shouldn't be an error.
pub struct AllocBuf<B: AllocBackend = SystemBackend> {
    facade: Rc<Facade<B>>,
    ptr: Option<NonNull<u8>>,
    len: usize,
}

impl<B: AllocBackend> AllocBuf<B> {
    /// Allocates `data.len()` bytes from `facade` and copies `data` into it.
    /// Returns `None` only on backend allocation failure.
    pub fn copy_from(facade: &Rc<Facade<B>>, data: &[u8]) -> Option<Self> {
        if data.is_empty() {
            return Some(AllocBuf {
                facade: Rc::clone(facade),
                ptr: None,
                len: 0,
            });
        }
        let ptr = facade.alloc(data.len())?;
        // Safety: `ptr` was just allocated above with length `data.len()`.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len()) };
        Some(AllocBuf {
            facade: Rc::clone(facade),
            ptr: Some(ptr),
            len: data.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self.ptr {
            // Safety: `ptr` is a live allocation of exactly `self.len` bytes
            // from `self.facade`, freed only in `Drop`.
            Some(ptr) => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.len) },
            None => &[],
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl<B: AllocBackend> Drop for AllocBuf<B> {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            // Safety: `ptr` was allocated from `self.facade` in `copy_from`
            // and is freed exactly once, here.
            unsafe { self.facade.free(ptr) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_from_round_trips_bytes() {
        let facade = Rc::new(Facade::new());
        let buf = AllocBuf::copy_from(&facade, b"hello").expect("alloc");
        assert_eq!(buf.as_slice(), b"hello");
        assert_eq!(buf.to_vec(), b"hello".to_vec());
        drop(buf);
        assert!(facade.counters().is_balanced());
    }

    #[test]
    fn empty_buffer_never_touches_the_backend() {
        let facade = Rc::new(Facade::new());
        let buf = AllocBuf::copy_from(&facade, b"").expect("alloc");
        assert!(buf.is_empty());
        assert_eq!(buf.as_slice(), b"");
        drop(buf);
        assert_eq!(facade.counters().alloc_count(), 0);
        assert!(facade.counters().is_balanced());
    }

    #[test]
    fn drop_frees_and_balances() {
        let facade = Rc::new(Facade::new());
        {
            let _buf = AllocBuf::copy_from(&facade, b"payload").expect("alloc");
            assert_eq!(facade.counters().alloc_count(), 1);
            assert_eq!(facade.counters().free_count(), 0);
        }
        assert_eq!(facade.counters().free_count(), 1);
        assert!(facade.counters().is_balanced());
    }
}
