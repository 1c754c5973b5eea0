// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::cell::Cell;
use std::future::Future;

const CANARY: u32 = 0x4C75_4E48;

/// Common head shared by every handle-context variant (spec.md §3 "Handle
/// context": listener, client stream, datagram, timer, signal, fs, su).
/// Per-variant wake-handle fields live alongside this head in each module
/// crate's own context struct.
pub struct HandleHead {
    ref_count: Cell<u32>,
    closing: Cell<bool>,
    canary: u32,
}

impl HandleHead {
    /// Created with refcount 1: the reactor handle's own reference
    /// (spec.md §4.E: "listen/connect/bind/open => refcount := 1").
    pub fn new() -> Self {
        HandleHead {
            ref_count: Cell::new(1),
            closing: Cell::new(false),
            canary: CANARY,
        }
    }

    /// Checked on every callback entry in instrumentation builds (spec.md
    /// §3); a mismatch indicates a wild pointer / reused slot.
    pub fn canary_ok(&self) -> bool {
        self.canary == CANARY
    }

    pub fn is_closing(&self) -> bool {
        self.closing.get()
    }

    /// `closing` is monotonic (spec.md §4.E); returns whether this call
    /// performed the transition — a second `close` is a no-op.
    pub fn mark_closing(&self) -> bool {
        !self.closing.replace(true)
    }

    pub fn retain(&self) {
        self.ref_count.set(self.ref_count.get() + 1);
    }

    /// Releases one reference, returning the count after release. Callers
    /// free the context's resources once this reaches zero (spec.md §4.E).
    pub fn release(&self) -> u32 {
        let next = self.ref_count.get().saturating_sub(1);
        self.ref_count.set(next);
        next
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.get()
    }
}

impl Default for HandleHead {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a single-shot reactor operation under the §4.E refcount discipline
/// shared by every module crate: the submission takes a reference
/// (`retain`), the completion releases it (`release`) the instant the
/// reactor future resolves — regardless of what happens next.
///
/// If the handle was closed while the operation was in flight, the
/// completion must never reach the waiting coroutine (spec.md §4.F:
/// "will never be resumed"). Rather than resuming with a synthetic error,
/// this suspends forever: since the handle-context's refcount has already
/// been released above, this cannot affect the §8 item 2 invariant
/// (`refcount == 0 iff freed`), and the calling coroutine's task is the one
/// left parked, exactly mirroring the source's "anchored but never
/// resumed" straggler.
pub async fn guarded<T>(head: &HandleHead, op: impl Future<Output = T>) -> T {
    head.retain();
    let result = op.await;
    head.release();
    if head.is_closing() {
        std::future::pending::<()>().await;
    }
    result
}

/// Same contract as [`guarded`], but for an operation the reactor has no way
/// to cancel on its own (a stream read/write blocked on the peer): races it
/// against `notify` so a concurrent `close()` can unblock the waiting task
/// instead of leaving it parked on the raw I/O future forever (spec.md
/// §4.B: "operations submitted before close but completing after it must
/// still deliver their callback exactly once"). Returns `None` if `notify`
/// fired first, or if the handle was already closing before the operation
/// was even submitted — in both cases the caller must not resume its
/// waiting coroutine, mirroring `guarded`'s closing branch.
pub async fn guarded_cancelable<T>(
    head: &HandleHead,
    notify: &tokio::sync::Notify,
    op: impl Future<Output = T>,
) -> Option<T> {
    if head.is_closing() {
        return None;
    }
    head.retain();
    let outcome = tokio::select! {
        biased;
        _ = notify.notified() => None,
        result = op => Some(result),
    };
    head.release();
    if head.is_closing() {
        None
    } else {
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refcount_discipline_matches_spec_e() {
        let head = HandleHead::new();
        assert_eq!(head.ref_count(), 1);
        head.retain(); // submitted op
        assert_eq!(head.ref_count(), 2);
        assert_eq!(head.release(), 1); // completion callback
        assert_eq!(head.release(), 0); // close callback
    }

    #[test]
    fn close_is_idempotent() {
        let head = HandleHead::new();
        assert!(head.mark_closing());
        assert!(!head.mark_closing());
        assert!(head.is_closing());
    }

    #[tokio::test]
    async fn guarded_releases_before_checking_closing() {
        let head = HandleHead::new();
        let result = guarded(&head, async { 42 }).await;
        assert_eq!(result, 42);
        assert_eq!(head.ref_count(), 1); // back to just the reactor handle's own ref
    }

    #[tokio::test]
    async fn guarded_never_resolves_once_closing() {
        let head = HandleHead::new();
        head.mark_closing();
        let fut = guarded(&head, async { 1 });
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), fut).await;
        assert!(timed_out.is_err());
        assert_eq!(head.ref_count(), 1); // release already happened before the hang
    }

    #[tokio::test]
    async fn guarded_cancelable_completes_normally_without_a_notification() {
        let head = HandleHead::new();
        let notify = tokio::sync::Notify::new();
        let result = guarded_cancelable(&head, &notify, async { 42 }).await;
        assert_eq!(result, Some(42));
        assert_eq!(head.ref_count(), 1);
    }

    #[tokio::test]
    async fn guarded_cancelable_unblocks_on_notify() {
        let head = HandleHead::new();
        let notify = tokio::sync::Notify::new();
        let waiter = guarded_cancelable(&head, &notify, std::future::pending::<()>());
        tokio::pin!(waiter);
        let notifier = async { notify.notify_waiters() };
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), async {
            let (result, _) = tokio::join!(waiter, notifier);
            result
        })
        .await;
        assert_eq!(timed_out.unwrap(), None);
        assert_eq!(head.ref_count(), 1); // release already happened
    }
}
