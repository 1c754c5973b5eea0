// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

thread_local! {
    static CURRENT: Cell<Option<CoroutineId>> = Cell::new(None);
}

/// Opaque coroutine identity issued by [`crate::Registry::spawn`]. Stands in
/// for spec.md §9's "`set<CoroutineId>` where `CoroutineId` is an opaque key
/// issued by the runtime that hosts the coroutine implementation" — here,
/// a plain incrementing counter, since the single-threaded reactor never
/// needs to synchronize allocation of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoroutineId(pub(crate) u64);

impl CoroutineId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// The coroutine whose body is presently executing on this thread, if any.
/// Backs `ensure_coroutine` (spec.md §4.C): every yielding primitive must be
/// called from within a spawned coroutine's body.
pub fn current() -> Option<CoroutineId> {
    CURRENT.with(|c| c.get())
}

/// Scopes [`current`] to exactly the duration of each `poll` call on the
/// wrapped future rather than its whole lifetime. A plain RAII guard
/// entered once at spawn time would be wrong: suspending at an `.await`
/// returns control to the executor without running any destructor, and a
/// *different* coroutine's task may be polled while this one is pending, so
/// the thread-local has to be re-armed on every poll. Mirrors
/// `tracing::Instrument`'s per-poll span entry.
pub struct TrackCurrent<T> {
    id: CoroutineId,
    inner: Pin<Box<dyn Future<Output = T>>>,
}

impl<T> TrackCurrent<T> {
    pub fn new(id: CoroutineId, inner: impl Future<Output = T> + 'static) -> Self {
        TrackCurrent {
            id,
            inner: Box::pin(inner),
        }
    }
}

impl<T> Future for TrackCurrent<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        let prev = CURRENT.with(|c| c.replace(Some(this.id)));
        let res = this.inner.as_mut().poll(cx);
        CURRENT.with(|c| c.set(prev));
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn current_is_scoped_to_poll() {
        assert_eq!(current(), None);
        let id = CoroutineId(42);
        let tracked = TrackCurrent::new(id, async {
            assert_eq!(current(), Some(id));
        });
        tracked.await;
        assert_eq!(current(), None);
    }

    #[tokio::test]
    async fn interleaved_polls_do_not_bleed_into_each_other() {
        let a = TrackCurrent::new(CoroutineId(1), async {
            assert_eq!(current(), Some(CoroutineId(1)));
        });
        let b = TrackCurrent::new(CoroutineId(2), async {
            assert_eq!(current(), Some(CoroutineId(2)));
        });
        tokio::join!(a, b);
        assert_eq!(current(), None);
    }
}
