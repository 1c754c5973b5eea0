// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
use tokio::sync::oneshot;

/// Single-shot wake handle (spec.md §3 "coref", §4.D). Holds the sender half
/// of a one-shot channel while an operation is outstanding; a primitive's
/// yield point awaits the matching receiver.
pub struct CorefSlot<T> {
    sender: Option<oneshot::Sender<T>>,
}

impl<T> Default for CorefSlot<T> {
    fn default() -> Self {
        CorefSlot { sender: None }
    }
}

impl<T> CorefSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// `coref_create`: arms the slot and hands back the receiver to await.
    /// Invariant (spec.md §3): the slot holds no sender before this call,
    /// by the one-outstanding-op-per-handle rule.
    pub fn arm(&mut self) -> oneshot::Receiver<T> {
        debug_assert!(self.sender.is_none(), "coref slot already armed");
        let (tx, rx) = oneshot::channel();
        self.sender = Some(tx);
        rx
    }

    pub fn is_armed(&self) -> bool {
        self.sender.is_some()
    }

    /// `coref_load` + delivery: fires the held sender with the op's result.
    /// A no-op if the slot was already closed or fired.
    pub fn fire(&mut self, value: T) {
        if let Some(tx) = self.sender.take() {
            let _ = tx.send(value);
        }
    }

    /// Close path (spec.md §4.D step 2 / §4.F "close"): release the slot
    /// without ever resuming the waiting coroutine. Simply dropping the
    /// sender would complete the receiver with a `RecvError`, which *would*
    /// resume the waiter — with an error, but a resume all the same — which
    /// is exactly what "will never be resumed" forbids. Forgetting the
    /// sender instead leaves the receiver permanently pending, matching the
    /// contract that a straggler close never wakes its waiter; the
    /// waiter's coroutine simply stays anchored and suspended, same as the
    /// source's GC-rooted-but-never-resumed coroutine.
    pub fn close(&mut self) {
        if let Some(tx) = self.sender.take() {
            std::mem::forget(tx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fire_delivers_value() {
        let mut slot = CorefSlot::new();
        let rx = slot.arm();
        slot.fire(7);
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn close_never_resolves_receiver() {
        let mut slot = CorefSlot::<i32>::new();
        let rx = slot.arm();
        slot.close();
        assert!(!slot.is_armed());
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), rx).await;
        assert!(timed_out.is_err(), "closed coref must never resolve");
    }
}
