use tokio::sync::mpsc;

/// Create a single-slot handoff for the intended final state of a process.
///
/// The first recorded value wins; later records are refused.
pub fn pending_slot<T>() -> (PendingTx<T>, PendingRx<T>) {
    let (tx, rx) = mpsc::channel(1);
    (PendingTx { tx }, PendingRx { rx })
}

#[derive(Debug)]
pub struct PendingTx<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for PendingTx<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> PendingTx<T> {
    /// Returns `false` when a value was already recorded or the waiter is gone.
    pub fn record(&self, value: T) -> bool {
        self.tx.try_send(value).is_ok()
    }
}

#[derive(Debug)]
pub struct PendingRx<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> PendingRx<T> {
    /// Take the recorded value without blocking.
    pub fn take(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_record_wins() {
        let (tx, mut rx) = pending_slot();
        assert!(tx.record("killed"));
        assert!(!tx.clone().record("finished"));
        assert_eq!(rx.take(), Some("killed"));
        assert_eq!(rx.take(), None);
    }

    #[test]
    fn empty_slot_takes_nothing() {
        let (_tx, mut rx) = pending_slot::<u8>();
        assert_eq!(rx.take(), None);
    }

    #[test]
    fn record_after_waiter_dropped_fails() {
        let (tx, rx) = pending_slot();
        drop(rx);
        assert!(!tx.record(1));
    }
}
