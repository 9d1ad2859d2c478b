//! Pub/sub for state-change signals.
//!
//! Stores that own state emit events; dependent stores subscribe and react
//! synchronously inside `emit`, so by the time an operation returns every
//! dependent store has already dropped or refreshed its derived state.
//! The presentation layer gets the same events through a broadcast feed.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;

const OBSERVER_CAPACITY: usize = 64;

/// A store that reacts to events of type `E`.
pub trait Subscriber<E>: Send + Sync {
    fn notify(&self, event: &E);
}

pub struct Signal<E> {
    subscribers: Mutex<Vec<Weak<dyn Subscriber<E>>>>,
    observers: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> Signal<E> {
    pub fn new() -> Self {
        let (observers, _) = broadcast::channel(OBSERVER_CAPACITY);
        Self {
            subscribers: Mutex::new(Vec::new()),
            observers,
        }
    }

    /// Registers a subscriber. Held weakly: dropping the store unsubscribes it.
    pub fn connect<S>(&self, subscriber: &Arc<S>)
    where
        S: Subscriber<E> + 'static,
    {
        let weak: Weak<S> = Arc::downgrade(subscriber);
        let weak: Weak<dyn Subscriber<E>> = weak;
        lock(&self.subscribers).push(weak);
    }

    /// Feed for observers outside the core. Lagging receivers lose old events.
    pub fn observe(&self) -> broadcast::Receiver<E> {
        self.observers.subscribe()
    }

    pub fn emit(&self, event: E) {
        // Collect live subscribers first so none of them runs under our lock.
        let live: Vec<Arc<dyn Subscriber<E>>> = {
            let mut subscribers = lock(&self.subscribers);
            subscribers.retain(|s| s.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };

        for subscriber in live {
            subscriber.notify(&event);
        }

        // No observers is fine.
        let _ = self.observers.send(event);
    }
}

impl<E: Clone + Send + 'static> Default for Signal<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Mutex<Vec<u32>>);

    impl Subscriber<u32> for Recorder {
        fn notify(&self, event: &u32) {
            lock(&self.0).push(*event);
        }
    }

    #[test]
    fn test_subscribers_are_notified_in_order() {
        let signal = Signal::new();
        let recorder = Arc::new(Recorder(Mutex::new(vec![])));
        signal.connect(&recorder);

        signal.emit(1);
        signal.emit(2);

        assert_eq!(*lock(&recorder.0), vec![1, 2]);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let signal = Signal::new();
        let recorder = Arc::new(Recorder(Mutex::new(vec![])));
        signal.connect(&recorder);
        drop(recorder);

        signal.emit(7);
        assert!(lock(&signal.subscribers).is_empty());
    }

    #[tokio::test]
    async fn test_observers_receive_events() {
        let signal = Signal::new();
        let mut rx = signal.observe();
        signal.emit(42u32);
        assert_eq!(rx.recv().await.unwrap(), 42);
    }
}
