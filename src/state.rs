//! Replay-latest observable values.
//!
//! [`ObservableState`] is the single-writer side of a `tokio::sync::watch`
//! channel. The owner sets values; any number of readers subscribe and
//! immediately see the latest value.

use std::fmt;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// A single-writer, multi-reader value with replay-latest semantics.
///
/// Setting a value equal to the current one does not notify readers.
pub struct ObservableState<T> {
    tx: watch::Sender<T>,
}

impl<T> ObservableState<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create with an initial value.
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Get a copy of the current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Publish a new value.
    ///
    /// Returns `true` if the value changed and readers were notified.
    pub fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    /// Publish a value even if it compares equal to the current one.
    ///
    /// Used for values whose equality ignores fields readers care about.
    pub fn replace(&self, value: T) -> T {
        self.tx.send_replace(value)
    }

    /// Subscribe to changes. The receiver starts with the current value.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Subscribe as a stream that yields the current value first.
    pub fn stream(&self) -> WatchStream<T> {
        WatchStream::new(self.tx.subscribe())
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T> Default for ObservableState<T>
where
    T: Clone + PartialEq + Send + Sync + Default + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for ObservableState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableState")
            .field("value", &*self.tx.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_new_subscriber_sees_latest() {
        let state = ObservableState::new(false);
        state.set(true);

        let rx = state.subscribe();
        assert!(*rx.borrow());
        assert!(state.get());
    }

    #[test]
    fn test_equal_values_are_not_republished() {
        let state = ObservableState::new(1u8);
        let mut rx = state.subscribe();

        assert!(!state.set(1));
        assert!(!rx.has_changed().unwrap());

        assert!(state.set(2));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 2);
    }

    #[test]
    fn test_waiting_reader_not_woken_by_equal_value() {
        let state = ObservableState::new(false);
        let mut rx = state.subscribe();
        let mut changed = tokio_test::task::spawn(rx.changed());

        tokio_test::assert_pending!(changed.poll());
        state.set(false);
        assert!(!changed.is_woken());

        state.set(true);
        assert!(changed.is_woken());
        tokio_test::assert_ready_ok!(changed.poll());
    }

    #[test]
    fn test_replace_always_notifies() {
        let state = ObservableState::new(3u8);
        let mut rx = state.subscribe();

        assert_eq!(state.replace(3), 3);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_set_without_subscribers() {
        let state = ObservableState::new(0u32);
        assert_eq!(state.subscriber_count(), 0);
        state.set(7);
        assert_eq!(state.get(), 7);
    }

    #[tokio::test]
    async fn test_stream_yields_current_then_changes() {
        let state = ObservableState::new("idle".to_string());
        let mut stream = state.stream();

        assert_eq!(stream.next().await.as_deref(), Some("idle"));
        state.set("ready".to_string());
        assert_eq!(stream.next().await.as_deref(), Some("ready"));
    }

    #[tokio::test]
    async fn test_slow_reader_gets_latest() {
        let state = ObservableState::new(0u32);
        let mut rx = state.subscribe();
        rx.borrow_and_update();

        for i in 1..=5 {
            state.set(i);
        }

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 5);
    }
}
