//! Session-state channel
//!
//! A single-slot, latest-value-wins handoff between provider notification
//! delivery and the coordinator's serialized consumer loop.
//!
//! - Publishing is synchronous, never blocks and may be called from any thread.
//! - A value published before the consumer pulls the previous one overwrites it.
//! - Each published value is observed at most once; the newest is never lost.

use std::sync::Arc;

use tokio::sync::watch;

/// Create a connected publisher/consumer pair
pub fn session_state_channel<T>() -> (StatePublisher<T>, StateConsumer<T>)
where
    T: Clone + Send + Sync,
{
    let (tx, rx) = watch::channel(None);
    (
        StatePublisher { tx: Arc::new(tx) },
        StateConsumer { rx },
    )
}

/// Producer side; cheap to clone and safe to share across threads
#[derive(Debug)]
pub struct StatePublisher<T> {
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for StatePublisher<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> StatePublisher<T> {
    /// Replace the slot if `accept` approves of its current contents.
    ///
    /// `accept` runs under the channel lock, so no other publish can land
    /// between the decision and the replacement. Returns whether `value`
    /// was published. Succeeds even if the consumer is gone.
    pub fn publish_if<F>(&self, value: T, accept: F) -> bool
    where
        F: FnOnce(Option<&T>) -> bool,
    {
        self.tx.send_if_modified(|slot| {
            if !accept(slot.as_ref()) {
                return false;
            }
            *slot = Some(value);
            true
        })
    }
}

/// Consumer side; exactly one exists per channel
#[derive(Debug)]
pub struct StateConsumer<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> StateConsumer<T> {
    /// Wait for the next unseen value.
    ///
    /// Returns `None` once every publisher has been dropped and the final
    /// value (if any) has been taken.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(value) = self.rx.borrow_and_update().clone() {
                return Some(value);
            }
        }
    }

}
