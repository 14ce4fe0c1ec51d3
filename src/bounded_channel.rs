// SPDX-License-Identifier: Apache-2.0

use flume::{Receiver, Sender};
use std::fmt;
use std::time::Duration;

/// Bounded channel between harvester threads and the async event consumer.
///
/// Harvesters are plain OS threads, so the sender side exposes a blocking
/// send; the consumer side is async. Backpressure from a full channel is
/// what throttles reading.
pub struct BoundedSender<T> {
    tx: Sender<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    Disconnected,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl<T> BoundedSender<T> {
    pub async fn send(&self, item: T) -> Result<(), SendError> {
        match self.tx.send_async(item).await {
            Ok(()) => Ok(()),
            Err(_e) => Err(SendError::Disconnected), // receiver closed
        }
    }

    /// Blocking send - blocks until there is capacity in the channel.
    /// Use this from non-async contexts (e.g., dedicated OS threads).
    pub fn send_blocking(&self, item: T) -> Result<(), SendError> {
        match self.tx.send(item) {
            Ok(()) => Ok(()),
            Err(_e) => Err(SendError::Disconnected), // receiver closed
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    pub async fn next(&mut self) -> Option<T> {
        match self.rx.recv_async().await {
            Ok(item) => Some(item),
            Err(_e) => None, // disconnected
        }
    }

    /// Non-blocking receive - returns immediately.
    /// Returns None if no item is available or channel is disconnected.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Blocking receive with timeout - blocks until an item is available or timeout.
    /// Returns None if timeout expires or channel is disconnected.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);

    let sender = BoundedSender { tx };
    let receiver = BoundedReceiver { rx };

    (sender, receiver)
}

#[cfg(test)]
mod tests {
    use super::{SendError, bounded};
    use std::time::Duration;

    #[tokio::test]
    async fn basics() {
        let (tx, mut rx) = bounded(3);

        tx.send(10).await.unwrap();
        assert_eq!(Some(10), rx.next().await);

        drop(tx);
        // receives None since send channel was closed
        assert_eq!(None, rx.next().await);
    }

    #[test]
    fn blocking_send_and_timeout_recv() {
        let (tx, rx) = bounded(1);

        tx.send_blocking(5).unwrap();
        assert_eq!(Some(5), rx.recv_timeout(Duration::from_millis(10)));
        assert_eq!(None, rx.recv_timeout(Duration::from_millis(10)));

        drop(rx);
        assert_eq!(Err(SendError::Disconnected), tx.send_blocking(6));
    }

    #[test]
    fn try_recv_after_disconnect() {
        let (tx, rx) = bounded::<u32>(1);
        assert_eq!(None, rx.try_recv());
        tx.send_blocking(1).unwrap();
        drop(tx);
        assert_eq!(Some(1), rx.try_recv());
        assert_eq!(None, rx.try_recv());
    }
}
