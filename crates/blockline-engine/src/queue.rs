//! Bounded hand-off queues between stages.
//!
//! Producers suspend in [`BlockSender::send`] while the queue is full; that
//! is the only backpressure point of a run. Consumers wait at most one poll
//! interval in [`BlockReceiver::poll`] so they can re-check the shared
//! completion flags between waits.

use std::time::Duration;

use blockline_types::DataBlock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Outcome of one bounded wait on a queue.
#[derive(Debug)]
pub enum Polled {
    Block(DataBlock),
    /// Nothing arrived within the poll interval.
    Empty,
    /// Every producer is gone and the queue is drained.
    Closed,
}

/// The consumer has gone away; the block was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

/// Create a queue holding at most `capacity` blocks.
///
/// # Panics
///
/// Panics if `capacity` is zero; configuration validation rejects that first.
#[must_use]
pub fn channel(capacity: usize, poll_interval: Duration) -> (BlockSender, BlockReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        BlockSender { tx },
        BlockReceiver {
            rx,
            poll_interval,
        },
    )
}

#[derive(Debug, Clone)]
pub struct BlockSender {
    tx: mpsc::Sender<DataBlock>,
}

impl BlockSender {
    /// Enqueue `block`, waiting for a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] if the receiver was dropped.
    pub async fn send(&self, block: DataBlock) -> Result<(), QueueClosed> {
        self.tx.send(block).await.map_err(|_| QueueClosed)
    }

    /// Blocks currently buffered.
    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    #[must_use]
    pub fn max_capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

#[derive(Debug)]
pub struct BlockReceiver {
    rx: mpsc::Receiver<DataBlock>,
    poll_interval: Duration,
}

impl BlockReceiver {
    /// Wait up to one poll interval for the next block.
    pub async fn poll(&mut self) -> Polled {
        match tokio::time::timeout(self.poll_interval, self.rx.recv()).await {
            Ok(Some(block)) => Polled::Block(block),
            Ok(None) => Polled::Closed,
            Err(_) => Polled::Empty,
        }
    }

    /// Take a block that is already buffered, without waiting.
    ///
    /// Used after the producer's completion flag is seen, to pick up a block
    /// enqueued between the last wait and the flag.
    pub fn try_take(&mut self) -> Option<DataBlock> {
        match self.rx.try_recv() {
            Ok(block) => Some(block),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Blocks currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockline_types::Payload;
    use proptest::prelude::*;

    fn block(n: usize) -> DataBlock {
        DataBlock::new(Payload::Files(vec![bytes::Bytes::from(n.to_string())]), None)
    }

    fn label(b: &DataBlock) -> String {
        match &b.data {
            Payload::Files(f) => String::from_utf8(f[0].to_vec()).unwrap(),
            Payload::Table(_) => unreachable!(),
        }
    }

    #[tokio::test]
    async fn empty_then_closed() {
        let (tx, mut rx) = channel(2, Duration::from_millis(5));
        assert!(matches!(rx.poll().await, Polled::Empty));
        tx.send(block(1)).await.unwrap();
        drop(tx);
        assert!(matches!(rx.poll().await, Polled::Block(_)));
        assert!(matches!(rx.poll().await, Polled::Closed));
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (tx, rx) = channel(1, Duration::from_millis(5));
        drop(rx);
        assert_eq!(tx.send(block(0)).await, Err(QueueClosed));
    }

    #[tokio::test]
    async fn try_take_sees_buffered_block() {
        let (tx, mut rx) = channel(4, Duration::from_millis(5));
        assert!(rx.try_take().is_none());
        tx.send(block(7)).await.unwrap();
        assert_eq!(rx.len(), 1);
        assert_eq!(label(&rx.try_take().unwrap()), "7");
        assert!(rx.is_empty());
    }

    proptest! {
        #[test]
        fn occupancy_never_exceeds_capacity(capacity in 1usize..6, total in 0usize..40, slow_every in 1usize..5) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let received = rt.block_on(async move {
                let (tx, mut rx) = channel(capacity, Duration::from_millis(50));
                let observer = tx.clone();
                let producer = tokio::spawn(async move {
                    for n in 0..total {
                        tx.send(block(n)).await.unwrap();
                    }
                });
                let mut received = Vec::new();
                loop {
                    assert!(observer.occupancy() <= capacity);
                    assert!(rx.len() <= capacity);
                    if received.len() % slow_every == 0 {
                        tokio::task::yield_now().await;
                    }
                    match rx.poll().await {
                        Polled::Block(b) => received.push(label(&b)),
                        Polled::Empty => {}
                        Polled::Closed => unreachable!("observer sender keeps the queue open"),
                    }
                    if received.len() == total {
                        break;
                    }
                }
                producer.await.unwrap();
                received
            });
            let expected: Vec<String> = (0..total).map(|n| n.to_string()).collect();
            prop_assert_eq!(received, expected);
        }
    }
}
