//! Bounded outbound report queue.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
}

/// Bounded FIFO shared by the telemetry producer and the transport.
///
/// Sends never block: a full queue hands the item back so the producer can
/// decide what to evict.
pub struct ReportChannel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ReportChannel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> ReportChannel<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue without blocking. Returns the item when the queue is full.
    pub fn try_send(&self, item: T) -> Result<(), T> {
        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.shared.capacity {
                return Err(item);
            }
            queue.push_back(item);
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Enqueue, evicting the oldest item when the queue is full.
    ///
    /// Eviction and insertion happen under one lock, so a concurrent
    /// consumer can never cause a second eviction. Returns the evicted item,
    /// or hands `item` back when the queue cannot hold anything at all.
    pub fn force_send(&self, item: T) -> Result<Option<T>, T> {
        let evicted = {
            let mut queue = self.shared.queue.lock();
            if self.shared.capacity == 0 {
                return Err(item);
            }
            let evicted = if queue.len() >= self.shared.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(item);
            evicted
        };
        self.shared.notify.notify_one();
        Ok(evicted)
    }

    /// Remove and return the oldest queued item.
    pub fn pop_oldest(&self) -> Option<T> {
        self.shared.queue.lock().pop_front()
    }

    /// Wait for the next item.
    pub async fn recv(&self) -> T {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(item) = self.pop_oldest() {
                return item;
            }
            notified.await;
        }
    }

    /// Remove every queued item, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.shared.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_full_queue_returns_item() {
        let channel = ReportChannel::new(2);
        channel.try_send(1).unwrap();
        channel.try_send(2).unwrap();

        assert_eq!(channel.try_send(3), Err(3));
        assert_eq!(channel.len(), 2);
        assert_eq!(channel.pop_oldest(), Some(1));
        channel.try_send(3).unwrap();
        assert_eq!(channel.drain(), vec![2, 3]);
        assert!(channel.is_empty());
    }

    #[test]
    fn test_force_send_evicts_only_when_full() {
        let channel = ReportChannel::new(2);
        assert_eq!(channel.force_send(1), Ok(None));
        assert_eq!(channel.force_send(2), Ok(None));
        assert_eq!(channel.force_send(3), Ok(Some(1)));
        assert_eq!(channel.len(), 2);

        // Room freed by the consumer is used instead of evicting again.
        assert_eq!(channel.pop_oldest(), Some(2));
        assert_eq!(channel.force_send(4), Ok(None));
        assert_eq!(channel.drain(), vec![3, 4]);
    }

    #[test]
    fn test_force_send_zero_capacity_returns_item() {
        let channel = ReportChannel::new(0);
        assert_eq!(channel.force_send("report"), Err("report"));
        assert!(channel.is_empty());
    }

    #[tokio::test]
    async fn test_recv_waits_for_send() {
        let channel = ReportChannel::new(4);
        let consumer = channel.clone();
        let handle = tokio::spawn(async move { consumer.recv().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        channel.try_send("report").unwrap();

        assert_eq!(handle.await.unwrap(), "report");
    }
}
