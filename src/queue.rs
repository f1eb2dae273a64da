//! Bounded message queue between the capture thread and the network loop
//!
//! The producer side may wait briefly for room; the consumer side never blocks.
//! When the queue stays full past the producer's wait bound, the configured
//! [`OverflowPolicy`] decides what is lost.

use crate::events::{ControlEvent, QueueItem};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// What to discard when the producer outpaces the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued audio frame. Stale PCM is worth less than fresh
    /// PCM in a live conversation. Control items are only evicted when nothing
    /// but control items is queued.
    #[default]
    DropOldest,
    /// Discard the incoming item and keep the backlog intact
    DropNewest,
}

/// Result of a producer's `enqueue`
#[derive(Debug, PartialEq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queued after evicting an older item
    Evicted(QueueItem),
    /// The incoming item was discarded
    Rejected(QueueItem),
}

pub struct MessageQueue {
    items: Mutex<VecDeque<QueueItem>>,
    not_full: Condvar,
    capacity: usize,
    producer_wait: Duration,
    policy: OverflowPolicy,
    dropped: AtomicU64,
}

impl MessageQueue {
    pub fn new(capacity: usize, producer_wait: Duration, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            not_full: Condvar::new(),
            capacity,
            producer_wait,
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueueItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item, waiting up to the producer bound for room.
    pub fn enqueue(&self, item: impl Into<QueueItem>) -> EnqueueOutcome {
        let item = item.into();
        let mut items = self.lock();

        if items.len() >= self.capacity {
            let (guard, _) = self
                .not_full
                .wait_timeout_while(items, self.producer_wait, |q| q.len() >= self.capacity)
                .unwrap_or_else(PoisonError::into_inner);
            items = guard;
        }

        if items.len() < self.capacity {
            items.push_back(item);
            return EnqueueOutcome::Queued;
        }

        self.dropped.fetch_add(1, Ordering::Relaxed);
        match self.policy {
            OverflowPolicy::DropNewest => EnqueueOutcome::Rejected(item),
            OverflowPolicy::DropOldest => {
                let victim = items.iter().position(QueueItem::is_audio).unwrap_or(0);
                let evicted = items.remove(victim);
                items.push_back(item);
                match evicted {
                    Some(evicted) => EnqueueOutcome::Evicted(evicted),
                    None => EnqueueOutcome::Queued,
                }
            }
        }
    }

    /// Append a control item on behalf of the consumer side.
    ///
    /// Never waits and never rejects: at capacity the oldest audio frame makes
    /// room, and with no audio queued the item goes in past capacity.
    pub fn enqueue_control(&self, event: ControlEvent) -> EnqueueOutcome {
        let mut items = self.lock();
        let evicted = if items.len() >= self.capacity {
            items
                .iter()
                .position(QueueItem::is_audio)
                .and_then(|victim| items.remove(victim))
        } else {
            None
        };
        items.push_back(QueueItem::Control(event));

        match evicted {
            Some(evicted) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Evicted(evicted)
            }
            None => EnqueueOutcome::Queued,
        }
    }

    /// Take the head item without blocking.
    pub fn dequeue_if_any(&self) -> Option<QueueItem> {
        let item = self.lock().pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Put an item back at the head after a failed send.
    ///
    /// Always succeeds, even if it briefly takes the queue one past capacity.
    pub fn requeue_front(&self, item: QueueItem) {
        self.lock().push_front(item);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of items lost to the overflow policy
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AudioFrame;
    use std::sync::Arc;
    use std::time::Instant;

    fn frame(seq: u64) -> QueueItem {
        QueueItem::Audio(AudioFrame { seq, pcm: vec![seq as u8; 4] })
    }

    fn seqs(queue: &MessageQueue) -> Vec<Option<u64>> {
        std::iter::from_fn(|| queue.dequeue_if_any())
            .map(|item| match item {
                QueueItem::Audio(f) => Some(f.seq),
                QueueItem::Control(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_fifo_order_across_kinds() {
        let queue = MessageQueue::new(16, Duration::ZERO, OverflowPolicy::DropOldest);
        queue.enqueue(frame(1));
        queue.enqueue(frame(2));
        queue.enqueue(ControlEvent::AudioComplete);
        queue.enqueue(frame(3));

        assert_eq!(seqs(&queue), vec![Some(1), Some(2), None, Some(3)]);
        assert!(queue.dequeue_if_any().is_none());
    }

    #[test]
    fn test_drop_oldest_evicts_audio_not_markers() {
        let queue = MessageQueue::new(3, Duration::from_millis(1), OverflowPolicy::DropOldest);
        queue.enqueue(ControlEvent::AudioComplete);
        queue.enqueue(frame(1));
        queue.enqueue(frame(2));

        match queue.enqueue(frame(3)) {
            EnqueueOutcome::Evicted(QueueItem::Audio(f)) => assert_eq!(f.seq, 1),
            other => panic!("Unexpected outcome: {:?}", other),
        }
        assert_eq!(queue.dropped(), 1);
        assert_eq!(seqs(&queue), vec![None, Some(2), Some(3)]);
    }

    #[test]
    fn test_drop_oldest_falls_back_to_head_when_only_markers() {
        let queue = MessageQueue::new(2, Duration::ZERO, OverflowPolicy::DropOldest);
        queue.enqueue(ControlEvent::AudioComplete);
        queue.enqueue(ControlEvent::SessionTerminated);

        match queue.enqueue(frame(9)) {
            EnqueueOutcome::Evicted(QueueItem::Control(ControlEvent::AudioComplete)) => {}
            other => panic!("Unexpected outcome: {:?}", other),
        }
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_drop_newest_keeps_backlog() {
        let queue = MessageQueue::new(2, Duration::ZERO, OverflowPolicy::DropNewest);
        queue.enqueue(frame(1));
        queue.enqueue(frame(2));

        assert_eq!(queue.enqueue(frame(3)), EnqueueOutcome::Rejected(frame(3)));
        assert_eq!(seqs(&queue), vec![Some(1), Some(2)]);
    }

    #[test]
    fn test_producer_wait_is_bounded() {
        let queue = MessageQueue::new(1, Duration::from_millis(30), OverflowPolicy::DropOldest);
        queue.enqueue(frame(1));

        let start = Instant::now();
        queue.enqueue(frame(2));
        let waited = start.elapsed();

        assert!(waited >= Duration::from_millis(30));
        assert!(waited < Duration::from_secs(2));
        assert_eq!(seqs(&queue), vec![Some(2)]);
    }

    #[test]
    fn test_producer_resumes_when_consumer_makes_room() {
        let queue = Arc::new(MessageQueue::new(1, Duration::from_secs(5), OverflowPolicy::DropOldest));
        queue.enqueue(frame(1));

        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                queue.dequeue_if_any()
            })
        };

        assert_eq!(queue.enqueue(frame(2)), EnqueueOutcome::Queued);
        assert_eq!(consumer.join().unwrap(), Some(frame(1)));
        assert_eq!(queue.dropped(), 0);
        assert_eq!(seqs(&queue), vec![Some(2)]);
    }

    #[test]
    fn test_control_items_bypass_full_queue() {
        let queue = MessageQueue::new(2, Duration::from_secs(5), OverflowPolicy::DropNewest);
        queue.enqueue(frame(1));
        queue.enqueue(frame(2));

        let start = Instant::now();
        match queue.enqueue_control(ControlEvent::SessionTerminated) {
            EnqueueOutcome::Evicted(QueueItem::Audio(f)) => assert_eq!(f.seq, 1),
            other => panic!("Unexpected outcome: {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_secs(1), "control enqueue must not wait");
        assert_eq!(queue.dropped(), 1);
        assert_eq!(seqs(&queue), vec![Some(2), None]);
    }

    #[test]
    fn test_control_items_exceed_capacity_without_audio() {
        let queue = MessageQueue::new(1, Duration::ZERO, OverflowPolicy::DropNewest);
        queue.enqueue(ControlEvent::AudioComplete);

        assert_eq!(queue.enqueue_control(ControlEvent::SessionTerminated), EnqueueOutcome::Queued);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue_if_any(), Some(QueueItem::Control(ControlEvent::AudioComplete)));
        assert_eq!(queue.dequeue_if_any(), Some(QueueItem::Control(ControlEvent::SessionTerminated)));
    }

    #[test]
    fn test_requeue_front_preserves_position() {
        let queue = MessageQueue::new(4, Duration::ZERO, OverflowPolicy::DropOldest);
        queue.enqueue(frame(1));
        queue.enqueue(frame(2));

        let head = queue.dequeue_if_any().unwrap();
        queue.requeue_front(head);

        assert_eq!(seqs(&queue), vec![Some(1), Some(2)]);
    }
}
