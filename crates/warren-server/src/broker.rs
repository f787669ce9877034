//! The watch broker: pushed container-assignment changes per node.
//!
//! Each subscriber gets a bounded lock-free queue. Publishing never
//! blocks: a queue that fills up marks its subscriber lapsed and the
//! serving connection closes, forcing the client to reconnect and re-read
//! a snapshot. Back-pressure by disconnection, not by buffering.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crossbeam_queue::ArrayQueue;
use tokio::sync::Notify;
use tracing::warn;
use warren_types::NodeId;
use warren_wire::WatchEvent;

/// Events buffered per subscriber before it is considered lapsed.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

struct Subscriber {
    node_id: NodeId,
    queue: Arc<ArrayQueue<WatchEvent>>,
    notify: Arc<Notify>,
    lapsed: Arc<AtomicBool>,
}

/// Fan-out of container events to node watchers.
#[derive(Default)]
pub struct Broker {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a watcher for one node's assignments.
    pub fn subscribe(&self, node_id: NodeId) -> Subscription {
        let queue = Arc::new(ArrayQueue::new(SUBSCRIBER_QUEUE_CAPACITY));
        let notify = Arc::new(Notify::new());
        let lapsed = Arc::new(AtomicBool::new(false));
        self.subscribers.lock().expect("lock").push(Subscriber {
            node_id,
            queue: queue.clone(),
            notify: notify.clone(),
            lapsed: lapsed.clone(),
        });
        Subscription {
            queue,
            notify,
            lapsed,
        }
    }

    /// Delivers one event to every live watcher of `node_id`. A full queue
    /// laps its subscriber; lapsed subscribers are dropped from the list.
    pub fn publish(&self, node_id: &NodeId, event: &WatchEvent) {
        let mut subscribers = self.subscribers.lock().expect("lock");
        subscribers.retain(|sub| {
            if sub.lapsed.load(Ordering::Acquire) {
                return false;
            }
            if &sub.node_id != node_id {
                return true;
            }
            if sub.queue.push(event.clone()).is_err() {
                warn!(node = %node_id, "watch subscriber lapsed, disconnecting");
                sub.lapsed.store(true, Ordering::Release);
                sub.notify.notify_one();
                return false;
            }
            sub.notify.notify_one();
            true
        });
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("lock").len()
    }
}

/// A watcher's receiving end.
pub struct Subscription {
    queue: Arc<ArrayQueue<WatchEvent>>,
    notify: Arc<Notify>,
    lapsed: Arc<AtomicBool>,
}

impl Subscription {
    /// The next event, or `None` once the subscription has lapsed and its
    /// buffered events are drained (the caller should disconnect so the
    /// client resnapshots).
    pub async fn next(&self) -> Option<WatchEvent> {
        loop {
            if let Some(event) = self.queue.pop() {
                return Some(event);
            }
            if self.lapsed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub fn is_lapsed(&self) -> bool {
        self.lapsed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warren_types::ContainerId;

    fn event(id: &str) -> WatchEvent {
        WatchEvent::Deleted(ContainerId::new(id))
    }

    #[tokio::test]
    async fn events_reach_only_matching_subscribers() {
        let broker = Broker::new();
        let sub_a = broker.subscribe(NodeId::new("a"));
        let _sub_b = broker.subscribe(NodeId::new("b"));

        broker.publish(&NodeId::new("a"), &event("c1"));
        assert_eq!(sub_a.next().await, Some(event("c1")));
        assert!(!sub_a.is_lapsed());
    }

    #[tokio::test]
    async fn overflow_laps_the_subscriber() {
        let broker = Broker::new();
        let sub = broker.subscribe(NodeId::new("a"));

        for i in 0..=SUBSCRIBER_QUEUE_CAPACITY {
            broker.publish(&NodeId::new("a"), &event(&format!("c{i}")));
        }
        assert!(sub.is_lapsed());
        assert_eq!(broker.subscriber_count(), 0, "lapsed subscriber dropped");

        // Buffered events drain, then the lapse surfaces as end-of-stream.
        let mut drained = 0;
        while sub.next().await.is_some() {
            drained += 1;
        }
        assert_eq!(drained, SUBSCRIBER_QUEUE_CAPACITY);
    }
}
