//! Output Streaming Hub (C4): multiplexes stdout/stderr/status/progress/
//! resource-usage events per execution to any number of subscribers, with
//! join-time replay of recent history. New module grounded in the pack's
//! pub/sub event-modeling patterns (no direct teacher analogue — the
//! teacher streams to a single caller rather than fanning out to many).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

use crate::domain::execution::ResourceUsage;
use crate::ids::ExecutionId;

/// Default per-topic history retained for subscribers that join late.
const DEFAULT_CACHE_LIMIT: usize = 1000;

/// Default broadcast channel capacity before a slow subscriber starts
/// lagging (see `Subscription::recv`'s `Lagged` handling).
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum HubPayload {
    Started { pid: Option<u32> },
    Stdout(String),
    Stderr(String),
    Error(String),
    Status(String),
    Progress(serde_json::Value),
    ResourceUsage(ResourceUsage),
    Completed { exit_code: i32, output_files: Vec<String> },
    /// Synthesized locally by a lagging subscriber's own receive loop, never
    /// broadcast by the publisher itself.
    BackpressureDrop { skipped: u64 },
}

#[derive(Debug, Clone)]
pub struct HubEvent {
    pub eid: ExecutionId,
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub payload: HubPayload,
}

struct Topic {
    cache: VecDeque<HubEvent>,
    sender: broadcast::Sender<HubEvent>,
    next_seq: u64,
    cache_limit: usize,
}

impl Topic {
    fn new(cache_limit: usize, channel_capacity: usize) -> Self {
        let (sender, _rx) = broadcast::channel(channel_capacity);
        Self {
            cache: VecDeque::with_capacity(cache_limit.min(256)),
            sender,
            next_seq: 0,
            cache_limit,
        }
    }

    fn push(&mut self, eid: ExecutionId, payload: HubPayload) -> HubEvent {
        let event = HubEvent {
            eid,
            seq: self.next_seq,
            at: Utc::now(),
            payload,
        };
        self.next_seq += 1;
        self.cache.push_back(event.clone());
        while self.cache.len() > self.cache_limit {
            self.cache.pop_front();
        }
        event
    }
}

/// A joined subscriber's view: its replay snapshot followed by a live
/// broadcast receiver, both captured under one topic-lock critical section
/// so no event can land in the gap between the two (I3).
pub struct Subscription {
    eid: ExecutionId,
    replay: VecDeque<HubEvent>,
    rx: broadcast::Receiver<HubEvent>,
}

impl Subscription {
    /// Returns the next event: drains the replay snapshot first, then
    /// forwards live broadcasts. A `Lagged` receive is surfaced as one
    /// `BackpressureDrop` event rather than propagated as an error, so a
    /// slow subscriber is warned and resumed instead of disconnected.
    pub async fn recv(&mut self) -> Option<HubEvent> {
        if let Some(event) = self.replay.pop_front() {
            return Some(event);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Some(HubEvent {
                        eid: self.eid,
                        seq: 0,
                        at: Utc::now(),
                        payload: HubPayload::BackpressureDrop { skipped },
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Process-wide registry of per-execution topics.
pub struct StreamingHub {
    topics: Mutex<HashMap<ExecutionId, Arc<Mutex<Topic>>>>,
    cache_limit: usize,
    channel_capacity: usize,
}

impl StreamingHub {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            cache_limit: DEFAULT_CACHE_LIMIT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_cache_limit(cache_limit: usize, channel_capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            cache_limit,
            channel_capacity,
        }
    }

    /// Creates the topic if absent. Called when an execution starts so the
    /// first publish never races a subscriber's first join.
    pub async fn create_topic(&self, eid: ExecutionId) {
        let mut topics = self.topics.lock().await;
        topics
            .entry(eid)
            .or_insert_with(|| Arc::new(Mutex::new(Topic::new(self.cache_limit, self.channel_capacity))));
    }

    async fn topic_for(&self, eid: ExecutionId) -> Arc<Mutex<Topic>> {
        let mut topics = self.topics.lock().await;
        topics
            .entry(eid)
            .or_insert_with(|| Arc::new(Mutex::new(Topic::new(self.cache_limit, self.channel_capacity))))
            .clone()
    }

    /// Publishes an event to the topic's cache and any live subscribers.
    /// A `send` error just means nobody is currently subscribed; the cache
    /// still retains the event for later joiners.
    pub async fn publish(&self, eid: ExecutionId, payload: HubPayload) {
        let topic = self.topic_for(eid).await;
        let mut topic = topic.lock().await;
        let event = topic.push(eid, payload);
        let _ = topic.sender.send(event);
    }

    /// Returns (at most) the last `last_n` cached events without
    /// subscribing to live traffic. Used by `logs(EID, lastN)`-style reads
    /// that want a snapshot, not a stream.
    pub async fn recent(&self, eid: ExecutionId, last_n: usize) -> Vec<HubEvent> {
        let topic = self.topic_for(eid).await;
        let topic = topic.lock().await;
        let len = topic.cache.len();
        let skip = len.saturating_sub(last_n);
        topic.cache.iter().skip(skip).cloned().collect()
    }

    /// Atomically snapshots the topic's cache and subscribes to its
    /// broadcast sender while holding the topic lock, so no event
    /// published after the snapshot but before the subscribe is missed or
    /// duplicated (I3: replay-then-live with no gap, no duplicate).
    pub async fn join(&self, eid: ExecutionId) -> Subscription {
        let topic = self.topic_for(eid).await;
        let topic = topic.lock().await;
        Subscription {
            eid,
            replay: topic.cache.clone(),
            rx: topic.sender.subscribe(),
        }
    }

    /// Removes a topic immediately, dropping its cache and disconnecting
    /// any live subscribers. Prefer `schedule_teardown` from a running
    /// supervisor so subscribers finishing reads after `Completed` still
    /// have a grace window.
    pub async fn remove_topic(&self, eid: ExecutionId) {
        self.topics.lock().await.remove(&eid);
    }

    /// Schedules topic removal after `grace`, run on the hub's own task so
    /// callers on the hot completion path never block on it.
    pub fn schedule_teardown(self: &Arc<Self>, eid: ExecutionId, grace: Duration) {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            hub.remove_topic(eid).await;
            warn!(%eid, "streaming topic torn down after grace window");
        });
    }
}

impl Default for StreamingHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_replays_history_then_switches_to_live() {
        let hub = StreamingHub::new();
        let eid = ExecutionId::new();

        hub.publish(eid, HubPayload::Stdout("one".into())).await;
        hub.publish(eid, HubPayload::Stdout("two".into())).await;

        let mut sub = hub.join(eid).await;
        hub.publish(eid, HubPayload::Stdout("three".into())).await;

        let mut lines = Vec::new();
        for _ in 0..3 {
            if let Some(event) = sub.recv().await {
                if let HubPayload::Stdout(line) = event.payload {
                    lines.push(line);
                }
            }
        }
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn two_subscribers_both_receive_live_events() {
        let hub = StreamingHub::new();
        let eid = ExecutionId::new();
        hub.create_topic(eid).await;

        let mut sub_a = hub.join(eid).await;
        let mut sub_b = hub.join(eid).await;

        hub.publish(eid, HubPayload::Status("running".into())).await;

        let a = sub_a.recv().await.unwrap();
        let b = sub_b.recv().await.unwrap();
        assert!(matches!(a.payload, HubPayload::Status(ref s) if s == "running"));
        assert!(matches!(b.payload, HubPayload::Status(ref s) if s == "running"));
    }

    #[tokio::test]
    async fn lagging_subscriber_gets_backpressure_drop_not_disconnected() {
        let hub = StreamingHub::with_cache_limit(4, 2);
        let eid = ExecutionId::new();
        let mut sub = hub.join(eid).await;

        for i in 0..10 {
            hub.publish(eid, HubPayload::Stdout(format!("line-{i}"))).await;
        }

        let mut saw_drop = false;
        for _ in 0..10 {
            match sub.recv().await {
                Some(event) => {
                    if matches!(event.payload, HubPayload::BackpressureDrop { .. }) {
                        saw_drop = true;
                    }
                }
                None => break,
            }
        }
        assert!(saw_drop, "expected a BackpressureDrop event for the lagging subscriber");
    }

    #[tokio::test]
    async fn teardown_after_grace_removes_topic() {
        let hub = Arc::new(StreamingHub::new());
        let eid = ExecutionId::new();
        hub.publish(eid, HubPayload::Status("completed".into())).await;

        hub.schedule_teardown(eid, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(60)).await;

        // A fresh join after teardown gets an empty replay (new topic).
        let mut sub = hub.join(eid).await;
        hub.publish(eid, HubPayload::Status("new-topic".into())).await;
        let event = sub.recv().await.unwrap();
        assert!(matches!(event.payload, HubPayload::Status(ref s) if s == "new-topic"));
    }
}
