use std::collections::HashMap;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

pub type SubscriberId = Uuid;

// Delivery end of one connected client.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    id: SubscriberId,
    tx: mpsc::Sender<String>,
}

impl SubscriberHandle {
    // Creates a handle together with the receiver the connection reads from.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { id: Uuid::new_v4(), tx }, rx)
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

// Outcome of a single `publish` call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    // Subscribers whose buffer was full; they missed this message but stay subscribed.
    pub lagging: Vec<SubscriberId>,
    // Subscribers whose channel was closed; they were unsubscribed.
    pub pruned: Vec<SubscriberId>,
}

// Topic name -> live subscribers.
//
// Each topic lives in its own map shard, so publishing on one key never
// waits on subscription traffic for an unrelated key.
#[derive(Default)]
pub struct Broadcaster {
    topics: DashMap<String, HashMap<SubscriberId, mpsc::Sender<String>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    // Registers `handle` under `topic`. Returns false if it was already registered.
    pub fn subscribe(&self, topic: &str, handle: SubscriberHandle) -> bool {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(handle.id, handle.tx)
            .is_none()
    }

    // Removes the subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, topic: &str, id: SubscriberId) -> bool {
        let removed = match self.topics.get_mut(topic) {
            Some(mut subscribers) => subscribers.remove(&id).is_some(),
            None => false,
        };
        self.topics.remove_if(topic, |_, subscribers| subscribers.is_empty());
        removed
    }

    // Delivers `message` to every subscriber currently registered under `topic`.
    //
    // Never fails on a subscriber's behalf: closed channels are unsubscribed and
    // reported in [`PublishReport::pruned`] for the caller to log.
    pub fn publish(&self, topic: &str, message: &str) -> PublishReport {
        let mut report = PublishReport::default();

        if let Some(mut subscribers) = self.topics.get_mut(topic) {
            subscribers.retain(|id, tx| match tx.try_send(message.to_string()) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    report.lagging.push(*id);
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    report.pruned.push(*id);
                    false
                }
            });
        }

        if !report.pruned.is_empty() {
            self.topics.remove_if(topic, |_, subscribers| subscribers.is_empty());
        }
        report
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    pub fn get_topic_list(&self) -> Vec<String> {
        self.topics.iter().map(|entry| entry.key().clone()).collect()
    }

    // (topic count, total subscriptions)
    pub fn get_stats(&self) -> (usize, usize) {
        let topic_count = self.topics.len();
        let subscription_count = self.topics.iter().map(|entry| entry.value().len()).sum();
        (topic_count, subscription_count)
    }
}
