//! Message broker seam
//!
//! The dispatch client and the workers only talk to a [`MessageBroker`]:
//! plain publish/subscribe for responses, and a durable work queue with
//! competing consumers for requests. [`MemoryBroker`] implements both in
//! process; a networked broker plugs in behind the same trait.
//!
//! Subjects are dot-separated tokens. In subscription patterns `*` matches
//! exactly one token and `>` matches one or more trailing tokens.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use crate::error::{DispatchError, DispatchResult};

/// Acknowledges one delivery of a queued message
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> DispatchResult<()>;
}

/// A delivered message
#[derive(Clone)]
pub struct Message {
    pub subject: String,
    pub payload: Vec<u8>,
    /// Broker-assigned sequence number, unique per broker
    pub sequence: u64,
    /// 1 on first delivery, incremented on every redelivery
    pub delivery_count: u32,
    acker: Option<Arc<dyn Acknowledge>>,
}

impl Message {
    pub fn new(subject: impl Into<String>, payload: Vec<u8>, sequence: u64) -> Self {
        Message {
            subject: subject.into(),
            payload,
            sequence,
            delivery_count: 1,
            acker: None,
        }
    }

    pub fn with_acker(mut self, acker: Arc<dyn Acknowledge>) -> Self {
        self.acker = Some(acker);
        self
    }

    /// Acknowledge the delivery. Messages outside a work queue need no
    /// acknowledgement and succeed immediately.
    pub async fn ack(&self) -> DispatchResult<()> {
        match &self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("subject", &self.subject)
            .field("sequence", &self.sequence)
            .field("delivery_count", &self.delivery_count)
            .field("payload_len", &self.payload.len())
            .field("ackable", &self.acker.is_some())
            .finish()
    }
}

/// Live subscription; unsubscribes when dropped
pub struct Subscription {
    pattern: String,
    receiver: mpsc::UnboundedReceiver<Message>,
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(
        pattern: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<Message>,
        on_drop: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Subscription {
            pattern: pattern.into(),
            receiver,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Next message, or `None` once the broker has gone away
    pub async fn next_message(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .finish()
    }
}

/// Transport used by the dispatch client and the workers
#[async_trait]
pub trait MessageBroker: Send + Sync + 'static {
    /// Publish `payload` on `subject`
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> DispatchResult<()>;

    /// Receive every later message whose subject matches `pattern`
    async fn subscribe(&self, pattern: &str) -> DispatchResult<Subscription>;

    /// Make `subject` a durable work queue. Idempotent.
    async fn declare_queue(&self, subject: &str, ack_wait: Duration) -> DispatchResult<()>;

    /// Take the next message from the work queue on `subject`, waiting up
    /// to `wait` for one to arrive.
    async fn fetch(&self, subject: &str, wait: Duration) -> DispatchResult<Option<Message>>;
}

/// Whether `subject` matches the subscription `pattern`
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

fn check_subject(subject: &str, allow_wildcards: bool) -> DispatchResult<()> {
    let valid = !subject.is_empty()
        && subject.split('.').all(|token| {
            !token.is_empty()
                && !token.chars().any(char::is_whitespace)
                && (allow_wildcards || (token != "*" && token != ">"))
        });

    if valid {
        Ok(())
    } else {
        Err(DispatchError::transport(format!("invalid subject {subject:?}")))
    }
}

/// In-process broker
///
/// Cloning is cheap; clones share the same subjects and queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, WorkQueue>,
    subscribers: Vec<Subscriber>,
    next_sequence: u64,
    next_subscriber: u64,
}

struct Subscriber {
    id: u64,
    pattern: String,
    sender: mpsc::UnboundedSender<Message>,
}

struct WorkQueue {
    ack_wait: Duration,
    ready: VecDeque<Stored>,
    in_flight: HashMap<u64, InFlight>,
    notify: Arc<Notify>,
}

struct Stored {
    sequence: u64,
    payload: Vec<u8>,
    deliveries: u32,
}

struct InFlight {
    stored: Stored,
    deadline: Instant,
}

impl WorkQueue {
    fn new(ack_wait: Duration) -> Self {
        WorkQueue {
            ack_wait,
            ready: VecDeque::new(),
            in_flight: HashMap::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Put deliveries whose ack deadline passed back at the head of the queue
    fn requeue_expired(&mut self, now: Instant) {
        let mut expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, flight)| flight.deadline <= now)
            .map(|(sequence, _)| *sequence)
            .collect();
        expired.sort_unstable();

        for sequence in expired.into_iter().rev() {
            if let Some(flight) = self.in_flight.remove(&sequence) {
                tracing::debug!(sequence, "ack deadline passed, redelivering");
                self.ready.push_front(flight.stored);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.values().map(|flight| flight.deadline).min()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages in the queue on `subject`, delivered or not, that nobody
    /// has acknowledged yet
    pub fn pending(&self, subject: &str) -> usize {
        let inner = self.inner.lock();
        inner
            .queues
            .get(subject)
            .map_or(0, |queue| queue.ready.len() + queue.in_flight.len())
    }

    pub fn subscriber_count(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .subscribers
            .iter()
            .filter(|sub| !sub.sender.is_closed())
            .count()
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> DispatchResult<()> {
        check_subject(subject, false)?;

        let mut inner = self.inner.lock();
        inner.next_sequence += 1;
        let sequence = inner.next_sequence;

        if let Some(queue) = inner.queues.get_mut(subject) {
            queue.ready.push_back(Stored {
                sequence,
                payload,
                deliveries: 0,
            });
            queue.notify.notify_one();
            tracing::trace!(subject, sequence, "queued");
            return Ok(());
        }

        inner.subscribers.retain(|sub| !sub.sender.is_closed());
        let mut delivered = 0usize;
        for sub in inner
            .subscribers
            .iter()
            .filter(|sub| subject_matches(&sub.pattern, subject))
        {
            let message = Message::new(subject, payload.clone(), sequence);
            if sub.sender.send(message).is_ok() {
                delivered += 1;
            }
        }

        if delivered == 0 {
            tracing::trace!(subject, sequence, "no subscriber, message dropped");
        }
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> DispatchResult<Subscription> {
        check_subject(pattern, true)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let id = {
            let mut inner = self.inner.lock();
            inner.next_subscriber += 1;
            let id = inner.next_subscriber;
            inner.subscribers.push(Subscriber {
                id,
                pattern: pattern.to_string(),
                sender,
            });
            id
        };

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(pattern, receiver, move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().subscribers.retain(|sub| sub.id != id);
            }
        }))
    }

    async fn declare_queue(&self, subject: &str, ack_wait: Duration) -> DispatchResult<()> {
        check_subject(subject, false)?;
        if ack_wait.is_zero() {
            return Err(DispatchError::transport("ack wait must be non-zero"));
        }

        let mut inner = self.inner.lock();
        inner
            .queues
            .entry(subject.to_string())
            .and_modify(|queue| queue.ack_wait = ack_wait)
            .or_insert_with(|| WorkQueue::new(ack_wait));
        Ok(())
    }

    async fn fetch(&self, subject: &str, wait: Duration) -> DispatchResult<Option<Message>> {
        let give_up = Instant::now() + wait;

        loop {
            let (notify, next_deadline) = {
                let mut inner = self.inner.lock();
                let queue = inner.queues.get_mut(subject).ok_or_else(|| {
                    DispatchError::transport(format!("no queue declared on {subject:?}"))
                })?;

                let now = Instant::now();
                queue.requeue_expired(now);

                if let Some(mut stored) = queue.ready.pop_front() {
                    stored.deliveries += 1;
                    let sequence = stored.sequence;
                    let mut message = Message::new(subject, stored.payload.clone(), sequence)
                        .with_acker(Arc::new(QueueAck {
                            broker: Arc::downgrade(&self.inner),
                            subject: subject.to_string(),
                            sequence,
                            delivery: stored.deliveries,
                        }));
                    message.delivery_count = stored.deliveries;

                    let deadline = now + queue.ack_wait;
                    queue.in_flight.insert(sequence, InFlight { stored, deadline });
                    return Ok(Some(message));
                }

                (queue.notify.clone(), queue.next_deadline())
            };

            if Instant::now() >= give_up {
                return Ok(None);
            }
            let wake_at = next_deadline.map_or(give_up, |deadline| deadline.min(give_up));
            let _ = tokio::time::timeout_at(wake_at, notify.notified()).await;
        }
    }
}

struct QueueAck {
    broker: Weak<Mutex<Inner>>,
    subject: String,
    sequence: u64,
    delivery: u32,
}

#[async_trait]
impl Acknowledge for QueueAck {
    async fn ack(&self) -> DispatchResult<()> {
        let Some(inner) = self.broker.upgrade() else {
            return Err(DispatchError::transport("broker is gone"));
        };
        let mut inner = inner.lock();
        let Some(queue) = inner.queues.get_mut(&self.subject) else {
            return Ok(());
        };

        // Only the delivery that is current may retire the message. A late
        // ack still retires one that was put back but not handed out again.
        let current = queue
            .in_flight
            .get(&self.sequence)
            .map(|flight| flight.stored.deliveries);
        match current {
            Some(delivery) if delivery == self.delivery => {
                queue.in_flight.remove(&self.sequence);
            }
            Some(delivery) => {
                tracing::debug!(
                    subject = %self.subject,
                    sequence = self.sequence,
                    stale = self.delivery,
                    current = delivery,
                    "ignoring ack from an earlier delivery"
                );
                return Ok(());
            }
            None => queue.ready.retain(|stored| {
                stored.sequence != self.sequence || stored.deliveries != self.delivery
            }),
        }
        tracing::trace!(subject = %self.subject, sequence = self.sequence, "acked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_subject_matching() {
        assert!(subject_matches("move-res.abc", "move-res.abc"));
        assert!(subject_matches("move-res.*", "move-res.abc"));
        assert!(!subject_matches("move-res.*", "move-res"));
        assert!(!subject_matches("move-res.*", "move-res.abc.def"));
        assert!(subject_matches("move-res.>", "move-res.abc.def"));
        assert!(!subject_matches("move-res.>", "move-res"));
        assert!(!subject_matches("move-res.abc", "move-res.abd"));
    }

    #[tokio::test]
    async fn test_fan_out_to_matching_subscribers() {
        let broker = MemoryBroker::new();
        let mut exact = broker.subscribe("move-res.g1").await.unwrap();
        let mut wildcard = broker.subscribe("move-res.*").await.unwrap();
        let mut other = broker.subscribe("move-res.g2").await.unwrap();

        broker.publish("move-res.g1", b"hello".to_vec()).await.unwrap();

        assert_eq!(exact.next_message().await.unwrap().payload, b"hello");
        assert_eq!(wildcard.next().await.unwrap().subject, "move-res.g1");
        assert!(other.receiver.try_recv().is_err(), "g2 must not see g1 traffic");
    }

    #[tokio::test]
    async fn test_dropped_subscription_unsubscribes() {
        let broker = MemoryBroker::new();
        let sub = broker.subscribe("move-res.g1").await.unwrap();
        assert_eq!(broker.subscriber_count(), 1);

        drop(sub);
        assert_eq!(broker.subscriber_count(), 0);

        // Orphaned publish is fine
        broker.publish("move-res.g1", b"late".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_subjects_rejected() {
        let broker = MemoryBroker::new();
        assert!(broker.publish("move-res.*", vec![]).await.is_err());
        assert!(broker.publish("", vec![]).await.is_err());
        assert!(broker.subscribe("a..b").await.is_err());
        assert!(broker.fetch("undeclared", Duration::from_millis(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_queue_is_fifo_and_exclusive() {
        let broker = MemoryBroker::new();
        broker.declare_queue("move-req", Duration::from_secs(30)).await.unwrap();

        broker.publish("move-req", b"first".to_vec()).await.unwrap();
        broker.publish("move-req", b"second".to_vec()).await.unwrap();

        let wait = Duration::from_millis(10);
        let a = broker.fetch("move-req", wait).await.unwrap().unwrap();
        let b = broker.fetch("move-req", wait).await.unwrap().unwrap();
        assert_eq!(a.payload, b"first");
        assert_eq!(b.payload, b"second");
        assert!(broker.fetch("move-req", wait).await.unwrap().is_none());

        assert_eq!(broker.pending("move-req"), 2);
        a.ack().await.unwrap();
        b.ack().await.unwrap();
        assert_eq!(broker.pending("move-req"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacked_message_is_redelivered() {
        let broker = MemoryBroker::new();
        broker.declare_queue("move-req", Duration::from_secs(30)).await.unwrap();
        broker.publish("move-req", b"job".to_vec()).await.unwrap();

        let first = broker
            .fetch("move-req", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.delivery_count, 1);

        // Nothing before the ack wait runs out
        assert!(broker
            .fetch("move-req", Duration::from_secs(29))
            .await
            .unwrap()
            .is_none());

        let again = broker
            .fetch("move-req", Duration::from_secs(5))
            .await
            .unwrap()
            .expect("Message should come back after the ack wait");
        assert_eq!(again.sequence, first.sequence);
        assert_eq!(again.delivery_count, 2);

        again.ack().await.unwrap();
        assert_eq!(broker.pending("move-req"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_ack_keeps_redelivery_in_flight() {
        let broker = MemoryBroker::new();
        broker.declare_queue("move-req", Duration::from_secs(30)).await.unwrap();
        broker.publish("move-req", b"job".to_vec()).await.unwrap();

        let first = broker
            .fetch("move-req", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        let second = broker
            .fetch("move-req", Duration::from_secs(1))
            .await
            .unwrap()
            .expect("Message should be redelivered");
        assert_eq!(second.delivery_count, 2);

        // First consumer wakes up late; the redelivery stays owned by the second
        first.ack().await.unwrap();
        assert_eq!(broker.pending("move-req"), 1);

        // Second consumer dies too, so the message comes round again
        tokio::time::advance(Duration::from_secs(31)).await;
        let third = broker
            .fetch("move-req", Duration::from_secs(1))
            .await
            .unwrap()
            .expect("Stale ack must not retire the redelivery");
        assert_eq!(third.delivery_count, 3);

        third.ack().await.unwrap();
        assert_eq!(broker.pending("move-req"), 0);
    }

    #[tokio::test]
    async fn test_fetch_wakes_on_publish() {
        let broker = MemoryBroker::new();
        broker.declare_queue("move-req", Duration::from_secs(30)).await.unwrap();

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.fetch("move-req", Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        broker.publish("move-req", b"wake".to_vec()).await.unwrap();

        let message = waiter.await.unwrap().unwrap().expect("Fetch should see the publish");
        assert_eq!(message.payload, b"wake");
    }
}
