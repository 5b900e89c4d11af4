//! Broker seam.
//!
//! The transport itself (connection, partition assignment, offsets) is an
//! external collaborator. The ingress only relies on:
//! 1. per-partition FIFO delivery ([`PartitionConsumer::recv`]),
//! 2. at-least-once semantics (messages are committed after dispatch),
//! 3. a [`Producer`] for re-publishing derived events.
//!
//! [`MemoryBroker`] is an in-process implementation with keyed partitioning.
//! The CLI pipes line-delimited envelopes into it, and tests drive it directly.

use crate::error::BrokerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// A message as delivered by the transport.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Sequential consumer of one topic partition.
#[async_trait]
pub trait PartitionConsumer: Send {
    fn topic(&self) -> &str;

    fn partition(&self) -> u32;

    /// Next message, or `None` once the partition is closed.
    async fn recv(&mut self) -> Option<BrokerMessage>;

    /// Mark everything up to and including `offset` as consumed.
    async fn commit(&mut self, offset: u64) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Claim every partition of the given topics.
    async fn subscribe(
        &self,
        topics: &[String],
    ) -> Result<Vec<Box<dyn PartitionConsumer>>, BrokerError>;
}

#[async_trait]
pub trait Producer: Send + Sync {
    async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError>;
}

// ============================================================================
// In-process broker
// ============================================================================

type ReceiverSlot = Arc<Mutex<Option<mpsc::UnboundedReceiver<BrokerMessage>>>>;

struct PartitionState {
    sender: Mutex<Option<mpsc::UnboundedSender<BrokerMessage>>>,
    /// Empty while a consumer holds the partition.
    receiver: ReceiverSlot,
    next_offset: AtomicU64,
    committed: Arc<AtomicU64>,
}

impl PartitionState {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: Arc::new(Mutex::new(Some(rx))),
            next_offset: AtomicU64::new(0),
            committed: Arc::new(AtomicU64::new(0)),
        }
    }

    fn pending(&self) -> u64 {
        self.next_offset
            .load(Ordering::Acquire)
            .saturating_sub(self.committed.load(Ordering::Acquire))
    }
}

/// In-memory partitioned broker with commit tracking.
pub struct MemoryBroker {
    topics: BTreeMap<String, Vec<PartitionState>>,
    closed: AtomicBool,
    round_robin: AtomicU64,
    progress: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new<I, S>(topics: I, partitions: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let partitions = partitions.max(1);
        let topics = topics
            .into_iter()
            .map(|topic| {
                let states = (0..partitions).map(|_| PartitionState::new()).collect();
                (topic.into(), states)
            })
            .collect();
        Self {
            topics,
            closed: AtomicBool::new(false),
            round_robin: AtomicU64::new(0),
            progress: Arc::new(Notify::new()),
        }
    }

    pub fn partitions(&self, topic: &str) -> Option<u32> {
        self.topics.get(topic).map(|p| p.len() as u32)
    }

    /// Partition a key is routed to.
    pub fn partition_for(&self, topic: &str, key: &str) -> Option<u32> {
        let count = self.topics.get(topic)?.len() as u64;
        let hash = key
            .bytes()
            .fold(0_u64, |acc, b| acc.wrapping_mul(131).wrapping_add(b as u64));
        Some((hash % count) as u32)
    }

    /// Next offset to be committed on a partition.
    pub fn committed(&self, topic: &str, partition: u32) -> Option<u64> {
        let state = self.topics.get(topic)?.get(partition as usize)?;
        Some(state.committed.load(Ordering::Acquire))
    }

    /// Produced but not yet committed messages, across all topics.
    pub fn pending(&self) -> u64 {
        self.topics
            .values()
            .flat_map(|partitions| partitions.iter())
            .map(PartitionState::pending)
            .sum()
    }

    /// Resolve once every produced message has been committed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting messages. Consumers drain what was queued and then end.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for state in self.topics.values().flat_map(|p| p.iter()) {
            state.sender.lock().take();
        }
        self.progress.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Producer for MemoryBroker {
    async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let partitions = self
            .topics
            .get(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
        let partition = match key {
            Some(key) => self.partition_for(topic, key).unwrap_or(0),
            None => (self.round_robin.fetch_add(1, Ordering::Relaxed) % partitions.len() as u64)
                as u32,
        };
        let state = &partitions[partition as usize];

        // Offset allocation and enqueue happen under the same lock to keep
        // offsets in channel order.
        let sender = state.sender.lock();
        let sender = sender.as_ref().ok_or(BrokerError::Closed)?;
        let offset = state.next_offset.fetch_add(1, Ordering::AcqRel);
        let message = BrokerMessage {
            topic: topic.to_string(),
            partition,
            offset,
            key: key.map(str::to_string),
            payload,
        };
        if sender.send(message).is_err() {
            state.next_offset.fetch_sub(1, Ordering::AcqRel);
            return Err(BrokerError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn subscribe(
        &self,
        topics: &[String],
    ) -> Result<Vec<Box<dyn PartitionConsumer>>, BrokerError> {
        let mut claimed: Vec<Box<dyn PartitionConsumer>> = Vec::new();
        for topic in topics {
            let partitions = self
                .topics
                .get(topic)
                .ok_or_else(|| BrokerError::UnknownTopic(topic.clone()))?;
            if partitions.iter().any(|state| state.receiver.lock().is_none()) {
                return Err(BrokerError::AlreadySubscribed(topic.clone()));
            }
            for (index, state) in partitions.iter().enumerate() {
                let Some(receiver) = state.receiver.lock().take() else {
                    return Err(BrokerError::AlreadySubscribed(topic.clone()));
                };
                claimed.push(Box::new(MemoryConsumer {
                    topic: topic.clone(),
                    partition: index as u32,
                    receiver: Some(receiver),
                    slot: state.receiver.clone(),
                    committed: state.committed.clone(),
                    progress: self.progress.clone(),
                }));
            }
        }
        Ok(claimed)
    }
}

/// Holds a partition until dropped, then hands it back to the broker.
struct MemoryConsumer {
    topic: String,
    partition: u32,
    receiver: Option<mpsc::UnboundedReceiver<BrokerMessage>>,
    slot: ReceiverSlot,
    committed: Arc<AtomicU64>,
    progress: Arc<Notify>,
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            *self.slot.lock() = Some(receiver);
        }
    }
}

#[async_trait]
impl PartitionConsumer for MemoryConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> u32 {
        self.partition
    }

    async fn recv(&mut self) -> Option<BrokerMessage> {
        self.receiver.as_mut()?.recv().await
    }

    async fn commit(&mut self, offset: u64) -> Result<(), BrokerError> {
        self.committed.fetch_max(offset + 1, Ordering::AcqRel);
        self.progress.notify_waiters();
        Ok(())
    }
}
