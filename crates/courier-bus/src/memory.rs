//! # In-Memory Transport
//!
//! A single-process transport for wiring and testing pipelines:
//!
//! - [`InMemoryMessageBus`] encodes envelopes and queues them as
//!   [`Delivery`] values on a bounded channel.
//! - [`MessagePump`] drains the channel through a [`MessageProcessor`].
//! - [`InMemoryCheckpointStore`] records which deliveries were acknowledged.
//!
//! A delivery whose processing propagated a failure is left unacknowledged;
//! redelivering it is up to the caller.
//!
//! Batches are all-or-nothing: every channel slot is reserved before the
//! first delivery is queued, so a failed or cancelled batch queues nothing.

use crate::bus::{BusError, MessageBus};
use crate::codec::JsonEnvelopeCodec;
use crate::processor::{Acknowledger, EnvelopeDecoder, MessageProcessor};
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use courier_types::{BoxError, Cancelled, Envelope};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Opaque transport payload: an encoded envelope and its position in the
/// channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub sequence: u64,
    pub body: Vec<u8>,
}

/// In-memory [`MessageBus`] backed by a bounded `tokio::sync::mpsc` channel.
///
/// Sequence numbers start at 1 and follow channel order.
pub struct InMemoryMessageBus<M> {
    sender: mpsc::Sender<Delivery>,
    codec: JsonEnvelopeCodec,
    /// Last sequence handed out. Held while enqueueing so numbering matches
    /// channel order.
    last_sequence: Mutex<u64>,
    /// Serializes slot reservation so two partially reserved batches cannot
    /// wait on each other.
    reserving: tokio::sync::Mutex<()>,
    envelopes_sent: AtomicU64,
    capacity: usize,
    _message: PhantomData<fn(&M)>,
}

impl<M> InMemoryMessageBus<M>
where
    M: Serialize + Send + Sync + 'static,
{
    /// Create a bus with default capacity, returning the receiving end.
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<Delivery>) {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus buffering up to `capacity` deliveries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let bus = Self {
            sender,
            codec: JsonEnvelopeCodec::new(),
            last_sequence: Mutex::new(0),
            reserving: tokio::sync::Mutex::new(()),
            envelopes_sent: AtomicU64::new(0),
            capacity: capacity.max(1),
            _message: PhantomData,
        };
        (bus, receiver)
    }

    /// Total envelopes accepted by the channel.
    pub fn envelopes_sent(&self) -> u64 {
        self.envelopes_sent.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue `bodies` as consecutive deliveries, returning the last sequence.
    ///
    /// Nothing is sent until a slot is held for every body; on cancellation
    /// or a closed channel the held slots are released unused.
    async fn enqueue(&self, bodies: Vec<Vec<u8>>, token: &CancellationToken) -> Result<u64, BoxError> {
        if bodies.len() > self.capacity {
            return Err(Box::new(BusError::BatchTooLarge {
                size: bodies.len(),
                capacity: self.capacity,
            }));
        }

        let _reserving = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Box::new(Cancelled)),
            guard = self.reserving.lock() => guard,
        };

        let mut permits = Vec::with_capacity(bodies.len());
        while permits.len() < bodies.len() {
            let permit = tokio::select! {
                biased;
                () = token.cancelled() => return Err(Box::new(Cancelled)),
                permit = self.sender.reserve() => permit.map_err(|_| BusError::Closed)?,
            };
            permits.push(permit);
        }

        let count = bodies.len() as u64;
        let sequence = {
            let mut last = self.last_sequence.lock();
            for (permit, body) in permits.into_iter().zip(bodies) {
                *last += 1;
                permit.send(Delivery {
                    sequence: *last,
                    body,
                });
            }
            *last
        };

        self.envelopes_sent.fetch_add(count, Ordering::Relaxed);
        Ok(sequence)
    }
}

#[async_trait]
impl<M> MessageBus<M> for InMemoryMessageBus<M>
where
    M: Serialize + Send + Sync + 'static,
{
    async fn send(&self, envelope: &Envelope<M>, token: &CancellationToken) -> Result<(), BoxError> {
        let body = self.codec.encode(envelope)?;
        let sequence = self.enqueue(vec![body], token).await?;
        debug!(message_id = %envelope.message_id(), sequence, "Envelope sent");
        Ok(())
    }

    async fn send_batch(
        &self,
        envelopes: &[Envelope<M>],
        token: &CancellationToken,
    ) -> Result<(), BoxError> {
        if envelopes.is_empty() {
            return Err(Box::new(BusError::EmptyBatch));
        }

        // Encode everything first so a bad message sends nothing.
        let bodies = envelopes
            .iter()
            .map(|envelope| self.codec.encode(envelope))
            .collect::<Result<Vec<_>, _>>()?;

        let last_sequence = self.enqueue(bodies, token).await?;

        debug!(count = envelopes.len(), last_sequence, "Envelope batch sent");
        Ok(())
    }
}

/// [`Acknowledger`] that remembers acknowledged sequence numbers.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    acknowledged: Mutex<BTreeSet<u64>>,
}

impl InMemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest acknowledged sequence, if any.
    pub fn highest(&self) -> Option<u64> {
        self.acknowledged.lock().last().copied()
    }

    pub fn is_acknowledged(&self, sequence: u64) -> bool {
        self.acknowledged.lock().contains(&sequence)
    }

    /// Acknowledged sequences in ascending order.
    pub fn acknowledged(&self) -> Vec<u64> {
        self.acknowledged.lock().iter().copied().collect()
    }
}

#[async_trait]
impl Acknowledger<Delivery> for InMemoryCheckpointStore {
    async fn acknowledge(&self, source: &Delivery) -> Result<(), BoxError> {
        self.acknowledged.lock().insert(source.sequence);
        debug!(sequence = source.sequence, "Delivery checkpointed");
        Ok(())
    }
}

/// Outcome of a [`MessagePump::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PumpReport {
    /// Deliveries that completed, including suppressed failures.
    pub processed: u64,
    /// Deliveries whose failure propagated; left unacknowledged.
    pub failed: u64,
}

/// Drives deliveries from a channel through a [`MessageProcessor`], one at
/// a time, in channel order.
pub struct MessagePump<M> {
    receiver: mpsc::Receiver<Delivery>,
    processor: Arc<MessageProcessor<Delivery, M>>,
    decoder: Arc<dyn EnvelopeDecoder<Delivery, M>>,
    acknowledger: Arc<dyn Acknowledger<Delivery>>,
}

impl<M> MessagePump<M>
where
    M: Send + Sync + 'static,
{
    pub fn new(
        receiver: mpsc::Receiver<Delivery>,
        processor: Arc<MessageProcessor<Delivery, M>>,
        decoder: Arc<dyn EnvelopeDecoder<Delivery, M>>,
        acknowledger: Arc<dyn Acknowledger<Delivery>>,
    ) -> Self {
        Self {
            receiver,
            processor,
            decoder,
            acknowledger,
        }
    }

    /// Run until every sender is dropped or the token fires.
    ///
    /// A delivery whose failure propagated is logged and left
    /// unacknowledged; the pump does not redeliver it. A delivery
    /// interrupted by cancellation counts as neither processed nor failed.
    pub async fn run(mut self, token: CancellationToken) -> PumpReport {
        let mut report = PumpReport::default();

        loop {
            let delivery = tokio::select! {
                biased;
                () = token.cancelled() => break,
                delivery = self.receiver.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            let outcome = self
                .processor
                .process(&delivery, &*self.decoder, &*self.acknowledger, &token)
                .await;

            match outcome {
                Ok(()) => report.processed += 1,
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        sequence = delivery.sequence,
                        error = %e,
                        "Delivery failed, left unacknowledged"
                    );
                }
            }
        }

        info!(
            processed = report.processed,
            failed = report.failed,
            "Message pump stopped"
        );
        report
    }
}
