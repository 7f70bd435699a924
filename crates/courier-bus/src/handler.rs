//! # Message Handlers
//!
//! The application-facing contract for consuming envelopes, and the
//! fan-out composite that presents several handlers as one.

use async_trait::async_trait;
use courier_types::{AggregateError, BoxError, Envelope};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Trait implemented by application code that consumes envelopes.
///
/// Implementations are shared across concurrent `process` calls and must be
/// safe for concurrent invocation.
#[async_trait]
pub trait MessageHandler<M>: Send + Sync
where
    M: Send + Sync,
{
    /// Whether this handler knows how to handle the envelope's message.
    fn accepts(&self, envelope: &Envelope<M>) -> bool;

    /// Handle the envelope.
    ///
    /// # Errors
    ///
    /// Any failure; it is routed through the pipeline's exception handler.
    async fn handle(&self, envelope: &Envelope<M>, token: &CancellationToken)
        -> Result<(), BoxError>;
}

/// Fans an envelope out to an ordered list of handlers.
///
/// Every inner handler runs even when an earlier one fails. Failures are
/// collected and raised together as one [`AggregateError`], in handler order.
pub struct CompositeMessageHandler<M> {
    handlers: Vec<Arc<dyn MessageHandler<M>>>,
}

impl<M> CompositeMessageHandler<M>
where
    M: Send + Sync + 'static,
{
    #[must_use]
    pub fn new(handlers: Vec<Arc<dyn MessageHandler<M>>>) -> Self {
        Self { handlers }
    }

    /// Append a handler to the end of the fan-out order.
    pub fn push(&mut self, handler: Arc<dyn MessageHandler<M>>) {
        self.handlers.push(handler);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<M> Default for CompositeMessageHandler<M>
where
    M: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl<M> MessageHandler<M> for CompositeMessageHandler<M>
where
    M: Send + Sync + 'static,
{
    fn accepts(&self, envelope: &Envelope<M>) -> bool {
        self.handlers.iter().any(|handler| handler.accepts(envelope))
    }

    async fn handle(
        &self,
        envelope: &Envelope<M>,
        token: &CancellationToken,
    ) -> Result<(), BoxError> {
        let mut errors = Vec::new();

        for (index, handler) in self.handlers.iter().enumerate() {
            if let Err(e) = handler.handle(envelope, token).await {
                debug!(
                    message_id = %envelope.message_id(),
                    handler_index = index,
                    error = %e,
                    "Inner message handler failed"
                );
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Box::new(AggregateError::new(errors)))
        }
    }
}

/// Adapts a synchronous closure into a [`MessageHandler`] that accepts
/// every envelope.
pub struct FnMessageHandler<F> {
    handler: F,
}

impl<F> FnMessageHandler<F> {
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<M, F> MessageHandler<M> for FnMessageHandler<F>
where
    M: Send + Sync + 'static,
    F: Fn(&Envelope<M>) -> Result<(), BoxError> + Send + Sync,
{
    fn accepts(&self, _envelope: &Envelope<M>) -> bool {
        true
    }

    async fn handle(
        &self,
        envelope: &Envelope<M>,
        _token: &CancellationToken,
    ) -> Result<(), BoxError> {
        (self.handler)(envelope)
    }
}
