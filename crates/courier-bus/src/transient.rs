//! Decorators that run handler and bus calls under a [`RetryPolicy`].
//!
//! They add no behavior of their own: every call is handed to
//! [`RetryPolicy::run`], which owns the retry count, interval and transient
//! fault classification.

use crate::bus::MessageBus;
use crate::handler::MessageHandler;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use courier_types::{BoxError, Envelope};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Retries an inner [`MessageHandler`] on transient failures.
pub struct TransientFaultHandlingMessageHandler<M> {
    retry_policy: RetryPolicy,
    handler: Arc<dyn MessageHandler<M>>,
}

impl<M> TransientFaultHandlingMessageHandler<M>
where
    M: Send + Sync + 'static,
{
    pub fn new(retry_policy: RetryPolicy, handler: Arc<dyn MessageHandler<M>>) -> Self {
        Self {
            retry_policy,
            handler,
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

#[async_trait]
impl<M> MessageHandler<M> for TransientFaultHandlingMessageHandler<M>
where
    M: Send + Sync + 'static,
{
    fn accepts(&self, envelope: &Envelope<M>) -> bool {
        self.handler.accepts(envelope)
    }

    async fn handle(
        &self,
        envelope: &Envelope<M>,
        token: &CancellationToken,
    ) -> Result<(), BoxError> {
        self.retry_policy
            .run(|| self.handler.handle(envelope, token), token)
            .await
    }
}

/// Retries an inner [`MessageBus`] on transient failures.
pub struct TransientFaultHandlingMessageBus<M> {
    retry_policy: RetryPolicy,
    bus: Arc<dyn MessageBus<M>>,
}

impl<M> TransientFaultHandlingMessageBus<M>
where
    M: Send + Sync + 'static,
{
    pub fn new(retry_policy: RetryPolicy, bus: Arc<dyn MessageBus<M>>) -> Self {
        Self { retry_policy, bus }
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

#[async_trait]
impl<M> MessageBus<M> for TransientFaultHandlingMessageBus<M>
where
    M: Send + Sync + 'static,
{
    async fn send(&self, envelope: &Envelope<M>, token: &CancellationToken) -> Result<(), BoxError> {
        self.retry_policy
            .run(|| self.bus.send(envelope, token), token)
            .await
    }

    async fn send_batch(
        &self,
        envelopes: &[Envelope<M>],
        token: &CancellationToken,
    ) -> Result<(), BoxError> {
        self.retry_policy
            .run(|| self.bus.send_batch(envelopes, token), token)
            .await
    }
}
