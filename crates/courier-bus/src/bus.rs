//! # Message Bus
//!
//! The outbound side of the pipeline: sending envelopes, and routing send
//! failures through the same suppress-or-propagate protocol the inbound
//! processor uses.

use crate::exception::{Disposition, PropagatingExceptionHandler, TracingExceptionHandler};
use async_trait::async_trait;
use courier_types::{is_cancellation, BoxError, Envelope};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Errors raised by bus implementations in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// A batch send was requested with no envelopes.
    #[error("Envelope batch must not be empty")]
    EmptyBatch,

    /// The receiving side of the transport is gone.
    #[error("Message bus closed")]
    Closed,

    /// A batch can never fit in the transport's buffer at once.
    #[error("Batch of {size} envelopes exceeds channel capacity {capacity}")]
    BatchTooLarge { size: usize, capacity: usize },
}

/// Trait for sending envelopes to a transport.
#[async_trait]
pub trait MessageBus<M>: Send + Sync
where
    M: Send + Sync,
{
    /// Send a single envelope.
    async fn send(&self, envelope: &Envelope<M>, token: &CancellationToken) -> Result<(), BoxError>;

    /// Send an ordered batch of envelopes.
    async fn send_batch(
        &self,
        envelopes: &[Envelope<M>],
        token: &CancellationToken,
    ) -> Result<(), BoxError>;
}

/// Description of one failed send.
///
/// Always covers the full batch, even for a single-envelope send.
pub struct MessageBusExceptionContext<'a, M> {
    envelopes: &'a [Envelope<M>],
    error: &'a (dyn StdError + Send + Sync + 'static),
}

impl<'a, M> MessageBusExceptionContext<'a, M> {
    /// # Errors
    ///
    /// [`BusError::EmptyBatch`] if `envelopes` is empty.
    pub fn new(
        envelopes: &'a [Envelope<M>],
        error: &'a (dyn StdError + Send + Sync + 'static),
    ) -> Result<Self, BusError> {
        if envelopes.is_empty() {
            return Err(BusError::EmptyBatch);
        }
        Ok(Self { envelopes, error })
    }

    #[must_use]
    pub fn envelopes(&self) -> &'a [Envelope<M>] {
        self.envelopes
    }

    #[must_use]
    pub fn error(&self) -> &'a (dyn StdError + Send + Sync + 'static) {
        self.error
    }
}

impl<M> fmt::Debug for MessageBusExceptionContext<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBusExceptionContext")
            .field("envelopes", &self.envelopes.len())
            .field("error", &self.error.to_string())
            .finish()
    }
}

/// Trait for handlers that decide the fate of a failed send.
#[async_trait]
pub trait MessageBusExceptionHandler<M>: Send + Sync
where
    M: Send + Sync,
{
    async fn handle(
        &self,
        context: &MessageBusExceptionContext<'_, M>,
    ) -> Result<Disposition, BoxError>;
}

#[async_trait]
impl<M> MessageBusExceptionHandler<M> for PropagatingExceptionHandler
where
    M: Send + Sync + 'static,
{
    async fn handle(
        &self,
        _context: &MessageBusExceptionContext<'_, M>,
    ) -> Result<Disposition, BoxError> {
        Ok(Disposition::Propagate)
    }
}

#[async_trait]
impl<M> MessageBusExceptionHandler<M> for TracingExceptionHandler
where
    M: Send + Sync + 'static,
{
    async fn handle(
        &self,
        context: &MessageBusExceptionContext<'_, M>,
    ) -> Result<Disposition, BoxError> {
        let disposition = self.disposition();
        warn!(
            envelopes = context.envelopes().len(),
            first_message_id = ?context.envelopes().first().map(Envelope::message_id),
            error = %context.error(),
            suppressed = disposition.is_handled(),
            "Message send failed"
        );
        Ok(disposition)
    }
}

/// Fans a send failure out to an ordered list of bus exception handlers.
///
/// Same isolation rules as the inbound composite: inner failures are logged
/// and skipped, any suppression wins, and the call itself never fails.
pub struct CompositeMessageBusExceptionHandler<M> {
    handlers: Vec<Arc<dyn MessageBusExceptionHandler<M>>>,
}

impl<M> CompositeMessageBusExceptionHandler<M>
where
    M: Send + Sync + 'static,
{
    #[must_use]
    pub fn new(handlers: Vec<Arc<dyn MessageBusExceptionHandler<M>>>) -> Self {
        Self { handlers }
    }
}

#[async_trait]
impl<M> MessageBusExceptionHandler<M> for CompositeMessageBusExceptionHandler<M>
where
    M: Send + Sync + 'static,
{
    async fn handle(
        &self,
        context: &MessageBusExceptionContext<'_, M>,
    ) -> Result<Disposition, BoxError> {
        let mut disposition = Disposition::Propagate;
        for (index, handler) in self.handlers.iter().enumerate() {
            match handler.handle(context).await {
                Ok(decision) => disposition = disposition.or(decision),
                Err(e) => trace!(handler_index = index, error = %e, "Inner bus exception handler failed"),
            }
        }
        Ok(disposition)
    }
}

/// Routes send failures of an inner bus through an exception handler.
///
/// The original error is returned unless the handler suppresses it.
/// Cancellation is returned as-is without consulting the handler.
pub struct ExceptionHandlingMessageBus<M> {
    bus: Arc<dyn MessageBus<M>>,
    exception_handler: Arc<dyn MessageBusExceptionHandler<M>>,
}

impl<M> ExceptionHandlingMessageBus<M>
where
    M: Send + Sync + 'static,
{
    pub fn new(
        bus: Arc<dyn MessageBus<M>>,
        exception_handler: Arc<dyn MessageBusExceptionHandler<M>>,
    ) -> Self {
        Self {
            bus,
            exception_handler,
        }
    }

    async fn recover(&self, envelopes: &[Envelope<M>], error: BoxError) -> Result<(), BoxError> {
        if is_cancellation(error.as_ref()) {
            return Err(error);
        }

        let context = MessageBusExceptionContext::new(envelopes, error.as_ref())?;
        let disposition = match self.exception_handler.handle(&context).await {
            Ok(disposition) => disposition,
            Err(e) => {
                warn!(
                    original_error = %context.error(),
                    error = %e,
                    "Bus exception handler failed"
                );
                Disposition::Propagate
            }
        };

        if disposition.is_handled() {
            debug!(envelopes = envelopes.len(), error = %error, "Send failure suppressed");
            Ok(())
        } else {
            Err(error)
        }
    }
}

#[async_trait]
impl<M> MessageBus<M> for ExceptionHandlingMessageBus<M>
where
    M: Send + Sync + 'static,
{
    async fn send(&self, envelope: &Envelope<M>, token: &CancellationToken) -> Result<(), BoxError> {
        match self.bus.send(envelope, token).await {
            Ok(()) => Ok(()),
            Err(error) => self.recover(std::slice::from_ref(envelope), error).await,
        }
    }

    async fn send_batch(
        &self,
        envelopes: &[Envelope<M>],
        token: &CancellationToken,
    ) -> Result<(), BoxError> {
        if envelopes.is_empty() {
            return Err(Box::new(BusError::EmptyBatch));
        }

        match self.bus.send_batch(envelopes, token).await {
            Ok(()) => Ok(()),
            Err(error) => self.recover(envelopes, error).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::Cancelled;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Error)]
    #[error("broker unavailable")]
    struct BrokerUnavailable;

    struct FailingBus {
        cancel: bool,
        calls: AtomicUsize,
    }

    impl FailingBus {
        fn new(cancel: bool) -> Arc<Self> {
            Arc::new(Self {
                cancel,
                calls: AtomicUsize::new(0),
            })
        }

        fn fail(&self) -> BoxError {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.cancel {
                Box::new(Cancelled)
            } else {
                Box::new(BrokerUnavailable)
            }
        }
    }

    #[async_trait]
    impl MessageBus<String> for FailingBus {
        async fn send(&self, _: &Envelope<String>, _: &CancellationToken) -> Result<(), BoxError> {
            Err(self.fail())
        }

        async fn send_batch(
            &self,
            _: &[Envelope<String>],
            _: &CancellationToken,
        ) -> Result<(), BoxError> {
            Err(self.fail())
        }
    }

    struct Recording {
        outcome: Result<Disposition, &'static str>,
        batches: Mutex<Vec<Vec<String>>>,
    }

    impl Recording {
        fn new(outcome: Result<Disposition, &'static str>) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                batches: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MessageBusExceptionHandler<String> for Recording {
        async fn handle(
            &self,
            context: &MessageBusExceptionContext<'_, String>,
        ) -> Result<Disposition, BoxError> {
            self.batches.lock().push(
                context
                    .envelopes()
                    .iter()
                    .map(|e| e.message().clone())
                    .collect(),
            );
            self.outcome.map_err(BoxError::from)
        }
    }

    fn envelopes(messages: &[&str]) -> Vec<Envelope<String>> {
        messages.iter().map(|m| Envelope::new(m.to_string())).collect()
    }

    #[tokio::test]
    async fn test_single_send_is_routed_as_one_element_batch() {
        let handler = Recording::new(Ok(Disposition::Propagate));
        let bus: ExceptionHandlingMessageBus<String> =
            ExceptionHandlingMessageBus::new(FailingBus::new(false), handler.clone());

        let envelope = Envelope::new("foo".to_string());
        let err = bus.send(&envelope, &CancellationToken::new()).await.unwrap_err();

        assert!(err.downcast_ref::<BrokerUnavailable>().is_some());
        assert_eq!(*handler.batches.lock(), vec![vec!["foo".to_string()]]);
    }

    #[tokio::test]
    async fn test_batch_failure_suppressed() {
        let handler = Recording::new(Ok(Disposition::Suppressed));
        let bus: ExceptionHandlingMessageBus<String> =
            ExceptionHandlingMessageBus::new(FailingBus::new(false), handler.clone());

        bus.send_batch(&envelopes(&["a", "b"]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            *handler.batches.lock(),
            vec![vec!["a".to_string(), "b".to_string()]]
        );
    }

    #[tokio::test]
    async fn test_empty_batch_rejected_before_work() {
        let inner = FailingBus::new(false);
        let handler = Recording::new(Ok(Disposition::Suppressed));
        let bus: ExceptionHandlingMessageBus<String> =
            ExceptionHandlingMessageBus::new(inner.clone(), handler.clone());

        let err = bus.send_batch(&[], &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.downcast_ref::<BusError>(), Some(&BusError::EmptyBatch));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
        assert!(handler.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failing_handler_keeps_original_error() {
        let handler = Recording::new(Err("handler broke"));
        let bus: ExceptionHandlingMessageBus<String> =
            ExceptionHandlingMessageBus::new(FailingBus::new(false), handler);

        let err = bus
            .send(&Envelope::new("foo".to_string()), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.downcast_ref::<BrokerUnavailable>().is_some());
    }

    #[tokio::test]
    async fn test_cancellation_skips_handler() {
        let handler = Recording::new(Ok(Disposition::Suppressed));
        let bus: ExceptionHandlingMessageBus<String> =
            ExceptionHandlingMessageBus::new(FailingBus::new(true), handler.clone());

        let err = bus
            .send(&Envelope::new("foo".to_string()), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.downcast_ref::<Cancelled>().is_some());
        assert!(handler.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_composite_bus_handler_any_suppression_wins() {
        let composite = CompositeMessageBusExceptionHandler::new(vec![
            Recording::new(Err("boom")) as Arc<dyn MessageBusExceptionHandler<String>>,
            Recording::new(Ok(Disposition::Suppressed)),
            Arc::new(PropagatingExceptionHandler),
        ]);

        let batch = envelopes(&["a"]);
        let error: BoxError = Box::new(BrokerUnavailable);
        let context = MessageBusExceptionContext::new(&batch, error.as_ref()).unwrap();

        assert_eq!(composite.handle(&context).await.unwrap(), Disposition::Suppressed);
    }

    #[test]
    fn test_context_rejects_empty_batch() {
        let error: BoxError = Box::new(BrokerUnavailable);
        let result = MessageBusExceptionContext::<String>::new(&[], error.as_ref());
        assert_eq!(result.unwrap_err(), BusError::EmptyBatch);
    }
}
