//! # Message Processor
//!
//! Drives one transport payload through decode → handle → acknowledge.
//!
//! ## Flow
//!
//! ```text
//!   source ──► decode ──► handle ──► acknowledge ──► Ok(())
//!                │          │            │
//!                └──────────┴────────────┘
//!                           │ failure
//!                           ▼
//!                  exception handler ──► Suppressed ──► Ok(())
//!                           │
//!                           └──────────► Propagate  ──► Err(original error)
//! ```
//!
//! ## Guarantees
//!
//! - Exactly one decode call, at most one handle, at most one acknowledge and
//!   at most one exception-handler call per `process` invocation.
//! - Acknowledge runs only after handling succeeded.
//! - The error returned on propagation is the value the failing step raised.
//! - An exception handler's own failure is logged and never changes the
//!   outcome.
//! - Cancellation bypasses exception routing: once the token fires (or a
//!   step fails with [`Cancelled`](courier_types::Cancelled)), `process` returns
//!   [`ProcessError::Cancelled`] without consulting the exception handler
//!   and without acknowledging.

use crate::exception::{Disposition, ExceptionContext, ExceptionHandler, FailureStage};
use crate::handler::MessageHandler;
use crate::metrics::PipelineMetrics;
use async_trait::async_trait;
use courier_types::{is_cancellation, BoxError, Envelope};
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Turns a transport payload into an envelope.
#[async_trait]
pub trait EnvelopeDecoder<T, M>: Send + Sync
where
    T: Send + Sync,
    M: Send + Sync,
{
    /// Decode the payload.
    ///
    /// # Errors
    ///
    /// Any failure; it is reported with no envelope in the exception context.
    async fn decode(&self, source: &T) -> Result<Envelope<M>, BoxError>;

    /// Raw bytes of the payload, exposed to exception handlers.
    fn body<'a>(&self, source: &'a T) -> Option<&'a [u8]> {
        let _ = source;
        None
    }
}

/// Checkpoints a transport payload once it has been handled.
#[async_trait]
pub trait Acknowledger<T>: Send + Sync
where
    T: Send + Sync,
{
    /// # Errors
    ///
    /// Any failure; it is reported with the envelope in the exception context.
    async fn acknowledge(&self, source: &T) -> Result<(), BoxError>;
}

/// Outcome of a `process` call that did not complete normally.
#[derive(Debug)]
pub enum ProcessError {
    /// The cancellation token fired; nothing was acknowledged.
    Cancelled,
    /// A step failed and the exception handler did not absorb it.
    /// Holds the error exactly as the failing step raised it.
    Failed(BoxError),
}

impl ProcessError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Borrow the original error, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Self::Failed(error) => Some(error.as_ref()),
            Self::Cancelled => None,
        }
    }

    /// Take the original error, if any.
    pub fn into_failure(self) -> Option<BoxError> {
        match self {
            Self::Failed(error) => Some(error),
            Self::Cancelled => None,
        }
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("Message processing was cancelled"),
            Self::Failed(error) => fmt::Display::fmt(error, f),
        }
    }
}

impl StdError for ProcessError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Failed(error) => error.source(),
            Self::Cancelled => None,
        }
    }
}

enum StepError {
    Cancelled,
    Failed(BoxError),
}

/// Await `step` unless the token fires first.
///
/// A failure counts as cancellation once the token has fired, or when the
/// error itself is a cancellation (see [`is_cancellation`]).
async fn guard<F, R>(token: &CancellationToken, step: F) -> Result<R, StepError>
where
    F: Future<Output = Result<R, BoxError>>,
{
    let outcome = tokio::select! {
        biased;
        () = token.cancelled() => return Err(StepError::Cancelled),
        outcome = step => outcome,
    };

    outcome.map_err(|error| {
        if token.is_cancelled() || is_cancellation(error.as_ref()) {
            StepError::Cancelled
        } else {
            StepError::Failed(error)
        }
    })
}

/// Processes transport payloads of type `T` carrying messages of type `M`.
///
/// Holds only long-lived collaborators; concurrent `process` calls for
/// distinct payloads are safe.
pub struct MessageProcessor<T, M> {
    handler: Arc<dyn MessageHandler<M>>,
    exception_handler: Arc<dyn ExceptionHandler<T, M>>,
    metrics: Arc<PipelineMetrics>,
}

impl<T, M> MessageProcessor<T, M>
where
    T: Send + Sync + 'static,
    M: Send + Sync + 'static,
{
    pub fn new(
        handler: Arc<dyn MessageHandler<M>>,
        exception_handler: Arc<dyn ExceptionHandler<T, M>>,
    ) -> Self {
        Self::with_metrics(handler, exception_handler, Arc::new(PipelineMetrics::new()))
    }

    /// Record into an existing set of counters.
    pub fn with_metrics(
        handler: Arc<dyn MessageHandler<M>>,
        exception_handler: Arc<dyn ExceptionHandler<T, M>>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            handler,
            exception_handler,
            metrics,
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Process one payload.
    ///
    /// # Errors
    ///
    /// - [`ProcessError::Cancelled`] if the token fired before completion.
    /// - [`ProcessError::Failed`] carrying the original step error when the
    ///   exception handler did not suppress the failure.
    pub async fn process<D, A>(
        &self,
        source: &T,
        decoder: &D,
        acknowledger: &A,
        token: &CancellationToken,
    ) -> Result<(), ProcessError>
    where
        D: EnvelopeDecoder<T, M> + ?Sized,
        A: Acknowledger<T> + ?Sized,
    {
        self.metrics.record_received();

        if token.is_cancelled() {
            return Err(self.cancelled(None));
        }

        let envelope = match guard(token, decoder.decode(source)).await {
            Ok(envelope) => envelope,
            Err(StepError::Cancelled) => return Err(self.cancelled(None)),
            Err(StepError::Failed(error)) => {
                let context =
                    ExceptionContext::decode_failure(source, decoder.body(source), error.as_ref());
                let disposition = self.route(&context).await;
                return self.settle(disposition, FailureStage::Decode, None, error);
            }
        };

        let failure = match guard(token, self.handler.handle(&envelope, token)).await {
            Ok(()) => match guard(token, acknowledger.acknowledge(source)).await {
                Ok(()) => {
                    self.metrics.record_acknowledged();
                    debug!(message_id = %envelope.message_id(), "Message processed");
                    return Ok(());
                }
                Err(e) => (FailureStage::Acknowledge, e),
            },
            Err(e) => (FailureStage::Handle, e),
        };

        let (stage, error) = match failure {
            (_, StepError::Cancelled) => return Err(self.cancelled(Some(&envelope))),
            (stage, StepError::Failed(error)) => (stage, error),
        };

        let context = ExceptionContext::dispatch_failure(
            source,
            decoder.body(source),
            &envelope,
            stage,
            error.as_ref(),
        );
        let disposition = self.route(&context).await;
        self.settle(disposition, stage, Some(&envelope), error)
    }

    /// Process a batch strictly in order, one `process` call per item.
    ///
    /// Stops at the first [`ProcessError::Cancelled`], whether the token
    /// fired or a step failed with a cancellation. Every item after it is
    /// reported as cancelled without being decoded, handled or counted.
    pub async fn process_batch<D, A>(
        &self,
        sources: &[T],
        decoder: &D,
        acknowledger: &A,
        token: &CancellationToken,
    ) -> Vec<Result<(), ProcessError>>
    where
        D: EnvelopeDecoder<T, M> + ?Sized,
        A: Acknowledger<T> + ?Sized,
    {
        let mut results = Vec::with_capacity(sources.len());
        for source in sources {
            let outcome = self.process(source, decoder, acknowledger, token).await;
            let cancelled = matches!(outcome, Err(ProcessError::Cancelled));
            results.push(outcome);
            if cancelled {
                break;
            }
        }

        let skipped = sources.len() - results.len();
        if skipped > 0 {
            debug!(skipped, "Batch cancelled, remaining items skipped");
        }
        results.resize_with(sources.len(), || Err(ProcessError::Cancelled));
        results
    }

    async fn route(&self, context: &ExceptionContext<'_, T, M>) -> Disposition {
        match self.exception_handler.handle(context).await {
            Ok(disposition) => disposition,
            Err(e) => {
                self.metrics.record_exception_handler_failure();
                warn!(
                    stage = %context.stage(),
                    original_error = %context.error(),
                    error = %e,
                    "Exception handler failed"
                );
                Disposition::Propagate
            }
        }
    }

    fn settle(
        &self,
        disposition: Disposition,
        stage: FailureStage,
        envelope: Option<&Envelope<M>>,
        error: BoxError,
    ) -> Result<(), ProcessError> {
        self.metrics.record_failure(stage);
        let message_id = envelope.map(Envelope::message_id);

        if disposition.is_handled() {
            self.metrics.record_suppressed();
            debug!(stage = %stage, message_id = ?message_id, error = %error, "Failure suppressed");
            Ok(())
        } else {
            self.metrics.record_propagated();
            debug!(stage = %stage, message_id = ?message_id, error = %error, "Failure propagated");
            Err(ProcessError::Failed(error))
        }
    }

    fn cancelled(&self, envelope: Option<&Envelope<M>>) -> ProcessError {
        self.metrics.record_cancelled();
        debug!(
            message_id = ?envelope.map(Envelope::message_id),
            "Message processing cancelled"
        );
        ProcessError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{CompositeMessageHandler, FnMessageHandler};
    use courier_types::Cancelled;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("invalid operation")]
    struct InvalidOperation;

    #[derive(Debug, Error)]
    #[error("checkpoint unavailable")]
    struct CheckpointUnavailable;

    /// Payload whose bytes either carry a message or are garbage.
    struct Payload {
        bytes: Vec<u8>,
        message: Option<&'static str>,
    }

    #[derive(Default)]
    struct StubDecoder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EnvelopeDecoder<Payload, String> for StubDecoder {
        async fn decode(&self, source: &Payload) -> Result<Envelope<String>, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match source.message {
                Some(message) => Ok(Envelope::new(message.to_string())),
                None => Err("unparseable envelope".into()),
            }
        }

        fn body<'a>(&self, source: &'a Payload) -> Option<&'a [u8]> {
            Some(&source.bytes)
        }
    }

    #[derive(Default)]
    struct StubAcknowledger {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Acknowledger<Payload> for StubAcknowledger {
        async fn acknowledge(&self, _source: &Payload) -> Result<(), BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Box::new(CheckpointUnavailable))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Clone, Copy)]
    enum HandlerBehavior {
        Succeed,
        Fail,
        Cancel,
    }

    struct StubHandler {
        behavior: HandlerBehavior,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler<String> for StubHandler {
        fn accepts(&self, _envelope: &Envelope<String>) -> bool {
            true
        }

        async fn handle(
            &self,
            _envelope: &Envelope<String>,
            _token: &CancellationToken,
        ) -> Result<(), BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                HandlerBehavior::Succeed => Ok(()),
                HandlerBehavior::Fail => Err(Box::new(InvalidOperation)),
                HandlerBehavior::Cancel => Err(Box::new(Cancelled)),
            }
        }
    }

    /// What the exception handler saw.
    #[derive(Debug, Clone)]
    struct Observed {
        stage: FailureStage,
        message: Option<String>,
        body: Option<Vec<u8>>,
        error: String,
        error_addr: usize,
    }

    struct RecordingExceptionHandler {
        outcome: Result<Disposition, &'static str>,
        observed: Mutex<Vec<Observed>>,
    }

    impl RecordingExceptionHandler {
        fn new(outcome: Result<Disposition, &'static str>) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                observed: Mutex::new(Vec::new()),
            })
        }

        fn observed(&self) -> Vec<Observed> {
            self.observed.lock().clone()
        }
    }

    #[async_trait]
    impl ExceptionHandler<Payload, String> for RecordingExceptionHandler {
        async fn handle(
            &self,
            context: &ExceptionContext<'_, Payload, String>,
        ) -> Result<Disposition, BoxError> {
            self.observed.lock().push(Observed {
                stage: context.stage(),
                message: context.envelope().map(|e| e.message().clone()),
                body: context.body().map(<[u8]>::to_vec),
                error: context.error().to_string(),
                error_addr: error_addr(context.error()),
            });
            self.outcome.map_err(BoxError::from)
        }
    }

    fn error_addr(error: &(dyn StdError + Send + Sync + 'static)) -> usize {
        error as *const (dyn StdError + Send + Sync) as *const () as usize
    }

    struct Fixture {
        handler: Arc<StubHandler>,
        exception_handler: Arc<RecordingExceptionHandler>,
        processor: MessageProcessor<Payload, String>,
        decoder: StubDecoder,
        acknowledger: StubAcknowledger,
    }

    fn fixture(
        behavior: HandlerBehavior,
        outcome: Result<Disposition, &'static str>,
        ack_fails: bool,
    ) -> Fixture {
        let handler = Arc::new(StubHandler {
            behavior,
            calls: AtomicUsize::new(0),
        });
        let exception_handler = RecordingExceptionHandler::new(outcome);
        let processor = MessageProcessor::new(handler.clone(), exception_handler.clone());
        Fixture {
            handler,
            exception_handler,
            processor,
            decoder: StubDecoder::default(),
            acknowledger: StubAcknowledger {
                calls: AtomicUsize::new(0),
                fail: ack_fails,
            },
        }
    }

    fn valid(message: &'static str) -> Payload {
        Payload {
            bytes: message.as_bytes().to_vec(),
            message: Some(message),
        }
    }

    fn garbage() -> Payload {
        Payload {
            bytes: vec![1, 2, 3],
            message: None,
        }
    }

    impl Fixture {
        async fn run(&self, payload: &Payload) -> Result<(), ProcessError> {
            self.processor
                .process(payload, &self.decoder, &self.acknowledger, &CancellationToken::new())
                .await
        }
    }

    #[tokio::test]
    async fn test_success_acknowledges_once_and_skips_exception_handler() {
        let f = fixture(HandlerBehavior::Succeed, Ok(Disposition::Propagate), false);

        f.run(&valid("foo")).await.unwrap();

        assert_eq!(f.decoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.acknowledger.calls.load(Ordering::SeqCst), 1);
        assert!(f.exception_handler.observed().is_empty());

        let snapshot = f.processor.metrics().snapshot();
        assert_eq!(snapshot.received, 1);
        assert_eq!(snapshot.acknowledged, 1);
        assert_eq!(snapshot.failures(), 0);
    }

    #[tokio::test]
    async fn test_decode_failure_reports_body_without_envelope() {
        let f = fixture(HandlerBehavior::Succeed, Ok(Disposition::Propagate), false);

        let err = f.run(&garbage()).await.unwrap_err();

        let observed = f.exception_handler.observed();
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].stage, FailureStage::Decode);
        assert!(observed[0].message.is_none());
        assert_eq!(observed[0].body.as_deref(), Some(&[1u8, 2, 3][..]));
        assert_eq!(observed[0].error, "unparseable envelope");

        assert_eq!(err.to_string(), "unparseable envelope");
        assert_eq!(f.handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.acknowledger.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_failure_propagates_original_error() {
        let f = fixture(HandlerBehavior::Fail, Ok(Disposition::Propagate), false);

        let err = f.run(&valid("foo")).await.unwrap_err();

        let observed = f.exception_handler.observed();
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].stage, FailureStage::Handle);
        assert_eq!(observed[0].message.as_deref(), Some("foo"));
        assert_eq!(observed[0].error, "invalid operation");
        assert_eq!(f.acknowledger.calls.load(Ordering::SeqCst), 0);

        let original = err.into_failure().unwrap();
        assert!(original.downcast_ref::<InvalidOperation>().is_some());
        assert_eq!(error_addr(original.as_ref()), observed[0].error_addr);
    }

    #[tokio::test]
    async fn test_suppressed_failure_returns_ok_without_acknowledging() {
        let f = fixture(HandlerBehavior::Fail, Ok(Disposition::Suppressed), false);

        f.run(&valid("foo")).await.unwrap();

        assert_eq!(f.exception_handler.observed().len(), 1);
        assert_eq!(f.acknowledger.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.processor.metrics().snapshot().suppressed, 1);
    }

    #[tokio::test]
    async fn test_acknowledge_failure_carries_envelope() {
        let f = fixture(HandlerBehavior::Succeed, Ok(Disposition::Propagate), true);

        let err = f.run(&valid("foo")).await.unwrap_err();

        let observed = f.exception_handler.observed();
        assert_eq!(observed[0].stage, FailureStage::Acknowledge);
        assert_eq!(observed[0].message.as_deref(), Some("foo"));
        assert_eq!(f.acknowledger.calls.load(Ordering::SeqCst), 1);
        assert!(err
            .failure()
            .unwrap()
            .downcast_ref::<CheckpointUnavailable>()
            .is_some());
    }

    #[tokio::test]
    async fn test_failing_exception_handler_does_not_change_outcome() {
        let f = fixture(HandlerBehavior::Fail, Err("exception handler broke"), false);

        let err = f.run(&valid("foo")).await.unwrap_err();

        assert_eq!(f.exception_handler.observed().len(), 1);
        assert!(err.failure().unwrap().downcast_ref::<InvalidOperation>().is_some());
        let snapshot = f.processor.metrics().snapshot();
        assert_eq!(snapshot.exception_handler_failures, 1);
        assert_eq!(snapshot.propagated, 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_all_work() {
        let f = fixture(HandlerBehavior::Succeed, Ok(Disposition::Suppressed), false);
        let token = CancellationToken::new();
        token.cancel();

        let err = f
            .processor
            .process(&valid("foo"), &f.decoder, &f.acknowledger, &token)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(f.decoder.calls.load(Ordering::SeqCst), 0);
        assert!(f.exception_handler.observed().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_error_bypasses_exception_handler() {
        let f = fixture(HandlerBehavior::Cancel, Ok(Disposition::Suppressed), false);

        let err = f.run(&valid("foo")).await.unwrap_err();

        assert!(err.is_cancelled());
        assert!(f.exception_handler.observed().is_empty());
        assert_eq!(f.acknowledger.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.processor.metrics().snapshot().cancelled, 1);
    }

    #[tokio::test]
    async fn test_composite_failures_route_as_one_aggregate() {
        let failing: Arc<dyn MessageHandler<String>> = Arc::new(StubHandler {
            behavior: HandlerBehavior::Fail,
            calls: AtomicUsize::new(0),
        });
        let composite = Arc::new(CompositeMessageHandler::new(vec![failing.clone(), failing]));
        let exception_handler = RecordingExceptionHandler::new(Ok(Disposition::Propagate));
        let processor: MessageProcessor<Payload, String> =
            MessageProcessor::new(composite, exception_handler.clone());

        let err = processor
            .process(
                &valid("foo"),
                &StubDecoder::default(),
                &StubAcknowledger::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(exception_handler.observed().len(), 1);
        let aggregate = err
            .into_failure()
            .unwrap()
            .downcast::<courier_types::AggregateError>()
            .unwrap();
        assert_eq!(aggregate.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_sibling_does_not_hide_real_handler_failure() {
        let cancelling: Arc<dyn MessageHandler<String>> = Arc::new(StubHandler {
            behavior: HandlerBehavior::Cancel,
            calls: AtomicUsize::new(0),
        });
        let failing: Arc<dyn MessageHandler<String>> = Arc::new(StubHandler {
            behavior: HandlerBehavior::Fail,
            calls: AtomicUsize::new(0),
        });
        let composite = Arc::new(CompositeMessageHandler::new(vec![cancelling, failing]));
        let exception_handler = RecordingExceptionHandler::new(Ok(Disposition::Propagate));
        let processor: MessageProcessor<Payload, String> =
            MessageProcessor::new(composite, exception_handler.clone());
        let acknowledger = StubAcknowledger::default();

        let err = processor
            .process(
                &valid("foo"),
                &StubDecoder::default(),
                &acknowledger,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(!err.is_cancelled());
        let observed = exception_handler.observed();
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].stage, FailureStage::Handle);
        assert_eq!(acknowledger.calls.load(Ordering::SeqCst), 0);

        let aggregate = err
            .into_failure()
            .unwrap()
            .downcast::<courier_types::AggregateError>()
            .unwrap();
        assert!(aggregate.errors()[1].is::<InvalidOperation>());
    }

    #[tokio::test]
    async fn test_failure_after_token_fired_is_cancellation() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let handler: Arc<dyn MessageHandler<String>> = Arc::new(FnMessageHandler::new(
            move |_: &Envelope<String>| -> Result<(), BoxError> {
                trigger.cancel();
                Err(Box::new(InvalidOperation))
            },
        ));
        let exception_handler = RecordingExceptionHandler::new(Ok(Disposition::Suppressed));
        let processor: MessageProcessor<Payload, String> =
            MessageProcessor::new(handler, exception_handler.clone());

        let err = processor
            .process(
                &valid("foo"),
                &StubDecoder::default(),
                &StubAcknowledger::default(),
                &token,
            )
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(exception_handler.observed().is_empty());
    }

    /// Returns `Cancelled` on its first call only.
    struct CancelsOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler<String> for CancelsOnce {
        fn accepts(&self, _envelope: &Envelope<String>) -> bool {
            true
        }

        async fn handle(
            &self,
            _envelope: &Envelope<String>,
            _token: &CancellationToken,
        ) -> Result<(), BoxError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Box::new(Cancelled))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_batch_stops_at_first_cancellation() {
        let handler = Arc::new(CancelsOnce {
            calls: AtomicUsize::new(0),
        });
        let exception_handler = RecordingExceptionHandler::new(Ok(Disposition::Propagate));
        let processor: MessageProcessor<Payload, String> =
            MessageProcessor::new(handler.clone(), exception_handler.clone());
        let decoder = StubDecoder::default();
        let acknowledger = StubAcknowledger::default();
        let batch = vec![valid("a"), valid("b"), valid("c")];

        let results = processor
            .process_batch(&batch, &decoder, &acknowledger, &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 3);
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(ProcessError::Cancelled))));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(acknowledger.calls.load(Ordering::SeqCst), 0);
        assert!(exception_handler.observed().is_empty());
    }

    #[tokio::test]
    async fn test_batch_processes_in_order() {
        let f = fixture(HandlerBehavior::Succeed, Ok(Disposition::Propagate), false);
        let batch = vec![valid("a"), garbage(), valid("b")];

        let results = f
            .processor
            .process_batch(&batch, &f.decoder, &f.acknowledger, &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        assert_eq!(f.acknowledger.calls.load(Ordering::SeqCst), 2);
    }
}
