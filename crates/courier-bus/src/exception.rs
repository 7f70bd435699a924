//! # Exception Routing
//!
//! When a stage of the pipeline fails, the processor builds an
//! [`ExceptionContext`] describing the attempt and hands it to an
//! [`ExceptionHandler`]. The handler answers with a [`Disposition`]:
//! `Suppressed` means the failure is absorbed and the caller sees success,
//! `Propagate` means the original error is returned to the caller.
//!
//! ## Context Shape
//!
//! ```text
//! stage        envelope   meaning
//! ──────────── ────────── ───────────────────────────────────────
//! Decode       None       payload never became an envelope
//! Handle       Some       an application handler failed
//! Acknowledge  Some       handling succeeded, checkpoint failed
//! ```

use async_trait::async_trait;
use courier_types::{BoxError, Envelope};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// Pipeline stage at which a processing attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureStage {
    /// The transport payload could not be decoded into an envelope.
    Decode,
    /// An application handler failed.
    Handle,
    /// Acknowledging the transport payload failed.
    Acknowledge,
}

impl FailureStage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::Handle => "handle",
            Self::Acknowledge => "acknowledge",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision returned by an exception handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Disposition {
    /// The failure is absorbed; the processing call returns normally.
    Suppressed,
    /// The original error is returned to the caller.
    #[default]
    Propagate,
}

impl Disposition {
    /// Whether the failure counts as handled.
    #[must_use]
    pub fn is_handled(self) -> bool {
        matches!(self, Self::Suppressed)
    }

    /// Merge two decisions; any suppression wins.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        if self.is_handled() || other.is_handled() {
            Self::Suppressed
        } else {
            Self::Propagate
        }
    }
}

/// Description of one failed processing attempt.
///
/// Borrowed from the processing call's stack and valid only for the duration
/// of the exception handler invocation.
pub struct ExceptionContext<'a, T, M> {
    source: &'a T,
    body: Option<&'a [u8]>,
    envelope: Option<&'a Envelope<M>>,
    error: &'a (dyn StdError + Send + Sync + 'static),
    stage: FailureStage,
}

impl<'a, T, M> ExceptionContext<'a, T, M> {
    /// Context for a payload that never became an envelope.
    pub fn decode_failure(
        source: &'a T,
        body: Option<&'a [u8]>,
        error: &'a (dyn StdError + Send + Sync + 'static),
    ) -> Self {
        Self {
            source,
            body,
            envelope: None,
            error,
            stage: FailureStage::Decode,
        }
    }

    /// Context for a failure after the envelope was decoded.
    ///
    /// `stage` must be [`FailureStage::Handle`] or
    /// [`FailureStage::Acknowledge`]; a decode stage is coerced to `Handle`
    /// since an envelope exists.
    pub fn dispatch_failure(
        source: &'a T,
        body: Option<&'a [u8]>,
        envelope: &'a Envelope<M>,
        stage: FailureStage,
        error: &'a (dyn StdError + Send + Sync + 'static),
    ) -> Self {
        let stage = match stage {
            FailureStage::Decode => FailureStage::Handle,
            other => other,
        };
        Self {
            source,
            body,
            envelope: Some(envelope),
            error,
            stage,
        }
    }

    /// The original transport payload.
    #[must_use]
    pub fn source(&self) -> &'a T {
        self.source
    }

    /// Raw bytes of the payload, if the decoder exposed them.
    #[must_use]
    pub fn body(&self) -> Option<&'a [u8]> {
        self.body
    }

    /// The decoded envelope; `None` exactly when decoding failed.
    #[must_use]
    pub fn envelope(&self) -> Option<&'a Envelope<M>> {
        self.envelope
    }

    /// The error that triggered this context.
    #[must_use]
    pub fn error(&self) -> &'a (dyn StdError + Send + Sync + 'static) {
        self.error
    }

    #[must_use]
    pub fn stage(&self) -> FailureStage {
        self.stage
    }
}

impl<T, M> fmt::Debug for ExceptionContext<'_, T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionContext")
            .field("stage", &self.stage)
            .field("message_id", &self.envelope.map(Envelope::message_id))
            .field("body_len", &self.body.map(<[u8]>::len))
            .field("error", &self.error.to_string())
            .finish()
    }
}

/// Trait for handlers that decide the fate of a failed processing attempt.
#[async_trait]
pub trait ExceptionHandler<T, M>: Send + Sync
where
    T: Send + Sync,
    M: Send + Sync,
{
    /// Inspect the failure and decide whether it is absorbed.
    ///
    /// # Errors
    ///
    /// A failing exception handler never changes the outcome of the
    /// processing call; the processor logs the error and propagates the
    /// original failure.
    async fn handle(&self, context: &ExceptionContext<'_, T, M>) -> Result<Disposition, BoxError>;
}

/// Exception handler that never absorbs anything.
///
/// Pass this explicitly when no failure routing is wanted.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropagatingExceptionHandler;

#[async_trait]
impl<T, M> ExceptionHandler<T, M> for PropagatingExceptionHandler
where
    T: Send + Sync + 'static,
    M: Send + Sync + 'static,
{
    async fn handle(&self, _context: &ExceptionContext<'_, T, M>) -> Result<Disposition, BoxError> {
        Ok(Disposition::Propagate)
    }
}

/// Logs every failure, then returns a fixed disposition.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingExceptionHandler {
    disposition: Disposition,
}

impl TracingExceptionHandler {
    #[must_use]
    pub fn new(disposition: Disposition) -> Self {
        Self { disposition }
    }

    /// Log and absorb.
    #[must_use]
    pub fn suppressing() -> Self {
        Self::new(Disposition::Suppressed)
    }

    #[must_use]
    pub fn disposition(&self) -> Disposition {
        self.disposition
    }
}

#[async_trait]
impl<T, M> ExceptionHandler<T, M> for TracingExceptionHandler
where
    T: Send + Sync + 'static,
    M: Send + Sync + 'static,
{
    async fn handle(&self, context: &ExceptionContext<'_, T, M>) -> Result<Disposition, BoxError> {
        warn!(
            stage = %context.stage(),
            message_id = ?context.envelope().map(Envelope::message_id),
            correlation_id = ?context.envelope().and_then(Envelope::correlation_id),
            body_len = ?context.body().map(<[u8]>::len),
            error = %context.error(),
            suppressed = self.disposition.is_handled(),
            "Message processing failed"
        );
        Ok(self.disposition)
    }
}

/// Fans a failure out to an ordered list of exception handlers.
///
/// Each inner handler runs in order; an inner handler's own failure is
/// logged at trace level and skipped. The failure counts as suppressed if
/// any inner handler suppressed it. This call never fails.
pub struct CompositeExceptionHandler<T, M> {
    handlers: Vec<Arc<dyn ExceptionHandler<T, M>>>,
}

impl<T, M> CompositeExceptionHandler<T, M>
where
    T: Send + Sync + 'static,
    M: Send + Sync + 'static,
{
    #[must_use]
    pub fn new(handlers: Vec<Arc<dyn ExceptionHandler<T, M>>>) -> Self {
        Self { handlers }
    }

    pub fn push(&mut self, handler: Arc<dyn ExceptionHandler<T, M>>) {
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

#[async_trait]
impl<T, M> ExceptionHandler<T, M> for CompositeExceptionHandler<T, M>
where
    T: Send + Sync + 'static,
    M: Send + Sync + 'static,
{
    async fn handle(&self, context: &ExceptionContext<'_, T, M>) -> Result<Disposition, BoxError> {
        let mut disposition = Disposition::Propagate;

        for (index, handler) in self.handlers.iter().enumerate() {
            match handler.handle(context).await {
                Ok(decision) => disposition = disposition.or(decision),
                Err(e) => trace!(
                    handler_index = index,
                    stage = %context.stage(),
                    error = %e,
                    "Inner exception handler failed"
                ),
            }
        }

        Ok(disposition)
    }
}
