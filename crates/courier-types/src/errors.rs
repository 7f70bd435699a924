//! # Error Types
//!
//! Error vocabulary shared by the pipeline crates.

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// A failure raised by a pipeline collaborator (decoder, handler,
/// acknowledger, bus). Boxed so the original value can be handed back
/// to the caller untouched.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Envelope invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// Message id must identify the message.
    #[error("Envelope message id must not be the nil UUID")]
    NilMessageId,

    /// A present correlation id must be meaningful.
    #[error("Envelope correlation id must not be the nil UUID")]
    NilCorrelationId,

    /// The wire form carried `null` where the message belongs.
    #[error("Envelope message must not be null")]
    NullMessage,
}

/// Raised when a step observes its cancellation token firing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("Operation was cancelled")]
pub struct Cancelled;

/// Returns true if `error` is, or is caused by, a [`Cancelled`] signal.
///
/// An [`AggregateError`] in the chain counts only when every error it
/// collected is itself a cancellation; one real failure among cancelled
/// siblings keeps the aggregate a real failure.
#[must_use]
pub fn is_cancellation(error: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if err.is::<Cancelled>() {
            return true;
        }
        if let Some(aggregate) = err.downcast_ref::<AggregateError>() {
            return !aggregate.is_empty()
                && aggregate
                    .errors()
                    .iter()
                    .all(|inner| is_cancellation(inner.as_ref()));
        }
        current = err.source();
    }
    false
}

/// Every failure collected from a fan-out, in the order the inner
/// delegates ran.
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<BoxError>,
}

impl AggregateError {
    #[must_use]
    pub fn new(errors: Vec<BoxError>) -> Self {
        Self { errors }
    }

    #[must_use]
    pub fn errors(&self) -> &[BoxError] {
        &self.errors
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<BoxError> {
        self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} handler(s) failed", self.errors.len())?;
        for (index, error) in self.errors.iter().enumerate() {
            write!(f, "; [{index}] {error}")?;
        }
        Ok(())
    }
}

impl StdError for AggregateError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.errors
            .first()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}
