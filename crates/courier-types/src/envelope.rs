//! # `Envelope` Value Object
//!
//! The structured unit that flows through the pipeline: an opaque message
//! payload plus identity and correlation metadata.
//!
//! ## Invariants
//!
//! - `message_id` is never the nil UUID.
//! - `correlation_id`, when present, is never the nil UUID.
//! - `message` is never null on the wire.
//! - The envelope is immutable once built. Decoders go through the same
//!   validation as senders, so an invalid wire form never becomes an envelope.

use crate::errors::EnvelopeError;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use uuid::Uuid;

/// A message payload wrapped with its identity metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    rename_all = "camelCase",
    try_from = "EnvelopeRecord<M>",
    bound(deserialize = "M: Deserialize<'de>")
)]
pub struct Envelope<M> {
    message_id: Uuid,

    #[serde(skip_serializing_if = "Option::is_none")]
    operation_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    contributor: Option<String>,

    message: M,
}

impl<M> Envelope<M> {
    /// Wrap a message with a freshly generated message id and no metadata.
    pub fn new(message: M) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            operation_id: None,
            correlation_id: None,
            contributor: None,
            message,
        }
    }

    /// Start building an envelope with explicit metadata.
    pub fn builder(message: M) -> EnvelopeBuilder<M> {
        EnvelopeBuilder::new(message)
    }

    #[must_use]
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    #[must_use]
    pub fn operation_id(&self) -> Option<Uuid> {
        self.operation_id
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    #[must_use]
    pub fn contributor(&self) -> Option<&str> {
        self.contributor.as_deref()
    }

    #[must_use]
    pub fn message(&self) -> &M {
        &self.message
    }

    /// Consume the envelope, returning the payload.
    pub fn into_message(self) -> M {
        self.message
    }
}

/// Fluent builder for [`Envelope`].
///
/// Validation happens in [`EnvelopeBuilder::build`]; nothing is checked
/// while setting fields.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder<M> {
    message_id: Option<Uuid>,
    operation_id: Option<Uuid>,
    correlation_id: Option<Uuid>,
    contributor: Option<String>,
    message: M,
}

impl<M> EnvelopeBuilder<M> {
    fn new(message: M) -> Self {
        Self {
            message_id: None,
            operation_id: None,
            correlation_id: None,
            contributor: None,
            message,
        }
    }

    /// Use a specific message id instead of generating one.
    pub fn message_id(mut self, message_id: Uuid) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn operation_id(mut self, operation_id: Uuid) -> Self {
        self.operation_id = Some(operation_id);
        self
    }

    pub fn correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn contributor(mut self, contributor: impl Into<String>) -> Self {
        self.contributor = Some(contributor.into());
        self
    }

    /// Validate the metadata and produce the envelope.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::NilMessageId`] if an explicit nil message id was set.
    /// - [`EnvelopeError::NilCorrelationId`] if a nil correlation id was set.
    pub fn build(self) -> Result<Envelope<M>, EnvelopeError> {
        let message_id = match self.message_id {
            Some(id) if id.is_nil() => return Err(EnvelopeError::NilMessageId),
            Some(id) => id,
            None => Uuid::new_v4(),
        };

        if self.correlation_id.is_some_and(|id| id.is_nil()) {
            return Err(EnvelopeError::NilCorrelationId);
        }

        Ok(Envelope {
            message_id,
            // A nil operation id carries no information.
            operation_id: self.operation_id.filter(|id| !id.is_nil()),
            correlation_id: self.correlation_id,
            contributor: self.contributor,
            message: self.message,
        })
    }
}

/// Unvalidated wire shape; becomes an [`Envelope`] only through `TryFrom`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeRecord<M> {
    message_id: Uuid,
    #[serde(default)]
    operation_id: Option<Uuid>,
    #[serde(default)]
    correlation_id: Option<Uuid>,
    #[serde(default)]
    contributor: Option<String>,
    message: Present<M>,
}

/// A message that must be present: a `null` (or missing) payload is
/// rejected with [`EnvelopeError::NullMessage`] instead of being handed to
/// `M`, which for types like `serde_json::Value` or `Option<T>` would
/// accept it.
struct Present<M>(M);

impl<'de, M> Deserialize<'de> for Present<M>
where
    M: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PresentVisitor<M>(PhantomData<M>);

        impl<'de, M> Visitor<'de> for PresentVisitor<M>
        where
            M: Deserialize<'de>,
        {
            type Value = Present<M>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-null message")
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Err(E::custom(EnvelopeError::NullMessage))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Err(E::custom(EnvelopeError::NullMessage))
            }

            fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
            where
                D: Deserializer<'de>,
            {
                M::deserialize(deserializer).map(Present)
            }
        }

        deserializer.deserialize_option(PresentVisitor(PhantomData))
    }
}

impl<M> TryFrom<EnvelopeRecord<M>> for Envelope<M> {
    type Error = EnvelopeError;

    fn try_from(record: EnvelopeRecord<M>) -> Result<Self, Self::Error> {
        let mut builder = Envelope::builder(record.message.0).message_id(record.message_id);
        if let Some(operation_id) = record.operation_id {
            builder = builder.operation_id(operation_id);
        }
        if let Some(correlation_id) = record.correlation_id {
            builder = builder.correlation_id(correlation_id);
        }
        if let Some(contributor) = record.contributor {
            builder = builder.contributor(contributor);
        }
        builder.build()
    }
}
