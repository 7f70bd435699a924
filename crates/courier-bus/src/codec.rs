//! # JSON Envelope Codec
//!
//! Wire form of an envelope:
//!
//! ```text
//! {
//!   "messageId":     "<uuid>",
//!   "operationId":   "<uuid>",     (optional)
//!   "correlationId": "<uuid>",     (optional)
//!   "contributor":   "<string>",   (optional)
//!   "message":       <M as JSON>
//! }
//! ```
//!
//! Decoding enforces the same invariants as [`Envelope::builder`]: a nil
//! `messageId` or `correlationId` is rejected, and so is a `null` message.

use crate::memory::Delivery;
use crate::processor::EnvelopeDecoder;
use async_trait::async_trait;
use courier_types::{BoxError, Envelope};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors from encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode envelope: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Stateless JSON codec for [`Envelope`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEnvelopeCodec;

impl JsonEnvelopeCodec {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// # Errors
    ///
    /// [`CodecError::Encode`] if the message cannot be serialized.
    pub fn encode<M: Serialize>(&self, envelope: &Envelope<M>) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(envelope).map_err(CodecError::Encode)
    }

    /// # Errors
    ///
    /// [`CodecError::Decode`] on malformed JSON, a missing field, or a nil
    /// identifier.
    pub fn decode_bytes<M: DeserializeOwned>(&self, bytes: &[u8]) -> Result<Envelope<M>, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}

#[async_trait]
impl<M> EnvelopeDecoder<Delivery, M> for JsonEnvelopeCodec
where
    M: DeserializeOwned + Send + Sync + 'static,
{
    async fn decode(&self, source: &Delivery) -> Result<Envelope<M>, BoxError> {
        Ok(self.decode_bytes(&source.body)?)
    }

    fn body<'a>(&self, source: &'a Delivery) -> Option<&'a [u8]> {
        Some(&source.body)
    }
}
