//! # Courier Types
//!
//! The value types every stage of the message pipeline agrees on.
//!
//! ## Design Principles
//!
//! - **Immutable Envelopes**: An [`Envelope`] is built once, validated at
//!   construction, and never mutated afterwards.
//! - **Original Errors Survive**: Collaborator failures travel as [`BoxError`]
//!   so the pipeline can hand the exact failing value back to its caller.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod envelope;
pub mod errors;

pub use envelope::{Envelope, EnvelopeBuilder};
pub use errors::*;
