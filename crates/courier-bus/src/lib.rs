//! # Courier Bus - Message Processing Pipeline
//!
//! Takes raw transport payloads, decodes them into [`Envelope`]s, dispatches
//! them to application handlers, checkpoints them on success, and routes
//! every failure through a pluggable exception handler that decides whether
//! the failure is suppressed or propagated.
//!
//! ## Pipeline
//!
//! ```text
//!  ┌───────────┐ send()  ┌──────────────┐ Delivery ┌─────────────┐
//!  │ Producer  │ ──────► │ MessageBus   │ ───────► │ MessagePump │
//!  └───────────┘         └──────────────┘          └──────┬──────┘
//!                                                         │ process()
//!                                                         ▼
//!                         ┌───────────────────────────────────────────┐
//!                         │ MessageProcessor                          │
//!                         │   decode ─► handle ─► acknowledge         │
//!                         │      └────────┴──────────┴──► exception   │
//!                         │                               handler     │
//!                         └───────────────────────────────────────────┘
//! ```
//!
//! ## Failure Semantics
//!
//! - **Suppressed:** the exception handler absorbed the failure; `process`
//!   returns `Ok(())` and the payload is not acknowledged.
//! - **Propagate:** the original error is returned unchanged.
//! - **Cancelled:** never routed to the exception handler.
//!
//! [`Envelope`]: courier_types::Envelope

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod bus;
pub mod codec;
pub mod exception;
pub mod handler;
pub mod memory;
pub mod metrics;
pub mod processor;
pub mod retry;
pub mod routing;
pub mod transient;

// Re-export main types
pub use bus::{
    BusError, CompositeMessageBusExceptionHandler, ExceptionHandlingMessageBus, MessageBus,
    MessageBusExceptionContext, MessageBusExceptionHandler,
};
pub use codec::{CodecError, JsonEnvelopeCodec};
pub use exception::{
    CompositeExceptionHandler, Disposition, ExceptionContext, ExceptionHandler, FailureStage,
    PropagatingExceptionHandler, TracingExceptionHandler,
};
pub use handler::{CompositeMessageHandler, FnMessageHandler, MessageHandler};
pub use memory::{Delivery, InMemoryCheckpointStore, InMemoryMessageBus, MessagePump, PumpReport};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use processor::{Acknowledger, EnvelopeDecoder, MessageProcessor, ProcessError};
pub use retry::{
    AnyTransient, FnTransientFaultDetector, RetryInterval, RetryPolicy, TransientFaultDetector,
};
pub use routing::{MessageKind, RouteError, RoutingMessageHandler, RoutingMessageHandlerBuilder};
pub use transient::{TransientFaultHandlingMessageBus, TransientFaultHandlingMessageHandler};

pub use courier_types::{AggregateError, BoxError, Cancelled, Envelope, EnvelopeError};

/// Maximum deliveries buffered by the in-memory transport before senders
/// wait.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
