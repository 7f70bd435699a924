//! # Message Routing
//!
//! Dispatches an envelope to the handler registered for its message kind.
//! The table is built once, up front, through [`RoutingMessageHandlerBuilder`];
//! nothing is discovered at runtime.
//!
//! ## Example
//!
//! ```ignore
//! let router = RoutingMessageHandler::builder()
//!     .route("order.placed", Arc::new(OrderPlacedHandler::new(store)))?
//!     .route("order.cancelled", Arc::new(OrderCancelledHandler::new(store)))?
//!     .build();
//! ```

use crate::handler::MessageHandler;
use async_trait::async_trait;
use courier_types::{BoxError, Envelope};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Discriminator used to pick a route for a message.
pub trait MessageKind {
    fn kind(&self) -> &str;
}

impl MessageKind for serde_json::Value {
    /// The `"type"` field of a JSON object, or `""`.
    fn kind(&self) -> &str {
        self.get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
    }
}

/// Errors from building a routing table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// Each kind routes to exactly one handler.
    #[error("Route already registered for message kind '{0}'")]
    DuplicateRoute(String),
}

/// Dispatches by [`MessageKind`] to registered handlers.
///
/// `accepts` is true when a route exists for the message kind. Envelopes
/// whose kind has no route are ignored by `handle`.
pub struct RoutingMessageHandler<M> {
    routes: HashMap<String, Arc<dyn MessageHandler<M>>>,
}

impl<M> RoutingMessageHandler<M>
where
    M: MessageKind + Send + Sync + 'static,
{
    #[must_use]
    pub fn builder() -> RoutingMessageHandlerBuilder<M> {
        RoutingMessageHandlerBuilder {
            routes: HashMap::new(),
        }
    }

    /// Registered kinds, in no particular order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    fn route_for(&self, envelope: &Envelope<M>) -> Option<&Arc<dyn MessageHandler<M>>> {
        self.routes.get(envelope.message().kind())
    }
}

#[async_trait]
impl<M> MessageHandler<M> for RoutingMessageHandler<M>
where
    M: MessageKind + Send + Sync + 'static,
{
    fn accepts(&self, envelope: &Envelope<M>) -> bool {
        self.route_for(envelope).is_some()
    }

    async fn handle(
        &self,
        envelope: &Envelope<M>,
        token: &CancellationToken,
    ) -> Result<(), BoxError> {
        match self.route_for(envelope) {
            Some(handler) => handler.handle(envelope, token).await,
            None => {
                debug!(
                    message_id = %envelope.message_id(),
                    kind = envelope.message().kind(),
                    "No route for message kind"
                );
                Ok(())
            }
        }
    }
}

/// Builder for [`RoutingMessageHandler`].
pub struct RoutingMessageHandlerBuilder<M> {
    routes: HashMap<String, Arc<dyn MessageHandler<M>>>,
}

impl<M> RoutingMessageHandlerBuilder<M>
where
    M: MessageKind + Send + Sync + 'static,
{
    /// Register `handler` for messages of `kind`.
    ///
    /// # Errors
    ///
    /// [`RouteError::DuplicateRoute`] if `kind` already has a handler.
    pub fn route(
        mut self,
        kind: impl Into<String>,
        handler: Arc<dyn MessageHandler<M>>,
    ) -> Result<Self, RouteError> {
        let kind = kind.into();
        if self.routes.contains_key(&kind) {
            return Err(RouteError::DuplicateRoute(kind));
        }
        self.routes.insert(kind, handler);
        Ok(self)
    }

    #[must_use]
    pub fn build(self) -> RoutingMessageHandler<M> {
        RoutingMessageHandler {
            routes: self.routes,
        }
    }
}
