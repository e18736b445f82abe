//! Request handler seam and registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rpcpipe_protocol::{ErrorObject, RequestId};
use serde_json::Value;
use thiserror::Error;

use crate::notify::NotificationSender;
use crate::router;

/// Executes one application method on a worker thread.
///
/// Handlers may block; the router keeps reading while they run. A panic is
/// caught at the worker boundary and answered with an internal error.
pub trait RequestHandler: Send + Sync {
    /// Produces the result for a single request.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] which is sent to the peer as a JSON-RPC
    /// error response.
    fn handle(&self, params: Option<Value>, context: &RequestContext) -> Result<Value, HandlerError>;
}

impl<F> RequestHandler for F
where
    F: Fn(Option<Value>, &RequestContext) -> Result<Value, HandlerError> + Send + Sync,
{
    fn handle(&self, params: Option<Value>, context: &RequestContext) -> Result<Value, HandlerError> {
        self(params, context)
    }
}

/// Per-request information handed to a [`RequestHandler`].
#[derive(Debug, Clone)]
pub struct RequestContext {
    id: RequestId,
    method: String,
    notifier: NotificationSender,
}

impl RequestContext {
    pub(crate) const fn new(id: RequestId, method: String, notifier: NotificationSender) -> Self {
        Self {
            id,
            method,
            notifier,
        }
    }

    /// Identifier of the request being served.
    #[must_use]
    pub const fn id(&self) -> &RequestId {
        &self.id
    }

    /// Method name of the request being served.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Channel for notifications emitted while the request runs.
    #[must_use]
    pub const fn notifier(&self) -> &NotificationSender {
        &self.notifier
    }
}

/// Failure reported by a [`RequestHandler`].
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The parameters were missing or malformed.
    #[error("invalid params: {message}")]
    InvalidParams {
        /// Description of the problem.
        message: String,
    },
    /// The handler could not complete the request.
    #[error("{message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },
    /// The handler supplied its own error payload.
    #[error(transparent)]
    Rpc(#[from] ErrorObject),
}

impl HandlerError {
    /// Builds an [`HandlerError::InvalidParams`].
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Builds an [`HandlerError::Failed`].
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Converts the failure into the payload sent to the peer.
    #[must_use]
    pub fn into_error_object(self) -> ErrorObject {
        match self {
            Self::InvalidParams { message } => ErrorObject::invalid_params(message),
            Self::Failed { message } => ErrorObject::internal(message),
            Self::Rpc(object) => object,
        }
    }
}

/// Errors raised while building a [`HandlerRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The method is handled by the transport itself.
    #[error("method `{method}` is reserved by the transport")]
    Reserved {
        /// Offending method name.
        method: String,
    },
    /// A handler is already registered under this name.
    #[error("method `{method}` is already registered")]
    Duplicate {
        /// Offending method name.
        method: String,
    },
}

/// Maps application method names to their handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn RequestHandler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("methods", &methods)
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Reserved`] for transport-level methods such as
    /// `initialize` and `ping`, and [`RegistryError::Duplicate`] when the
    /// method already has a handler.
    pub fn register(
        &mut self,
        method: impl Into<String>,
        handler: impl RequestHandler + 'static,
    ) -> Result<(), RegistryError> {
        let name = method.into();
        if router::is_reserved(&name) {
            return Err(RegistryError::Reserved { method: name });
        }
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::Duplicate { method: name });
        }
        self.handlers.insert(name, Arc::new(handler));
        Ok(())
    }

    /// Returns whether `method` has a handler.
    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Looks up the handler for `method`.
    #[must_use]
    pub fn get(&self, method: &str) -> Option<Arc<dyn RequestHandler>> {
        self.handlers.get(method).cloned()
    }

    /// Number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns whether no methods are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
