//! Message classification and inline handling.
//!
//! Every inbound frame is resolved to a [`MessageCategory`] through a static
//! routing table. Handshake and control traffic is answered on the router
//! thread in input order; dispatchable requests are handed to the worker pool.

use std::sync::Arc;
use std::time::Duration;

use rpcpipe_protocol::handshake::{InitializeParams, InitializeResult, negotiate_version};
use rpcpipe_protocol::{
    DecodeError, ErrorObject, Message, Notification, Request, Response, methods,
};
use rpcpipe_transport::{Inbound, TransportEvents, WriteSerializer};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::handler::HandlerRegistry;
use crate::pool::{DrainSummary, WorkerPool};
use crate::server::ServerIdentity;

/// Tracing target for routing decisions.
pub(crate) const ROUTER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::router");

/// How the router treats a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCategory {
    /// `initialize` and the initialized notification; handled inline.
    Handshake,
    /// `ping`; handled inline in every state.
    Control,
    /// A request for a registered method; executed by the worker pool.
    Dispatchable,
    /// Unknown methods and responses; answered or logged inline.
    Unroutable,
    /// A frame that failed to decode.
    Malformed,
}

const ROUTES: [(&str, MessageCategory); 4] = [
    (methods::INITIALIZE, MessageCategory::Handshake),
    (methods::INITIALIZED, MessageCategory::Handshake),
    (methods::LEGACY_INITIALIZED, MessageCategory::Handshake),
    (methods::PING, MessageCategory::Control),
];

/// Returns whether `method` is handled by the transport itself.
pub(crate) fn is_reserved(method: &str) -> bool {
    ROUTES.iter().any(|(name, _)| *name == method)
}

/// Resolves the category of `inbound`.
#[must_use]
pub fn classify(inbound: &Inbound, registry: &HandlerRegistry) -> MessageCategory {
    let Inbound::Message(message) = inbound else {
        return MessageCategory::Malformed;
    };
    let Some(method) = message.method() else {
        return MessageCategory::Unroutable;
    };
    if let Some((_, category)) = ROUTES.iter().find(|(name, _)| *name == method) {
        return *category;
    }
    if matches!(message, Message::Request(_)) && registry.contains(method) {
        MessageCategory::Dispatchable
    } else {
        MessageCategory::Unroutable
    }
}

/// Server side of the initialisation handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No `initialize` request has been answered yet.
    AwaitingInitialize,
    /// `initialize` was answered; waiting for the initialized notification.
    Initialized,
    /// Application requests are accepted.
    Operational,
}

pub(crate) struct Router {
    registry: Arc<HandlerRegistry>,
    writer: WriteSerializer,
    events: Arc<dyn TransportEvents>,
    pool: WorkerPool,
    identity: Arc<ServerIdentity>,
    state: HandshakeState,
}

impl Router {
    pub(crate) fn new(
        registry: Arc<HandlerRegistry>,
        writer: WriteSerializer,
        events: Arc<dyn TransportEvents>,
        pool: WorkerPool,
        identity: Arc<ServerIdentity>,
    ) -> Self {
        Self {
            registry,
            writer,
            events,
            pool,
            identity,
            state: HandshakeState::AwaitingInitialize,
        }
    }

    /// Handles one decoded frame.
    pub(crate) fn route(&mut self, inbound: Inbound) -> Result<(), ServerError> {
        let category = classify(&inbound, &self.registry);
        match inbound {
            Inbound::Malformed(error) => {
                self.malformed(&error);
                Ok(())
            }
            Inbound::Message(Message::Request(request)) => self.request(category, request),
            Inbound::Message(Message::Notification(notification)) => {
                self.notification(category, &notification);
                Ok(())
            }
            Inbound::Message(Message::Response(response)) => {
                self.response(&response);
                Ok(())
            }
        }
    }

    /// Answers a request that was read but never routed because the server
    /// is stopping. Returns `false` for frames that are not requests.
    pub(crate) fn abandon(&self, inbound: Inbound) -> bool {
        let Inbound::Message(Message::Request(request)) = inbound else {
            return false;
        };
        self.events
            .work_abandoned(&request.id, &request.method, Duration::ZERO);
        self.reply(Response::error(
            Some(request.id),
            ErrorObject::request_abandoned(),
        ));
        true
    }

    /// Drains the worker pool; see [`WorkerPool::shutdown`].
    pub(crate) fn finish(self, grace: Duration) -> DrainSummary {
        self.pool.shutdown(grace)
    }

    fn request(&mut self, category: MessageCategory, request: Request) -> Result<(), ServerError> {
        match category {
            MessageCategory::Handshake => {
                self.handshake_request(request);
                Ok(())
            }
            MessageCategory::Control => {
                self.reply(Response::success(request.id, json!({})));
                Ok(())
            }
            MessageCategory::Dispatchable if self.state == HandshakeState::Operational => {
                self.pool.submit(request)
            }
            MessageCategory::Dispatchable => {
                debug!(
                    target: ROUTER_TARGET,
                    id = %request.id,
                    method = %request.method,
                    state = ?self.state,
                    "request before handshake completed"
                );
                self.reply(Response::error(
                    Some(request.id),
                    ErrorObject::server_not_initialized(),
                ));
                Ok(())
            }
            MessageCategory::Unroutable | MessageCategory::Malformed => {
                let error = ErrorObject::method_not_found(&request.method);
                self.reply(Response::error(Some(request.id), error));
                Ok(())
            }
        }
    }

    fn handshake_request(&mut self, request: Request) {
        if request.method != methods::INITIALIZE {
            let error = ErrorObject::invalid_request(format!(
                "`{}` must be sent as a notification",
                request.method
            ));
            self.reply(Response::error(Some(request.id), error));
            return;
        }
        if self.state != HandshakeState::AwaitingInitialize {
            let error = ErrorObject::invalid_request("session is already initialized");
            self.reply(Response::error(Some(request.id), error));
            return;
        }

        let raw_params = request.params.unwrap_or(Value::Null);
        let outcome = serde_json::from_value::<InitializeParams>(raw_params)
            .map_err(|error| {
                ErrorObject::invalid_params(format!("invalid initialize params: {error}"))
            })
            .and_then(|parsed| self.initialize_result(&parsed));
        if outcome.is_ok() {
            self.state = HandshakeState::Initialized;
        }
        self.reply(Response {
            id: Some(request.id),
            outcome,
        });
    }

    fn initialize_result(&self, params: &InitializeParams) -> Result<Value, ErrorObject> {
        let version = negotiate_version(&params.protocol_version);
        info!(
            target: ROUTER_TARGET,
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            requested = %params.protocol_version,
            negotiated = version,
            "initialize received"
        );
        let result = InitializeResult {
            protocol_version: version.to_owned(),
            capabilities: self.identity.capabilities.clone(),
            server_info: self.identity.server_info.clone(),
            instructions: self.identity.instructions.clone(),
        };
        serde_json::to_value(result).map_err(|error| ErrorObject::internal(error.to_string()))
    }

    fn notification(&mut self, category: MessageCategory, notification: &Notification) {
        match (category, notification.method.as_str()) {
            (MessageCategory::Handshake, methods::INITIALIZED | methods::LEGACY_INITIALIZED) => {
                self.initialized();
            }
            _ => {
                debug!(
                    target: ROUTER_TARGET,
                    method = %notification.method,
                    "ignoring notification"
                );
            }
        }
    }

    fn initialized(&mut self) {
        match self.state {
            HandshakeState::Initialized => {
                self.state = HandshakeState::Operational;
                info!(target: ROUTER_TARGET, "session operational");
            }
            HandshakeState::AwaitingInitialize => {
                warn!(
                    target: ROUTER_TARGET,
                    "initialized notification before initialize; ignoring"
                );
            }
            HandshakeState::Operational => {
                debug!(target: ROUTER_TARGET, "duplicate initialized notification");
            }
        }
    }

    fn response(&self, response: &Response) {
        match (&response.id, &response.outcome) {
            (Some(id), _) => self.events.unknown_response(id),
            (None, Err(error)) => self.events.uncorrelated_error(error),
            (None, Ok(_)) => debug!(target: ROUTER_TARGET, "ignoring response without id"),
        }
    }

    fn malformed(&self, error: &DecodeError) {
        self.events.decode_error(error);
        if let Some(reply) = error.to_response() {
            self.reply(reply);
        }
    }

    fn reply(&self, response: Response) {
        let id = response.id.clone();
        if let Err(error) = self.writer.send(&Message::Response(response)) {
            warn!(
                target: ROUTER_TARGET,
                id = ?id,
                error = %error,
                "failed to write inline response"
            );
        }
    }
}
