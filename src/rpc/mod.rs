//! Abstraction over the signaling hub transport.

use std::{rc::Rc, time::Duration};

use async_trait::async_trait;
use derive_more::Display;
use futures::{future, stream::LocalBoxStream, StreamExt as _};
use huddle_client_api_proto::{
    Command, Event, ServerSessionDescription, SessionDescription,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracerr::Traced;

use crate::conf;

/// Errors of the signaling hub communication.
#[derive(Clone, Debug, Display)]
pub enum SignalingError {
    /// Host transport failed to deliver a request or its response.
    #[display(fmt = "signaling transport failed: {}", _0)]
    Transport(String),

    /// No response has been received within the configured request timeout.
    #[display(fmt = "`{}` request timed out", _0)]
    Timeout(&'static str),

    /// Arguments of a [`Command`] could not be encoded.
    #[display(fmt = "failed to encode `{}` arguments: {}", _0, _1)]
    Encode(&'static str, String),

    /// Response to a request could not be decoded.
    #[display(fmt = "malformed `{}` response: {}", _0, _1)]
    MalformedResponse(&'static str, String),
}

/// Duplex signaling channel to the hub, provided by the host.
///
/// Requests are named hub methods with positional JSON arguments, and events
/// are named pushes with a JSON payload.
#[cfg_attr(any(test, feature = "mockable"), mockall::automock)]
#[async_trait(?Send)]
pub trait SignalingPort {
    /// Invokes the hub `method` with the given `args` and resolves with its
    /// response (`null` if the method returns nothing).
    ///
    /// # Errors
    ///
    /// With [`SignalingError::Transport`] if the request cannot be delivered
    /// or fails remotely.
    async fn invoke(
        &self,
        method: &'static str,
        args: Vec<Value>,
    ) -> Result<Value, Traced<SignalingError>>;

    /// Returns [`Stream`] of all the `(name, payload)` pushes received from
    /// the hub.
    ///
    /// [`Stream`]: futures::Stream
    fn on_event(&self) -> LocalBoxStream<'static, (String, Value)>;
}

/// Typed client of the signaling hub over some [`SignalingPort`].
#[derive(Clone)]
pub struct SignalingClient {
    /// Underlying host transport.
    port: Rc<dyn SignalingPort>,

    /// Maximum time a single request may take.
    request_timeout: Duration,
}

impl SignalingClient {
    /// Creates a new [`SignalingClient`] over the given `port`.
    #[inline]
    #[must_use]
    pub fn new(port: Rc<dyn SignalingPort>, conf: &conf::Rpc) -> Self {
        Self {
            port,
            request_timeout: conf.request_timeout,
        }
    }

    /// Sends the given [`Command`] and resolves with the raw response.
    ///
    /// # Errors
    ///
    /// - With [`SignalingError::Encode`] if [`Command`] cannot be encoded.
    /// - With [`SignalingError::Timeout`] if no response arrives in time.
    /// - With any error of the underlying [`SignalingPort::invoke`].
    pub async fn send(
        &self,
        command: Command,
    ) -> Result<Value, Traced<SignalingError>> {
        let method = command.method();
        let args = command
            .arguments()
            .map_err(|e| SignalingError::Encode(method, e.to_string()))
            .map_err(tracerr::wrap!())?;

        log::debug!("Invoking `{}`", method);
        tokio::time::timeout(
            self.request_timeout,
            self.port.invoke(method, args),
        )
        .await
        .map_err(|_| tracerr::new!(SignalingError::Timeout(method)))?
        .map_err(tracerr::wrap!())
    }

    /// Requests the `Server`-authored SDP offer of the joined `Room`.
    ///
    /// # Errors
    ///
    /// If the request fails or its response is not a session description.
    pub async fn get_server_offer(
        &self,
    ) -> Result<ServerSessionDescription, Traced<SignalingError>> {
        let response = self.send(Command::GetServerOffer).await?;
        decode_response("GetServerOffer", response)
    }

    /// Sends SDP offer of a renegotiation round and resolves with the
    /// `Server`'s answer, if it replied with one.
    ///
    /// # Errors
    ///
    /// If the request fails or its response is malformed.
    pub async fn renegotiate(
        &self,
        offer: SessionDescription,
    ) -> Result<Option<SessionDescription>, Traced<SignalingError>> {
        let response = self.send(Command::Renegotiate(offer)).await?;
        if response.is_null() {
            return Ok(None);
        }
        decode_response("Renegotiate", response).map(Some)
    }

    /// Returns [`Stream`] of all the [`Event`]s pushed by the hub.
    ///
    /// Undecodable pushes are logged and skipped.
    ///
    /// [`Stream`]: futures::Stream
    pub fn subscribe(&self) -> LocalBoxStream<'static, Event> {
        Box::pin(self.port.on_event().filter_map(|(name, payload)| {
            future::ready(match Event::parse(&name, payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    log::error!("Skipping hub event: {}", e);
                    None
                }
            })
        }))
    }
}

/// Decodes `response` of the hub `method`, unwrapping one level of
/// JSON-in-string encoding.
fn decode_response<T: DeserializeOwned>(
    method: &'static str,
    response: Value,
) -> Result<T, Traced<SignalingError>> {
    match response {
        Value::String(encoded) => serde_json::from_str(&encoded),
        response => serde_json::from_value(response),
    }
    .map_err(|e| tracerr::new!(SignalingError::MalformedResponse(
        method,
        e.to_string(),
    )))
}
