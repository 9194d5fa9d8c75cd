//! Wire messages shared by the duplex and polling transports
//!
//! Only what reconnection needs is modelled: the auth payload, the
//! backend's acknowledgement or rejection, keep-alives, and an opaque
//! `event` frame that is passed through to the application untouched.

use crate::error::ConnectError;
use crate::identity::ConnectionIdentity;
use serde::{Deserialize, Serialize};
use url::Url;

/// Messages sent by the display
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage<'a> {
    /// First frame on every new session
    Auth(&'a ConnectionIdentity),
    /// Reply to a backend keep-alive
    Pong,
}

/// Messages sent by the backend
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication accepted; the session is live
    AuthAck,
    /// Authentication rejected
    AuthError {
        #[serde(default)]
        reason: String,
    },
    /// Application event (order updates etc.)
    Event {
        name: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Backend keep-alive
    Ping,
}

/// Backend event handed to the application
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundMessage {
    pub name: String,
    pub payload: serde_json::Value,
}

/// Successful polling handshake
#[derive(Debug, Clone, Deserialize)]
pub struct PollSession {
    pub sid: String,
}

/// Body of a rejected polling handshake
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollRejection {
    #[serde(default)]
    pub reason: String,
}

/// Encode a client message as a text frame
pub fn encode(message: &ClientMessage<'_>) -> Result<String, ConnectError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode one text frame from the backend
pub fn decode(text: &str) -> Result<ServerMessage, ConnectError> {
    Ok(serde_json::from_str(text)?)
}

/// Parse and check a duplex endpoint (`ws://` or `wss://`)
pub fn parse_endpoint(endpoint: &str) -> Result<Url, ConnectError> {
    let url = Url::parse(endpoint).map_err(|e| ConnectError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConnectError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: format!("unsupported scheme '{}', expected ws or wss", other),
        }),
    }
}

/// Base URL of the long-polling fallback for a duplex endpoint.
///
/// `ws://host/display` becomes `http://host/display/poll`, `wss` becomes `https`.
pub fn polling_base(endpoint: &Url) -> Result<Url, ConnectError> {
    let mut base = endpoint.clone();
    let scheme = if endpoint.scheme() == "wss" { "https" } else { "http" };
    base.set_scheme(scheme)
        .map_err(|_| ConnectError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: format!("cannot derive {} polling URL", scheme),
        })?;

    let path = format!("{}/poll", endpoint.path().trim_end_matches('/'));
    base.set_path(&path);
    base.set_query(None);
    Ok(base)
}
