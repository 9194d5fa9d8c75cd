//! ConnectionIdentity: who this display is, as presented to the backend

use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable identity tuple supplied by the caller at connect time.
///
/// `auth_token` may be absent (anonymous / pending-auth connect). A rotated
/// token produces a new identity via [`ConnectionIdentity::with_token`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionIdentity {
    pub store_id: String,
    pub device_id: String,
    pub display_id: String,
    pub organization_id: String,
    #[serde(rename = "token", default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl ConnectionIdentity {
    /// Create an identity without an auth token
    pub fn new(
        store_id: impl Into<String>,
        device_id: impl Into<String>,
        display_id: impl Into<String>,
        organization_id: impl Into<String>,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            device_id: device_id.into(),
            display_id: display_id.into(),
            organization_id: organization_id.into(),
            auth_token: None,
        }
    }

    /// Copy of this identity carrying `token`
    pub fn with_token(&self, token: Option<String>) -> Self {
        Self {
            auth_token: token,
            ..self.clone()
        }
    }

    /// Whether a token is present
    pub fn is_authenticated(&self) -> bool {
        self.auth_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Device-identifying header pairs sent on every handshake
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-Store-Id", self.store_id.clone()),
            ("X-Device-Id", self.device_id.clone()),
            ("X-Display-Id", self.display_id.clone()),
            ("X-Organization-Id", self.organization_id.clone()),
            (
                "User-Agent",
                format!("kiosklink/{}", env!("CARGO_PKG_VERSION")),
            ),
        ]
    }
}

// Tokens never reach the logs.
impl fmt::Debug for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionIdentity")
            .field("store_id", &self.store_id)
            .field("device_id", &self.device_id)
            .field("display_id", &self.display_id)
            .field("organization_id", &self.organization_id)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}
