//! Auth tokens and endpoint descriptions.
//!
//! The machine never performs HTTP itself: [`crate::effects::Effects`] is
//! handed an [`AuthRequest`] and the host calls back with the raw token (or
//! an error). This module decodes the token's JWT payload (the signature is
//! the server's concern) and knows how to build the socket URL.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::Value;

use crate::error::AuthError;

/// How the host should obtain a token for this room.
///
/// A caller-supplied token source is expressed by implementing
/// [`crate::effects::Effects::authenticate`] directly, so it needs no variant
/// here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEndpoint {
    /// POST `{room, publicApiKey}` to `url`, expect `{"token": "..."}`.
    Public { url: String, public_api_key: String },
    /// POST `{room}` to `url`, expect `{"token": "..."}`.
    Private { url: String },
}

/// Everything the host needs to run one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub room: String,
    pub endpoint: AuthEndpoint,
    /// A previously issued token that has not expired yet; the host may
    /// reuse it instead of hitting the endpoint again.
    pub cached_token: Option<String>,
}

/// A decoded auth token.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthToken {
    pub raw: String,
    /// Server-assigned connection id; prefix of all ids minted here.
    pub actor: u32,
    pub user_id: Option<String>,
    pub user_info: Option<Value>,
    /// Absolute expiry, unix seconds.
    pub expires_at: u64,
}

impl AuthToken {
    /// Decode the payload segment of a JWT-shaped token.
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        let mut segments = raw.split('.');
        let payload = match (segments.next(), segments.next()) {
            (Some(_), Some(payload)) => payload,
            _ => return Err(AuthError::MalformedToken("not a JWT".into())),
        };
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| AuthError::MalformedToken(format!("payload is not base64: {e}")))?;
        let claims: Value = serde_json::from_slice(&bytes)
            .map_err(|e| AuthError::MalformedToken(format!("payload is not JSON: {e}")))?;

        let actor = claims
            .get("actor")
            .and_then(Value::as_u64)
            .and_then(|a| u32::try_from(a).ok())
            .ok_or_else(|| AuthError::MalformedToken("missing actor claim".into()))?;
        let expires_at = claims
            .get("exp")
            .and_then(Value::as_u64)
            .ok_or_else(|| AuthError::MalformedToken("missing exp claim".into()))?;

        Ok(Self {
            raw: raw.to_owned(),
            actor,
            user_id: claims
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_owned),
            user_info: claims.get("info").filter(|v| !v.is_null()).cloned(),
            expires_at,
        })
    }

    pub fn is_expired(&self, now_secs: u64) -> bool {
        now_secs >= self.expires_at
    }
}

/// The JSON body the host POSTs to the configured auth endpoint.
pub fn auth_request_body(request: &AuthRequest) -> Value {
    match &request.endpoint {
        AuthEndpoint::Public { public_api_key, .. } => serde_json::json!({
            "room": request.room,
            "publicApiKey": public_api_key,
        }),
        AuthEndpoint::Private { .. } => serde_json::json!({ "room": request.room }),
    }
}

/// Extract the token from an auth endpoint response body.
///
/// Anything but a JSON object with a string `token` field is a malformed
/// response.
pub fn parse_auth_response(body: &str) -> Result<String, AuthError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| AuthError::MalformedResponse(format!("not JSON: {e}")))?;
    value
        .get("token")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| AuthError::MalformedResponse("missing string `token` field".into()))
}

/// The websocket URL for a token: `{server}/?token={token}&version={v}`.
pub fn socket_url(server: &str, token: &str) -> String {
    let server = server.trim_end_matches('/');
    format!(
        "{server}/?token={token}&version={}",
        env!("CARGO_PKG_VERSION")
    )
}
