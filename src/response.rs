use serde::{Deserialize, Serialize};

/// Raw query parameters of a request hitting the local `/callback` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub(crate) struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub error_uri: Option<String>,
}

/// What the authorization server told us through the redirect back to `/callback`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CallbackResponse {
    SuccessfulLogin { code: String },
    Error(ErrorResponse),
    /// Neither `code` nor `error` was present.
    Malformed,
}

impl CallbackParams {
    pub(crate) fn response(&self) -> CallbackResponse {
        if let Some(error) = &self.error {
            return CallbackResponse::Error(ErrorResponse {
                error: OidcErrorCode::parse(error),
                error_description: self.error_description.clone(),
                error_uri: self.error_uri.clone(),
            });
        }
        match &self.code {
            Some(code) if !code.is_empty() => CallbackResponse::SuccessfulLogin { code: code.clone() },
            _ => CallbackResponse::Malformed,
        }
    }
}

/// An enumeration representing the response to token requests, including
/// success and error responses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub(crate) enum TokenResponse {
    Success(SuccessTokenResponse),
    Error(ErrorResponse),
}

/// A structure representing a successful token response.
///
/// `refresh_token` and `id_token` are optional on the wire. Refresh responses may omit the
/// refresh token, and a missing ID token is reported by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub(crate) struct SuccessTokenResponse {
    pub access_token: String,
    pub expires_in: Option<i64>,
    pub refresh_expires_in: Option<i64>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub id_token: Option<String>,
    pub scope: Option<String>,
}

/// See [RFC 6749 Section 4.1.2.1](https://datatracker.ietf.org/doc/html/rfc6749#section-4.1.2.1)
/// and [RFC 6749 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6749#section-5.2) for details.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum KnownOidcErrorCode {
    /// The request is missing a required parameter, includes an unsupported parameter value
    /// (other than grant type), repeats a parameter, includes multiple credentials,
    /// utilizes more than one mechanism for authenticating the client, or is otherwise malformed.
    #[serde(rename = "invalid_request")]
    InvalidRequest,

    /// Client authentication failed (e.g., unknown client, no client authentication included,
    /// or unsupported authentication method).
    #[serde(rename = "invalid_client")]
    InvalidClient,

    /// The provided authorization grant (e.g., authorization code, resource owner credentials) or
    /// refresh token is invalid, expired, revoked, does not match the redirection URI used in the
    /// authorization request, or was issued to another client.
    #[serde(rename = "invalid_grant")]
    InvalidGrant,

    /// The authenticated client is not authorized to use this authorization grant type.
    #[serde(rename = "unauthorized_client")]
    UnauthorizedClient,

    /// The authorization grant type is not supported by the authorization server.
    #[serde(rename = "unsupported_grant_type")]
    UnsupportedGrantType,

    /// The requested scope is invalid, unknown, malformed, or exceeds the scope granted by the
    /// resource owner.
    #[serde(rename = "invalid_scope")]
    InvalidScope,

    /// The resource owner or authorization server denied the request.
    #[serde(rename = "access_denied")]
    AccessDenied,

    /// The authorization server does not support obtaining an authorization code using this
    /// method.
    #[serde(rename = "unsupported_response_type")]
    UnsupportedResponseType,

    /// The authorization server encountered an unexpected condition that prevented it from
    /// fulfilling the request.
    #[serde(rename = "server_error")]
    ServerError,

    /// The authorization server is currently unable to handle the request due to a temporary
    /// overloading or maintenance of the server.
    #[serde(rename = "temporarily_unavailable")]
    TemporarilyUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OidcErrorCode {
    Known(KnownOidcErrorCode),
    Unknown(String),
}

impl OidcErrorCode {
    /// Interprets a raw `error` value, as found in a redirect query.
    pub(crate) fn parse(raw: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(raw.to_owned()))
            .unwrap_or_else(|_| OidcErrorCode::Unknown(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            OidcErrorCode::Known(known) => match known {
                KnownOidcErrorCode::InvalidRequest => "invalid_request",
                KnownOidcErrorCode::InvalidClient => "invalid_client",
                KnownOidcErrorCode::InvalidGrant => "invalid_grant",
                KnownOidcErrorCode::UnauthorizedClient => "unauthorized_client",
                KnownOidcErrorCode::UnsupportedGrantType => "unsupported_grant_type",
                KnownOidcErrorCode::InvalidScope => "invalid_scope",
                KnownOidcErrorCode::AccessDenied => "access_denied",
                KnownOidcErrorCode::UnsupportedResponseType => "unsupported_response_type",
                KnownOidcErrorCode::ServerError => "server_error",
                KnownOidcErrorCode::TemporarilyUnavailable => "temporarily_unavailable",
            },
            OidcErrorCode::Unknown(code) => code.as_str(),
        }
    }
}

/// OAuth/OIDC error response received from the authorization server.
///
/// Returned either from the token endpoint (JSON body) or through the redirect back to the local
/// callback endpoint (query parameters).
///
/// See [RFC 6749 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6749#section-5.2) for details.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorResponse {
    /// The error code (e.g., `invalid_client` or `invalid_grant`).
    pub error: OidcErrorCode,

    /// OPTIONAL. Human-readable ASCII text providing additional information.
    pub error_description: Option<String>,

    /// OPTIONAL. A URI identifying a human-readable web page with information about the error.
    pub error_uri: Option<String>,
}

impl ErrorResponse {
    /// Any `invalid_grant` error means the grant (code or refresh token) is no longer usable.
    pub fn is_invalid_grant(&self) -> bool {
        self.error == OidcErrorCode::Known(KnownOidcErrorCode::InvalidGrant)
    }

    pub fn is_access_denied(&self) -> bool {
        self.error == OidcErrorCode::Known(KnownOidcErrorCode::AccessDenied)
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {description}", self.error.as_str()),
            None => f.write_str(self.error.as_str()),
        }
    }
}
