use crate::response::SuccessTokenResponse;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, Snafu};
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("MissingIdTokenError: Token response did not contain an 'id_token'"))]
pub struct MissingIdTokenError;

/// The set of tokens persisted between runs.
///
/// Field names follow the token file format: `access_token`, `refresh_token` (optional),
/// `id_token`, `token_type` and `expiry` (RFC 3339).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    pub id_token: String,

    pub token_type: String,

    /// Expiry of the access token. The ID token carries its own `exp` claim.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expiry: Option<OffsetDateTime>,
}

impl std::fmt::Debug for TokenBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBundle")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("id_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .finish()
    }
}

impl TokenBundle {
    /// Builds a bundle from a token endpoint response received at `now`.
    ///
    /// When the response carries no refresh token, `previous_refresh_token` is kept.
    pub(crate) fn from_token_response(
        response: SuccessTokenResponse,
        now: OffsetDateTime,
        previous_refresh_token: Option<String>,
    ) -> Result<Self, MissingIdTokenError> {
        let id_token = response
            .id_token
            .filter(|it| !it.is_empty())
            .context(MissingIdTokenSnafu {})?;

        Ok(Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh_token),
            id_token,
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_owned()),
            // An `expires_in` beyond the representable range leaves the expiry unknown.
            expiry: response
                .expires_in
                .and_then(|expires_in| now.checked_add(Duration::seconds(expires_in))),
        })
    }
}
