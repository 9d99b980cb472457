use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::collections::HashMap;
use time::OffsetDateTime;

/// See: https://openid.net/specs/openid-connect-core-1_0.html#IDToken
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct StandardIdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: RawAudiences,
    pub exp: i64,
    pub iat: i64,
    pub auth_time: Option<i64>,
    pub nonce: Option<String>,
    pub azp: Option<String>,
    #[serde(flatten)]
    pub remaining: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub(crate) enum RawAudiences {
    Single(String),
    Multiple(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("MissingClaimError: ID token lacks required claim '{claim}'"))]
pub struct MissingClaimError {
    pub claim: &'static str,
}

/// The verified identity of the user, projected from the claims of an ID token.
///
/// `name` and `preferred_username` are required. Tokens lacking either are rejected instead of
/// being accepted with empty values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// (name) End-User's full name in displayable form.
    pub name: String,

    /// (preferred_username) Shorthand name by which the End-User wishes to be referred to.
    pub preferred_username: String,

    /// (aud) Audience(s) that this ID Token is intended for.
    pub audiences: Audiences,

    /// (sub) Subject Identifier.
    pub subject: String,

    /// (iss) Issuer Identifier.
    pub issuer: String,

    /// (exp) Expiration time on or after which the ID Token MUST NOT be accepted.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// (nonce) Value passed through unmodified from the authentication request.
    pub nonce: Option<String>,

    pub email: Option<String>,
}

/// Represents the audience(s) (`aud` claim) from an ID token.
///
/// The `OpenID Connect` specification allows the `audience` to be either a single string
/// or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Audiences {
    Single(String),

    Multiple(Vec<String>),
}

impl Audiences {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audiences::Single(single) => single == audience,
            Audiences::Multiple(multiple) => multiple.iter().any(|it| it == audience),
        }
    }
}

impl From<RawAudiences> for Audiences {
    fn from(raw: RawAudiences) -> Self {
        match raw {
            RawAudiences::Single(s) => Audiences::Single(s),
            RawAudiences::Multiple(m) => Audiences::Multiple(m),
        }
    }
}

impl TryFrom<StandardIdTokenClaims> for IdentityClaims {
    type Error = MissingClaimError;

    fn try_from(mut raw: StandardIdTokenClaims) -> Result<Self, Self::Error> {
        fn take_string(
            remaining: &mut HashMap<String, serde_json::Value>,
            claim: &'static str,
        ) -> Option<String> {
            match remaining.remove(claim) {
                Some(serde_json::Value::String(value)) if !value.trim().is_empty() => Some(value),
                _ => None,
            }
        }

        let name =
            take_string(&mut raw.remaining, "name").ok_or(MissingClaimError { claim: "name" })?;
        let preferred_username = take_string(&mut raw.remaining, "preferred_username").ok_or(
            MissingClaimError {
                claim: "preferred_username",
            },
        )?;
        let expires_at = OffsetDateTime::from_unix_timestamp(raw.exp)
            .map_err(|_| MissingClaimError { claim: "exp" })?;

        Ok(Self {
            name,
            preferred_username,
            audiences: raw.aud.into(),
            subject: raw.sub,
            issuer: raw.iss,
            expires_at,
            nonce: raw.nonce,
            email: take_string(&mut raw.remaining, "email"),
        })
    }
}
