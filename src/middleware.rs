//! Request authentication for the doit REST server.
//!
//! Verifies the ID tokens handed out by [`crate::TokenProvider`] the same way the provider does:
//!
//! ```no_run
//! use axum::{Router, middleware::from_fn_with_state, routing::get};
//! use doit_auth::middleware::{AuthState, AuthenticatedUser, authenticate};
//!
//! # async fn example(provider: doit_auth::TokenProvider) {
//! let auth = AuthState::new(provider.verifier(), "todo-app");
//! let app: Router = Router::new()
//!     .route("/me", get(|AuthenticatedUser(user): AuthenticatedUser| async move {
//!         user.preferred_username
//!     }))
//!     .layer(from_fn_with_state(auth, authenticate));
//! # }
//! ```

use crate::{
    token_claims::IdentityClaims,
    token_validation::{Verifier, VerifyError},
};
use axum::{
    extract::{FromRequestParts, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use cookie::Cookie;
use http::{StatusCode, header::AUTHORIZATION, request::Parts};
use std::sync::Arc;

const TOKEN_COOKIE: &str = "jwt";
const TOKEN_QUERY_PARAM: &str = "jwt";

/// Extracts a raw token from a request, if present.
pub type TokenGetter = fn(&Parts) -> Option<String>;

/// Tried in order, the first token found is used.
pub const TOKEN_GETTERS: [TokenGetter; 3] =
    [token_from_header, token_from_cookie, token_from_query];

/// `Authorization: Bearer <token>`. The scheme is matched case-insensitively.
pub fn token_from_header(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_owned())
}

pub fn token_from_cookie(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get_all(http::header::COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(Cookie::split_parse)
        .flatten()
        .find(|cookie| cookie.name() == TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_owned())
        .filter(|token| !token.is_empty())
}

pub fn token_from_query(parts: &Parts) -> Option<String> {
    url::form_urlencoded::parse(parts.uri.query()?.as_bytes())
        .find(|(key, _)| key == TOKEN_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|token| !token.is_empty())
}

/// State of the [`authenticate`] middleware.
#[derive(Debug, Clone)]
pub struct AuthState {
    verifier: Arc<Verifier>,
    client_id: String,
}

impl AuthState {
    pub fn new(verifier: Arc<Verifier>, client_id: impl Into<String>) -> Self {
        Self {
            verifier,
            client_id: client_id.into(),
        }
    }
}

/// Rejects requests without a valid ID token. On success, the verified [`IdentityClaims`] are
/// stored in the request extensions, where [`AuthenticatedUser`] picks them up.
///
/// - No token: `401 No credentials supplied`.
/// - Token lacking `name` or `preferred_username`, or issued for another client: `400`.
/// - Any other verification failure: `401`.
pub async fn authenticate(
    State(auth): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    let Some(raw_token) = TOKEN_GETTERS.iter().find_map(|get_token| get_token(&parts)) else {
        return (StatusCode::UNAUTHORIZED, "No credentials supplied").into_response();
    };

    let claims = match auth
        .verifier
        .verify_or_refresh_keys(&raw_token, &auth.client_id)
        .await
    {
        Ok(claims) => claims,
        Err(VerifyError::MissingClaim { .. }) => {
            return (
                StatusCode::BAD_REQUEST,
                "Invalid claims. Require name and preferred_username",
            )
                .into_response();
        }
        Err(VerifyError::AudienceMismatch { .. }) => {
            return (StatusCode::BAD_REQUEST, "Invalid audience.").into_response();
        }
        Err(err) => {
            tracing::debug!(%err, "Rejecting request");
            return (StatusCode::UNAUTHORIZED, err.to_string()).into_response();
        }
    };

    parts.extensions.insert(claims);
    next.run(Request::from_parts(parts, body)).await
}

/// The user authenticated by [`authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub IdentityClaims);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<IdentityClaims>()
            .cloned()
            .map(AuthenticatedUser)
            .ok_or((StatusCode::UNAUTHORIZED, "No authenticated user"))
    }
}
