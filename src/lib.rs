//! Obtains OpenID Connect ID tokens for the doit CLI.
//!
//! A [`TokenProvider`] hands out a verified ID token on every call. It first uses the token
//! persisted by an earlier run, then tries a refresh, and as a last resort logs the user in
//! through the browser: a small server on the local address redirects to the authorization
//! server (authorization code flow with PKCE) and receives the callback.
//!
//! ```no_run
//! use doit_auth::{Options, TokenProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = TokenProvider::new(Options {
//!     client_id: "todo-app".to_owned(),
//!     server_url: "https://localhost/realms/todoapp".to_owned(),
//!     ..Default::default()
//! })
//! .await?;
//!
//! let id_token = provider.get_id_token().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Servers accepting these tokens use [`middleware::authenticate`], which runs the same
//! verification as the provider.

mod authenticated_client;
mod browser;
mod code_verifier;
mod config;
mod discovery;
mod error;
mod flow_state;
mod internal;
mod interrupt;
mod login;
pub mod middleware;
mod request;
mod response;
mod token;
mod token_cache;
mod token_claims;
mod token_provider;
mod token_validation;

// Library exports (additional to pub modules).
pub use authenticated_client::*;
pub use browser::*;
pub use code_verifier::{CodeChallenge, CodeChallengeMethod, CodeVerifier, PkceParams};
pub use config::*;
pub use discovery::{AuthorizationServerMetadata, DiscoveryError, discover, discovery_endpoint};
pub use error::*;
pub use flow_state::{FlowState, RandomnessError};
pub use interrupt::*;
pub use request::{RequestError, create_http_client};
pub use response::{ErrorResponse, KnownOidcErrorCode, OidcErrorCode};
pub use token::{MissingIdTokenError, TokenBundle};
pub use token_cache::{TokenCache, TokenCacheError};
pub use token_claims::{Audiences, IdentityClaims, MissingClaimError};
pub use token_provider::*;
pub use token_validation::{Verifier, VerifyError};
pub mod url {
    pub use url::Url;
}

type DiscoveryEndpoint = url::Url;
type JwkSetEndpoint = url::Url;
type AuthorizationEndpoint = url::Url;
type TokenEndpoint = url::Url;
