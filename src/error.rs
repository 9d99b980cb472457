use crate::{
    config::OptionsError,
    discovery::DiscoveryError,
    flow_state::RandomnessError,
    request::RequestError,
    response::ErrorResponse,
    token::MissingIdTokenError,
    token_cache::TokenCacheError,
    token_validation::VerifyError,
};
use http::StatusCode;
use snafu::Snafu;
use url::Url;

/// Errors surfaced by [`crate::TokenProvider`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TokenProviderError {
    #[snafu(display("TokenProviderError: Invalid configuration"))]
    InvalidConfiguration { source: OptionsError },

    #[snafu(display("TokenProviderError: Could not create HTTP client"))]
    HttpClient { source: RequestError },

    #[snafu(display("TokenProviderError: OIDC discovery failed"))]
    DiscoveryFailed { source: DiscoveryError },

    #[snafu(display("TokenProviderError: Could not retrieve the JWK set of the issuer"))]
    KeySetUnavailable { source: RequestError },

    #[snafu(display("TokenProviderError: Interactive login failed"))]
    InteractiveFlowFailed { source: FlowError },

    #[snafu(display("TokenProviderError: Login was cancelled"))]
    Cancelled,
}

impl TokenProviderError {
    /// The provider could not be constructed. Retrying without changing the setup is pointless.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            TokenProviderError::InvalidConfiguration { .. }
                | TokenProviderError::HttpClient { .. }
                | TokenProviderError::DiscoveryFailed { .. }
                | TokenProviderError::KeySetUnavailable { .. }
        )
    }

    /// The login was rejected because it may have been tampered with.
    pub fn is_security_violation(&self) -> bool {
        match self {
            TokenProviderError::InteractiveFlowFailed { source } => source.is_security_violation(),
            _ => false,
        }
    }

    /// The user interrupted the login. Callers should not retry automatically.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TokenProviderError::Cancelled)
    }
}

/// Why an interactive login attempt did not complete.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FlowError {
    #[snafu(display("FlowError: Could not listen on '{addr}'"))]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[snafu(display("FlowError: Callback server failed"))]
    Serve { source: std::io::Error },

    #[snafu(display("FlowError: Callback server task failed"))]
    ServerTask { source: tokio::task::JoinError },

    #[snafu(display("FlowError: Local address '{addr}' does not form a valid URL"))]
    LoginUrl {
        addr: String,
        source: url::ParseError,
    },

    #[snafu(display("FlowError: Could not open browser at '{url}'"))]
    BrowserLaunch {
        url: Url,
        source: std::io::Error,
    },

    #[snafu(display("FlowError: Could not generate login parameters"))]
    Randomness { source: RandomnessError },

    #[snafu(display(
        "FlowError: Authorization server does not support S256 PKCE, which is required"
    ))]
    PkceUnsupported,

    #[snafu(display("FlowError: Received a callback without a login in progress"))]
    UnexpectedCallback,

    #[snafu(display("FlowError: Login was already completed"))]
    AlreadyCompleted,

    #[snafu(display("FlowError: state not found"))]
    StateMissing,

    #[snafu(display("FlowError: state did not match"))]
    StateMismatch,

    #[snafu(display("FlowError: nonce not found"))]
    NonceMissing,

    #[snafu(display("FlowError: nonce did not match"))]
    NonceMismatch,

    #[snafu(display("FlowError: Authorization server denied the login: {error_response}"))]
    AuthorizationDenied { error_response: ErrorResponse },

    #[snafu(display("FlowError: Callback carried neither a code nor an error"))]
    MissingCode,

    #[snafu(display("FlowError: Failed to exchange token"))]
    Exchange { source: RequestError },

    #[snafu(display("FlowError: No id_token field in token response"))]
    MissingIdToken { source: MissingIdTokenError },

    #[snafu(display("FlowError: Failed to verify ID token"))]
    Verification { source: VerifyError },

    #[snafu(display("FlowError: Failed to save token"))]
    Persist { source: TokenCacheError },

    #[snafu(display("FlowError: Login was interrupted"))]
    Interrupted,

    #[snafu(display("FlowError: Login ended without a result"))]
    Abandoned,
}

impl FlowError {
    /// CSRF or replay protection tripped, or the ID token failed a security check.
    pub fn is_security_violation(&self) -> bool {
        match self {
            FlowError::StateMissing
            | FlowError::StateMismatch
            | FlowError::NonceMissing
            | FlowError::NonceMismatch => true,
            FlowError::Verification { source } => source.is_security_violation(),
            _ => false,
        }
    }

    /// Status code of the page shown in the browser.
    pub(crate) fn status_code(&self) -> StatusCode {
        match self {
            FlowError::UnexpectedCallback
            | FlowError::AlreadyCompleted
            | FlowError::StateMissing
            | FlowError::StateMismatch
            | FlowError::NonceMissing
            | FlowError::NonceMismatch
            | FlowError::AuthorizationDenied { .. }
            | FlowError::MissingCode => StatusCode::BAD_REQUEST,
            FlowError::Interrupted | FlowError::Abandoned => StatusCode::GONE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
