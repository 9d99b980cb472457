use crate::{
    AuthorizationEndpoint, DiscoveryEndpoint, JwkSetEndpoint, TokenEndpoint,
    request::{self, RequestError},
};
use serde::Deserialize;
use snafu::{OptionExt, ResultExt, Snafu};
use url::Url;

#[derive(Debug, Snafu)]
pub enum DiscoveryError {
    #[snafu(display("DiscoveryError: Issuer URL '{issuer}' cannot be used as a base URL"))]
    InvalidIssuerUrl { issuer: Url },

    #[snafu(display("DiscoveryError: Could not retrieve discovery document from '{endpoint}'"))]
    Retrieve {
        endpoint: DiscoveryEndpoint,
        source: RequestError,
    },

    #[snafu(display("DiscoveryError: Discovery document is missing required field '{field}'"))]
    MissingField { field: &'static str },

    #[snafu(display("DiscoveryError: Discovery document field '{field}' is not a valid URL"))]
    InvalidField {
        field: &'static str,
        source: url::ParseError,
    },

    #[snafu(display(
        "DiscoveryError: Issuer of discovery document '{actual}' did not match configured issuer '{expected}'"
    ))]
    IssuerMismatch { expected: String, actual: String },
}

/// Metadata of the authorization server, resolved once through OIDC discovery.
///
/// See: https://openid.net/specs/openid-connect-discovery-1_0.html#ProviderMetadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationServerMetadata {
    /// The issuer exactly as published by the authorization server. ID tokens must carry this
    /// value in their `iss` claim.
    pub issuer: String,
    pub authorization_endpoint: AuthorizationEndpoint,
    pub token_endpoint: TokenEndpoint,
    pub jwks_uri: JwkSetEndpoint,
    /// Empty when the server does not advertise PKCE support.
    pub code_challenge_methods_supported: Vec<String>,
}

/// Wire format. Every field is optional here so that a missing field can be reported by name.
#[derive(Debug, Deserialize)]
struct RawDiscoveryDocument {
    issuer: Option<String>,
    authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
    jwks_uri: Option<String>,
    #[serde(default)]
    code_challenge_methods_supported: Vec<String>,
}

/// `{issuer}/.well-known/openid-configuration`
pub fn discovery_endpoint(issuer: &Url) -> Result<DiscoveryEndpoint, DiscoveryError> {
    let mut url = issuer.clone();
    url.path_segments_mut()
        .map_err(|()| {
            InvalidIssuerUrlSnafu {
                issuer: issuer.clone(),
            }
            .build()
        })?
        .pop_if_empty()
        .extend(&[".well-known", "openid-configuration"]);
    Ok(url)
}

/// Fetches and validates the discovery document of `issuer`.
pub async fn discover(
    client: &reqwest::Client,
    issuer: &Url,
) -> Result<AuthorizationServerMetadata, DiscoveryError> {
    let endpoint = discovery_endpoint(issuer)?;
    tracing::debug!(%endpoint, "Retrieving OIDC discovery document");

    let raw = request::get_json::<RawDiscoveryDocument>(client, endpoint.clone())
        .await
        .context(RetrieveSnafu { endpoint })?;

    let metadata = raw.validate(issuer)?;
    tracing::trace!(?metadata, "Discovered authorization server");
    Ok(metadata)
}

impl RawDiscoveryDocument {
    fn validate(self, configured_issuer: &Url) -> Result<AuthorizationServerMetadata, DiscoveryError> {
        fn required_url(field: &'static str, value: Option<String>) -> Result<Url, DiscoveryError> {
            let value = value.context(MissingFieldSnafu { field })?;
            Url::parse(&value).context(InvalidFieldSnafu { field })
        }

        let issuer = self.issuer.context(MissingFieldSnafu { field: "issuer" })?;
        let expected = configured_issuer.as_str().trim_end_matches('/');
        if issuer.trim_end_matches('/') != expected {
            return IssuerMismatchSnafu {
                expected,
                actual: issuer,
            }
            .fail();
        }

        Ok(AuthorizationServerMetadata {
            issuer,
            authorization_endpoint: required_url(
                "authorization_endpoint",
                self.authorization_endpoint,
            )?,
            token_endpoint: required_url("token_endpoint", self.token_endpoint)?,
            jwks_uri: required_url("jwks_uri", self.jwks_uri)?,
            code_challenge_methods_supported: self.code_challenge_methods_supported,
        })
    }
}
