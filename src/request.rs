use crate::{
    JwkSetEndpoint, TokenEndpoint,
    code_verifier::CodeVerifier,
    response::{ErrorResponse, SuccessTokenResponse, TokenResponse},
};
use reqwest::IntoUrl;
use serde::{Deserialize, de::DeserializeOwned};
use snafu::{ResultExt, Snafu};
use std::time::Duration;

#[derive(Debug, Snafu)]
pub enum RequestError {
    #[snafu(display("RequestError: Could not build HTTP client"))]
    BuildClient { source: reqwest::Error },

    #[snafu(display("RequestError: Could not send request"))]
    Send { source: reqwest::Error },

    #[snafu(display("RequestError: Could not decode payload"))]
    Decode { source: reqwest::Error },

    #[snafu(display("RequestError: Received an error response: {error_response}"))]
    ErrResponse { error_response: ErrorResponse },
}

impl RequestError {
    /// The authorization server rejected the grant with `invalid_grant`.
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, RequestError::ErrResponse { error_response } if error_response.is_invalid_grant())
    }
}

/// Creates the client used for every call to the authorization server.
///
/// With `insecure`, TLS certificates of the authorization server are not validated.
pub fn create_http_client(
    insecure: bool,
    timeout: Duration,
) -> Result<reqwest::Client, RequestError> {
    if insecure {
        tracing::warn!("TLS certificate validation is disabled for the authorization server");
    }
    reqwest::Client::builder()
        .danger_accept_invalid_certs(insecure)
        .timeout(timeout)
        .build()
        .context(BuildClientSnafu {})
}

pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    endpoint: impl IntoUrl,
) -> Result<T, RequestError> {
    client
        .get(endpoint)
        .send()
        .await
        .context(SendSnafu {})?
        .error_for_status()
        .context(SendSnafu {})?
        .json::<T>()
        .await
        .context(DecodeSnafu {})
}

pub(crate) async fn retrieve_jwk_set(
    client: &reqwest::Client,
    jwk_set_endpoint: &JwkSetEndpoint,
) -> Result<jsonwebtoken::jwk::JwkSet, RequestError> {
    #[derive(Deserialize)]
    pub struct RawJwkSet {
        pub keys: Vec<serde_json::Value>,
    }
    let raw_set = get_json::<RawJwkSet>(client, jwk_set_endpoint.clone()).await?;
    let mut set = jsonwebtoken::jwk::JwkSet { keys: Vec::new() };
    for key in raw_set.keys {
        match serde_json::from_value::<jsonwebtoken::jwk::Jwk>(key) {
            Ok(parsed) => set.keys.push(parsed),
            Err(err) => tracing::warn!(?err, "Found non-decodable JWK"),
        }
    }
    tracing::debug!(keys = set.keys.len(), "Retrieved JWK set");
    Ok(set)
}

async fn post_token_request(
    client: &reqwest::Client,
    token_endpoint: &TokenEndpoint,
    params: &[(&str, &str)],
) -> Result<SuccessTokenResponse, RequestError> {
    // Error responses carry a 4xx status, so the body is decoded regardless of the status code.
    match client
        .post(token_endpoint.clone())
        .form(params)
        .send()
        .await
        .context(SendSnafu {})?
        .json::<TokenResponse>()
        .await
        .context(DecodeSnafu {})?
    {
        TokenResponse::Success(success) => Ok(success),
        TokenResponse::Error(error) => Err(ErrResponseSnafu {
            error_response: error,
        }
        .build()),
    }
}

pub(crate) async fn exchange_code_for_token(
    client: &reqwest::Client,
    token_endpoint: &TokenEndpoint,
    client_id: &str,
    redirect_uri: &str,
    code: &str,
    code_verifier: Option<&CodeVerifier>,
) -> Result<SuccessTokenResponse, RequestError> {
    let mut params = vec![
        ("grant_type", "authorization_code"),
        ("client_id", client_id),
        ("redirect_uri", redirect_uri),
        ("code", code),
    ];
    if let Some(code_verifier) = code_verifier {
        params.push(("code_verifier", code_verifier.code_verifier()));
    }
    post_token_request(client, token_endpoint, &params).await
}

pub(crate) async fn refresh_token(
    client: &reqwest::Client,
    token_endpoint: &TokenEndpoint,
    client_id: &str,
    refresh_token: &str,
) -> Result<SuccessTokenResponse, RequestError> {
    let params = [
        ("grant_type", "refresh_token"),
        ("client_id", client_id),
        ("refresh_token", refresh_token),
    ];
    post_token_request(client, token_endpoint, &params).await
}
