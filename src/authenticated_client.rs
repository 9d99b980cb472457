use crate::{TokenProvider, error::TokenProviderError};
use snafu::{ResultExt, Snafu};
use std::sync::Arc;

#[derive(Debug, Snafu)]
pub enum AuthenticatedRequestError {
    #[snafu(display("AuthenticatedRequestError: Could not obtain an ID token"))]
    Token { source: TokenProviderError },

    #[snafu(display("AuthenticatedRequestError: Request failed"))]
    Request { source: reqwest::Error },
}

/// HTTP client for the doit REST API with automatic ID token injection.
///
/// This client wraps a `reqwest::Client` and provides the same HTTP methods to issue GET, POST,
/// PUT, PATCH and DELETE requests. Before every request, the current ID token is obtained through
/// [`TokenProvider::get_id_token`] and added to the `Authorization` header as a Bearer token.
/// Refreshing, or logging in through the browser, happens transparently when the known token is
/// no longer valid.
///
/// # Example
/// ```no_run
/// # use std::sync::Arc;
/// # use doit_auth::{AuthenticatedClient, Options, TokenProvider};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = Arc::new(TokenProvider::new(Options::default()).await?);
/// let client = AuthenticatedClient::new(reqwest::Client::new(), provider);
///
/// let response = client.get("http://localhost:3000/tasks").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    client: reqwest::Client,
    provider: Arc<TokenProvider>,
}

impl AuthenticatedClient {
    pub fn new(client: reqwest::Client, provider: Arc<TokenProvider>) -> Self {
        Self { client, provider }
    }

    pub fn provider(&self) -> &TokenProvider {
        &self.provider
    }

    /// Perform a GET request with automatic token injection.
    ///
    /// # Errors
    /// Returns an error if no ID token could be obtained, or if the request fails due to network
    /// issues, an invalid URL or other `reqwest` errors.
    pub async fn get(
        &self,
        url: impl reqwest::IntoUrl,
    ) -> Result<reqwest::Response, AuthenticatedRequestError> {
        self.get_with(url, |builder| builder).await
    }

    /// Perform a GET request with automatic token injection and custom request configuration.
    ///
    /// Use `with` to add custom headers, query parameters, timeouts, or other request
    /// configuration.
    ///
    /// # Example
    /// ```no_run
    /// # use doit_auth::AuthenticatedClient;
    ///
    /// # async fn example(client: AuthenticatedClient) -> Result<(), Box<dyn std::error::Error>> {
    /// let response = client
    ///     .get_with("http://localhost:3000/tasks", |builder| {
    ///         builder.query(&[("status", "open")])
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get_with(
        &self,
        url: impl reqwest::IntoUrl,
        with: impl FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, AuthenticatedRequestError> {
        self.request(reqwest::Method::GET, url, with).await
    }

    /// Perform a POST request with automatic token injection.
    ///
    /// For POST with body, use [`post_with`](Self::post_with) instead.
    pub async fn post(
        &self,
        url: impl reqwest::IntoUrl,
    ) -> Result<reqwest::Response, AuthenticatedRequestError> {
        self.post_with(url, |builder| builder).await
    }

    /// Perform a POST request with custom request builder configuration, e.g. to set a JSON body.
    ///
    /// # Example
    /// ```no_run
    /// # use doit_auth::AuthenticatedClient;
    ///
    /// # async fn example(client: AuthenticatedClient) -> Result<(), Box<dyn std::error::Error>> {
    /// #[derive(serde::Serialize)]
    /// struct NewTask { title: String }
    /// let task = NewTask { title: "Water the plants".to_string() };
    ///
    /// let response = client
    ///     .post_with("http://localhost:3000/tasks", |builder| builder.json(&task))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn post_with(
        &self,
        url: impl reqwest::IntoUrl,
        with: impl FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, AuthenticatedRequestError> {
        self.request(reqwest::Method::POST, url, with).await
    }

    pub async fn put(
        &self,
        url: impl reqwest::IntoUrl,
    ) -> Result<reqwest::Response, AuthenticatedRequestError> {
        self.put_with(url, |builder| builder).await
    }

    pub async fn put_with(
        &self,
        url: impl reqwest::IntoUrl,
        with: impl FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, AuthenticatedRequestError> {
        self.request(reqwest::Method::PUT, url, with).await
    }

    pub async fn patch(
        &self,
        url: impl reqwest::IntoUrl,
    ) -> Result<reqwest::Response, AuthenticatedRequestError> {
        self.patch_with(url, |builder| builder).await
    }

    /// Perform a PATCH request with custom request builder configuration, typically carrying a
    /// partial update.
    pub async fn patch_with(
        &self,
        url: impl reqwest::IntoUrl,
        with: impl FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, AuthenticatedRequestError> {
        self.request(reqwest::Method::PATCH, url, with).await
    }

    pub async fn delete(
        &self,
        url: impl reqwest::IntoUrl,
    ) -> Result<reqwest::Response, AuthenticatedRequestError> {
        self.delete_with(url, |builder| builder).await
    }

    pub async fn delete_with(
        &self,
        url: impl reqwest::IntoUrl,
        with: impl FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, AuthenticatedRequestError> {
        self.request(reqwest::Method::DELETE, url, with).await
    }

    /// Performs a request with the current ID token set as the AUTHORIZATION header.
    ///
    /// The token is obtained before the request is built, so a pending interactive login
    /// delays the request until it completes.
    ///
    /// # Errors
    /// Returns an error if no ID token could be obtained, or if the request fails due to network
    /// issues, an invalid URL or other `reqwest` errors. Error statuses of the response are not
    /// turned into errors.
    pub async fn request(
        &self,
        method: reqwest::Method,
        url: impl reqwest::IntoUrl,
        with: impl FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, AuthenticatedRequestError> {
        let id_token = self.provider.get_id_token().await.context(TokenSnafu {})?;

        // Let the user build the request.
        let req_builder = with(self.client.request(method, url));

        req_builder
            .bearer_auth(id_token)
            .send()
            .await
            .context(RequestSnafu {})
    }
}
