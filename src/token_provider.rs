use crate::{
    browser::{BrowserLauncher, SystemBrowser},
    code_verifier::CodeChallengeMethod,
    config::{CompletedOptions, Options},
    discovery::{self, AuthorizationServerMetadata},
    error::{
        CancelledSnafu, DiscoveryFailedSnafu, FlowError, HttpClientSnafu,
        InteractiveFlowFailedSnafu, InvalidConfigurationSnafu, KeySetUnavailableSnafu,
        TokenProviderError,
    },
    interrupt::{InterruptSource, os_interrupt_source},
    internal::{callback_server, flow_session::FlowContext},
    login,
    request::{self, RequestError},
    token::{MissingIdTokenError, TokenBundle},
    token_cache::TokenCache,
    token_validation::{Verifier, VerifyError},
};
use snafu::{ResultExt, Snafu};
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Debug, Snafu)]
enum RefreshError {
    #[snafu(display("RefreshError: Token endpoint rejected the refresh"))]
    Exchange { source: RequestError },

    #[snafu(display("RefreshError: Refresh response lacked an ID token"))]
    MissingIdToken { source: MissingIdTokenError },

    #[snafu(display("RefreshError: Refreshed ID token did not verify"))]
    Verification { source: VerifyError },
}

/// Hands out a verified ID token, logging the user in through the browser when necessary.
///
/// In order, [`TokenProvider::get_id_token`] tries
/// 1. the token memoized from the previous call, or the one persisted in the token file,
/// 2. a refresh using the refresh token stored alongside it,
/// 3. an interactive authorization code flow with PKCE, served on `local-addr`.
///
/// Calls are serialized. At most one interactive login runs at a time.
pub struct TokenProvider {
    options: CompletedOptions,
    http_client: reqwest::Client,
    metadata: Arc<AuthorizationServerMetadata>,
    verifier: Arc<Verifier>,
    token_cache: TokenCache,
    browser: Arc<dyn BrowserLauncher>,
    interrupt: InterruptSource,
    current: tokio::sync::Mutex<Option<TokenBundle>>,
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("options", &self.options)
            .field("metadata", &self.metadata)
            .field("token_cache", &self.token_cache)
            .finish_non_exhaustive()
    }
}

pub struct TokenProviderBuilder {
    options: Options,
    browser: Arc<dyn BrowserLauncher>,
    interrupt: InterruptSource,
}

impl TokenProviderBuilder {
    /// Replaces the system browser, e.g. to print the login URL on headless machines.
    pub fn browser(mut self, browser: impl BrowserLauncher) -> Self {
        self.browser = Arc::new(browser);
        self
    }

    /// Replaces Ctrl-C / SIGTERM as the signal cancelling a pending login.
    pub fn interrupt(mut self, interrupt: InterruptSource) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Validates the options, then discovers the authorization server and fetches its key set.
    ///
    /// # Errors
    /// Fails with a configuration error (see [`TokenProviderError::is_configuration_error`])
    /// when the options are invalid or the authorization server cannot be discovered.
    pub async fn build(self) -> Result<TokenProvider, TokenProviderError> {
        let options = self
            .options
            .into_completed()
            .context(InvalidConfigurationSnafu {})?;

        let http_client = request::create_http_client(
            options.insecure_client,
            options.advanced.request_timeout,
        )
        .context(HttpClientSnafu {})?;

        let metadata = discovery::discover(&http_client, &options.issuer_url)
            .await
            .context(DiscoveryFailedSnafu {})?;

        let verifier = Verifier::discover_keys(http_client.clone(), &metadata)
            .await
            .context(KeySetUnavailableSnafu {})?
            .with_leeway(options.advanced.clock_leeway)
            .with_min_key_refresh_interval(options.advanced.min_jwk_set_refresh_interval);

        tracing::debug!(issuer = %metadata.issuer, "Discovered authorization server");

        Ok(TokenProvider {
            token_cache: TokenCache::new(options.token_file.clone()),
            options,
            http_client,
            metadata: Arc::new(metadata),
            verifier: Arc::new(verifier),
            browser: self.browser,
            interrupt: self.interrupt,
            current: tokio::sync::Mutex::new(None),
        })
    }
}

impl TokenProvider {
    /// Creates a provider opening the system browser and listening for Ctrl-C / SIGTERM.
    pub async fn new(options: Options) -> Result<Self, TokenProviderError> {
        Self::builder(options).build().await
    }

    pub fn builder(options: Options) -> TokenProviderBuilder {
        TokenProviderBuilder {
            options,
            browser: Arc::new(SystemBrowser),
            interrupt: os_interrupt_source(),
        }
    }

    pub fn options(&self) -> &CompletedOptions {
        &self.options
    }

    pub fn metadata(&self) -> &AuthorizationServerMetadata {
        &self.metadata
    }

    /// The verifier used for ID tokens of this provider's issuer. Servers can share it with
    /// [`crate::middleware::AuthState`].
    pub fn verifier(&self) -> Arc<Verifier> {
        Arc::clone(&self.verifier)
    }

    /// Returns a raw ID token that verifies against the issuer and is addressed to our client.
    ///
    /// Cheap when a valid token is known, so it is safe to call before every request. Only the
    /// interactive login is ever surfaced as an error. Unreadable token files and failed
    /// refreshes are logged and fall through to the next step.
    ///
    /// # Errors
    /// - [`TokenProviderError::Cancelled`] when the login was interrupted.
    /// - [`TokenProviderError::InteractiveFlowFailed`] when the login failed. Use
    ///   [`TokenProviderError::is_security_violation`] to detect possible attacks.
    pub async fn get_id_token(&self) -> Result<String, TokenProviderError> {
        let mut current = self.current.lock().await;

        let known = match current.take() {
            Some(bundle) => Some(bundle),
            None => self.load_cached(),
        };

        if let Some(bundle) = known {
            match self
                .verifier
                .verify_or_refresh_keys(&bundle.id_token, &self.options.client_id)
                .await
            {
                Ok(_) => {
                    let id_token = bundle.id_token.clone();
                    *current = Some(bundle);
                    return Ok(id_token);
                }
                Err(err) => tracing::debug!(%err, "Known ID token is no longer usable"),
            }

            if let Some(refresh_token) = bundle.refresh_token {
                match self.refresh(refresh_token).await {
                    Ok(bundle) => {
                        let id_token = bundle.id_token.clone();
                        *current = Some(bundle);
                        return Ok(id_token);
                    }
                    Err(err) => {
                        tracing::warn!(%err, "Could not refresh token, logging in interactively");
                    }
                }
            }
        }

        let bundle = self.login().await?;
        let id_token = bundle.id_token.clone();
        *current = Some(bundle);
        Ok(id_token)
    }

    fn load_cached(&self) -> Option<TokenBundle> {
        match self.token_cache.load() {
            Ok(bundle) => Some(bundle),
            Err(err) if err.is_miss() => {
                tracing::debug!(%err, "No usable token file");
                None
            }
            Err(err) => {
                tracing::warn!(%err, "Could not read token file");
                None
            }
        }
    }

    async fn refresh(&self, refresh_token: String) -> Result<TokenBundle, RefreshError> {
        tracing::debug!("Refreshing token");
        let response = request::refresh_token(
            &self.http_client,
            &self.metadata.token_endpoint,
            &self.options.client_id,
            &refresh_token,
        )
        .await
        .context(ExchangeSnafu {})?;

        let bundle = TokenBundle::from_token_response(
            response,
            OffsetDateTime::now_utc(),
            Some(refresh_token),
        )
        .context(MissingIdTokenSnafu {})?;

        self.verifier
            .verify_or_refresh_keys(&bundle.id_token, &self.options.client_id)
            .await
            .context(VerificationSnafu {})?;

        // The refreshed token is usable even if it cannot be written.
        if let Err(err) = self.token_cache.save(&bundle) {
            tracing::warn!(%err, "Could not save refreshed token");
        }
        Ok(bundle)
    }

    async fn login(&self) -> Result<TokenBundle, TokenProviderError> {
        let advanced = &self.options.advanced;
        let s256 = CodeChallengeMethod::S256.as_str();
        if !self
            .metadata
            .code_challenge_methods_supported
            .iter()
            .any(|method| method == s256)
        {
            if advanced.require_pkce {
                return Err(FlowError::PkceUnsupported).context(InteractiveFlowFailedSnafu {});
            }
            tracing::warn!("Authorization server does not support S256 PKCE, logging in without PKCE");
        }

        let context = FlowContext {
            http_client: self.http_client.clone(),
            metadata: Arc::clone(&self.metadata),
            verifier: Arc::clone(&self.verifier),
            token_cache: self.token_cache.clone(),
            client_id: self.options.client_id.clone(),
            redirect_url: self.options.redirect_url.clone(),
            scope: login::scope(&advanced.additional_scopes),
            flow_cookie_max_age: advanced.flow_cookie_max_age,
        };

        match callback_server::run_interactive_flow(
            context,
            &self.options.local_addr,
            self.browser.as_ref(),
            &self.interrupt,
            advanced.shutdown_grace_period,
        )
        .await
        {
            Ok(bundle) => Ok(bundle),
            Err(FlowError::Interrupted) => CancelledSnafu {}.fail(),
            Err(source) => Err(source).context(InteractiveFlowFailedSnafu {}),
        }
    }
}
