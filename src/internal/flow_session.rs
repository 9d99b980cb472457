use crate::{
    code_verifier::PkceParams,
    discovery::AuthorizationServerMetadata,
    error::{
        AlreadyCompletedSnafu, AuthorizationDeniedSnafu, ExchangeSnafu, FlowError,
        MissingCodeSnafu, MissingIdTokenSnafu, NonceMismatchSnafu, NonceMissingSnafu,
        PersistSnafu, RandomnessSnafu, StateMismatchSnafu, StateMissingSnafu,
        UnexpectedCallbackSnafu, VerificationSnafu,
    },
    flow_state::FlowState,
    login,
    request,
    response::{CallbackParams, CallbackResponse},
    token::TokenBundle,
    token_cache::TokenCache,
    token_validation::Verifier,
};
use http::StatusCode;
use snafu::{OptionExt, ResultExt};
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use time::OffsetDateTime;
use tokio::sync::oneshot;
use url::Url;

pub(crate) type FlowResult = Result<TokenBundle, FlowError>;

/// Everything a login attempt needs besides the values issued per visit of the login page.
#[derive(Debug, Clone)]
pub(crate) struct FlowContext {
    pub http_client: reqwest::Client,
    pub metadata: Arc<AuthorizationServerMetadata>,
    pub verifier: Arc<Verifier>,
    pub token_cache: TokenCache,
    pub client_id: String,
    pub redirect_url: Url,
    pub scope: String,
    pub flow_cookie_max_age: Duration,
}

/// Values handed out by the latest visit of the login page.
struct IssuedFlow {
    flow_state: FlowState,
    pkce: PkceParams,
}

/// The `state` and `nonce` cookies presented to `/callback`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct FlowCookies {
    pub state: Option<String>,
    pub nonce: Option<String>,
}

#[derive(Debug)]
pub(crate) struct LoginRedirect {
    pub login_url: Url,
    pub flow_state: FlowState,
}

/// What the browser is told when a request is turned down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Rejection {
    pub status: StatusCode,
    pub message: String,
}

impl From<&FlowError> for Rejection {
    fn from(err: &FlowError) -> Self {
        Self {
            status: err.status_code(),
            message: err.to_string(),
        }
    }
}

/// State of a single interactive login attempt, shared between the callback server handlers and
/// the task waiting for the outcome.
///
/// The outcome is delivered exactly once. Whoever takes the completion sender first (a callback
/// handler reporting success or failure, or [`FlowSession::revoke`]) settles the attempt, and
/// every later callback is rejected.
pub(crate) struct FlowSession {
    context: FlowContext,
    issued: Mutex<Option<IssuedFlow>>,
    completion: Mutex<Option<oneshot::Sender<FlowResult>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FlowSession {
    pub(crate) fn new(context: FlowContext, completion: oneshot::Sender<FlowResult>) -> Self {
        Self {
            context,
            issued: Mutex::new(None),
            completion: Mutex::new(Some(completion)),
        }
    }

    pub(crate) fn context(&self) -> &FlowContext {
        &self.context
    }

    pub(crate) fn is_settled(&self) -> bool {
        lock(&self.completion).is_none()
    }

    /// Issues fresh `state`, `nonce` and PKCE values. Values issued by earlier visits are
    /// forgotten, so only the latest login page can complete the attempt.
    pub(crate) fn begin(&self) -> Result<LoginRedirect, Rejection> {
        if self.is_settled() {
            return Err(Rejection::from(&AlreadyCompletedSnafu {}.build()));
        }

        let issued = FlowState::generate()
            .and_then(|flow_state| {
                PkceParams::new(&self.context.metadata.code_challenge_methods_supported)
                    .map(|pkce| IssuedFlow { flow_state, pkce })
            })
            .context(RandomnessSnafu {});
        let issued = match issued {
            Ok(issued) => issued,
            Err(err) => return Err(self.fail(err)),
        };

        let login_url = login::create_login_url(
            &self.context.metadata.authorization_endpoint,
            &self.context.client_id,
            self.context.redirect_url.as_str(),
            &self.context.scope,
            &issued.flow_state,
            &issued.pkce,
        );
        let flow_state = issued.flow_state.clone();
        *lock(&self.issued) = Some(issued);

        tracing::debug!(%login_url, "Redirecting to authorization endpoint");
        Ok(LoginRedirect {
            login_url,
            flow_state,
        })
    }

    /// Handles a redirect back from the authorization server and settles the attempt with its
    /// outcome. The tokens are persisted before the attempt is reported as completed.
    pub(crate) async fn complete(
        &self,
        cookies: FlowCookies,
        params: CallbackParams,
    ) -> Result<(), Rejection> {
        let issued = lock(&self.issued).take();
        let Some(issued) = issued else {
            let err = if self.is_settled() {
                AlreadyCompletedSnafu {}.build()
            } else {
                UnexpectedCallbackSnafu {}.build()
            };
            tracing::warn!(%err, "Rejecting callback");
            return Err(Rejection::from(&err));
        };

        let result = self.exchange(issued, cookies, params).await;

        let Some(sender) = lock(&self.completion).take() else {
            tracing::debug!("Login was settled while handling the callback, discarding the result");
            return Err(Rejection::from(&FlowError::Interrupted));
        };

        let result = result.and_then(|bundle| {
            self.context
                .token_cache
                .save(&bundle)
                .context(PersistSnafu {})?;
            Ok(bundle)
        });
        let reply = match &result {
            Ok(_) => Ok(()),
            Err(err) => {
                tracing::warn!(%err, "Login failed");
                Err(Rejection::from(err))
            }
        };
        if sender.send(result).is_err() {
            tracing::debug!("Nobody is waiting for the login result anymore");
        }
        reply
    }

    /// Settles the attempt without a result. Returns `false` when it was already settled.
    pub(crate) fn revoke(&self) -> bool {
        lock(&self.issued).take();
        lock(&self.completion).take().is_some()
    }

    fn fail(&self, err: FlowError) -> Rejection {
        let rejection = Rejection::from(&err);
        tracing::warn!(%err, "Login failed");
        if let Some(sender) = lock(&self.completion).take() {
            let _ = sender.send(Err(err));
        }
        rejection
    }

    async fn exchange(
        &self,
        issued: IssuedFlow,
        cookies: FlowCookies,
        params: CallbackParams,
    ) -> FlowResult {
        let IssuedFlow { flow_state, pkce } = issued;

        let state_cookie = cookies.state.context(StateMissingSnafu {})?;
        if params.state.as_deref() != Some(state_cookie.as_str())
            || state_cookie != flow_state.state()
        {
            return StateMismatchSnafu {}.fail();
        }

        let code = match params.response() {
            CallbackResponse::SuccessfulLogin { code } => code,
            CallbackResponse::Error(error_response) => {
                return AuthorizationDeniedSnafu { error_response }.fail();
            }
            CallbackResponse::Malformed => return MissingCodeSnafu {}.fail(),
        };

        let context = &self.context;
        let token_response = request::exchange_code_for_token(
            &context.http_client,
            &context.metadata.token_endpoint,
            &context.client_id,
            context.redirect_url.as_str(),
            &code,
            pkce.verifier(),
        )
        .await
        .context(ExchangeSnafu {})?;

        let bundle =
            TokenBundle::from_token_response(token_response, OffsetDateTime::now_utc(), None)
                .context(MissingIdTokenSnafu {})?;

        let claims = context
            .verifier
            .verify_or_refresh_keys(&bundle.id_token, &context.client_id)
            .await
            .context(VerificationSnafu {})?;

        let nonce_cookie = cookies.nonce.context(NonceMissingSnafu {})?;
        if claims.nonce.as_deref() != Some(nonce_cookie.as_str())
            || nonce_cookie != flow_state.nonce()
        {
            return NonceMismatchSnafu {}.fail();
        }

        tracing::info!(user = %claims.preferred_username, "Login succeeded");
        Ok(bundle)
    }
}
