use crate::{
    browser::BrowserLauncher,
    error::{BindSnafu, FlowError, LoginUrlSnafu},
    interrupt::InterruptSource,
    internal::flow_session::{FlowContext, FlowCookies, FlowResult, FlowSession, Rejection},
    response::CallbackParams,
};
use axum::{
    Router,
    extract::{Query, State},
    response::{AppendHeaders, Html, IntoResponse, Response},
    routing::get,
};
use cookie::{Cookie, SameSite};
use http::{
    HeaderMap, StatusCode,
    header::{COOKIE, LOCATION, SET_COOKIE},
};
use snafu::ResultExt;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use url::Url;

pub(crate) const STATE_COOKIE: &str = "state";
pub(crate) const NONCE_COOKIE: &str = "nonce";

const SUCCESS_PAGE: &str = "<!DOCTYPE html>
<html>
<head><title>doit</title></head>
<body>
<h1>Authorization Successful</h1>
<p>You may now close this window and return to the terminal.</p>
</body>
</html>";

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

pub(crate) fn router(session: Arc<FlowSession>) -> Router {
    Router::new()
        .route("/", get(start))
        .route("/callback", get(callback))
        .with_state(session)
}

async fn start(State(session): State<Arc<FlowSession>>) -> Response {
    let redirect = match session.begin() {
        Ok(redirect) => redirect,
        Err(rejection) => return rejection.into_response(),
    };

    let context = session.context();
    let secure = context.redirect_url.scheme() == "https";
    let max_age = context.flow_cookie_max_age;
    (
        StatusCode::FOUND,
        AppendHeaders([
            (LOCATION, redirect.login_url.to_string()),
            (
                SET_COOKIE,
                flow_cookie(STATE_COOKIE, redirect.flow_state.state(), max_age, secure),
            ),
            (
                SET_COOKIE,
                flow_cookie(NONCE_COOKIE, redirect.flow_state.nonce(), max_age, secure),
            ),
        ]),
    )
        .into_response()
}

async fn callback(
    State(session): State<Arc<FlowSession>>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    match session.complete(flow_cookies(&headers), params).await {
        Ok(()) => Html(SUCCESS_PAGE).into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

fn flow_cookie(name: &'static str, value: &str, max_age: Duration, secure: bool) -> String {
    let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
    Cookie::build((name, value.to_owned()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(max_age))
        .build()
        .to_string()
}

fn flow_cookies(headers: &HeaderMap) -> FlowCookies {
    let mut cookies = FlowCookies::default();
    for header in headers.get_all(COOKIE) {
        let Ok(header) = header.to_str() else {
            continue;
        };
        for cookie in Cookie::split_parse(header).flatten() {
            match cookie.name() {
                STATE_COOKIE => cookies.state = Some(cookie.value().to_owned()),
                NONCE_COOKIE => cookies.nonce = Some(cookie.value().to_owned()),
                _ => {}
            }
        }
    }
    cookies
}

type ServerHandle = JoinHandle<std::io::Result<()>>;

enum Settlement {
    Settled(FlowResult),
    ServerStopped(Result<std::io::Result<()>, tokio::task::JoinError>),
}

/// Runs one interactive login attempt.
///
/// Serves the login page and the callback on `local_addr`, opens the browser at the login page
/// and waits until the callback completes or fails the attempt, or until `interrupt` fires. The
/// server is shut down before returning, whatever the outcome, so the address can be bound again.
pub(crate) async fn run_interactive_flow(
    context: FlowContext,
    local_addr: &str,
    browser: &dyn BrowserLauncher,
    interrupt: &InterruptSource,
    grace_period: Duration,
) -> FlowResult {
    let login_url =
        Url::parse(&format!("http://{local_addr}/")).context(LoginUrlSnafu { addr: local_addr })?;
    let listener = TcpListener::bind(local_addr)
        .await
        .context(BindSnafu { addr: local_addr })?;
    tracing::debug!(%local_addr, "Waiting for the login callback");

    let (completion_tx, mut completion_rx) = oneshot::channel();
    let session = Arc::new(FlowSession::new(context, completion_tx));
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let app = router(Arc::clone(&session));
    let mut server: ServerHandle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let settlement = match browser.open(&login_url) {
        Ok(()) => {
            tokio::select! {
                received = &mut completion_rx => {
                    Settlement::Settled(received.unwrap_or(Err(FlowError::Abandoned)))
                }
                stopped = &mut server => Settlement::ServerStopped(stopped),
                () = interrupt() => {
                    tracing::info!("Login interrupted");
                    if session.revoke() {
                        Settlement::Settled(Err(FlowError::Interrupted))
                    } else {
                        // A callback handler claimed the attempt first. Its outcome wins.
                        match tokio::time::timeout(grace_period, &mut completion_rx).await {
                            Ok(Ok(result)) => Settlement::Settled(result),
                            Ok(Err(_)) | Err(_) => Settlement::Settled(Err(FlowError::Interrupted)),
                        }
                    }
                }
            }
        }
        Err(source) => {
            session.revoke();
            Settlement::Settled(Err(FlowError::BrowserLaunch {
                url: login_url,
                source,
            }))
        }
    };

    match settlement {
        Settlement::Settled(result) => {
            shutdown(shutdown_tx, server, grace_period).await;
            result
        }
        Settlement::ServerStopped(stopped) => {
            session.revoke();
            Err(match stopped {
                Ok(Ok(())) => FlowError::Serve {
                    source: std::io::Error::other("callback server stopped unexpectedly"),
                },
                Ok(Err(source)) => FlowError::Serve { source },
                Err(source) => FlowError::ServerTask { source },
            })
        }
    }
}

async fn shutdown(shutdown_tx: oneshot::Sender<()>, mut server: ServerHandle, grace_period: Duration) {
    let _ = shutdown_tx.send(());
    match tokio::time::timeout(grace_period, &mut server).await {
        Ok(Ok(Ok(()))) => tracing::debug!("Callback server stopped"),
        Ok(Ok(Err(err))) => tracing::warn!(?err, "Callback server failed while shutting down"),
        Ok(Err(err)) => tracing::warn!(?err, "Callback server task failed"),
        Err(_) => {
            tracing::warn!(?grace_period, "Callback server did not stop in time, aborting it");
            server.abort();
            let _ = server.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertr::prelude::*;
    use http::HeaderValue;

    #[test]
    fn flow_cookies_are_http_only_and_lax() {
        let cookie = flow_cookie(STATE_COOKIE, "abc", Duration::from_secs(3600), false);
        let parsed = Cookie::parse(cookie.as_str()).unwrap();

        assert_that(parsed.name()).is_equal_to("state");
        assert_that(parsed.value()).is_equal_to("abc");
        assert_that(parsed.http_only()).is_equal_to(Some(true));
        assert_that(parsed.secure()).is_equal_to(None);
        assert_that(parsed.same_site()).is_equal_to(Some(SameSite::Lax));
        assert_that(parsed.path()).is_equal_to(Some("/"));
        assert_that(parsed.max_age()).is_equal_to(Some(time::Duration::seconds(3600)));
    }

    #[test]
    fn flow_cookies_are_secure_over_tls() {
        let cookie = flow_cookie(NONCE_COOKIE, "abc", Duration::from_secs(60), true);
        assert_that(cookie.contains("Secure")).is_true();
    }

    #[test]
    fn reads_state_and_nonce_from_cookie_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; state=s1"));
        headers.append(COOKIE, HeaderValue::from_static("nonce=n1"));

        let cookies = flow_cookies(&headers);
        assert_that(cookies).is_equal_to(FlowCookies {
            state: Some("s1".to_owned()),
            nonce: Some("n1".to_owned()),
        });
    }

    #[test]
    fn missing_cookies_are_none() {
        assert_that(flow_cookies(&HeaderMap::new())).is_equal_to(FlowCookies::default());
    }
}
