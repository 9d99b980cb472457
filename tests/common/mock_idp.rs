//! An authorization server good enough to drive the login flow: discovery, authorization,
//! token and JWKS endpoints of a single realm. ID tokens are signed with the fixture key.

use super::{CLIENT_ID, KEY_ID, TEST_JWKS_JSON, id_token_claims, sign};
use axum::{
    Form, Json, Router,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use http::StatusCode;
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{net::TcpListener, task::JoinHandle};
use tower_http::trace::TraceLayer;
use url::Url;

pub struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Debug, Clone)]
pub struct IdpConfig {
    pub code_challenge_methods_supported: Vec<String>,
    /// Answer refresh requests with `invalid_grant`.
    pub reject_refresh: bool,
    /// Put this nonce into issued ID tokens instead of the requested one.
    pub nonce_override: Option<String>,
    /// Key id published in the JWK set. Tokens are always signed with [`KEY_ID`].
    pub published_kid: String,
    /// Issue refreshed ID tokens for this audience instead of [`CLIENT_ID`].
    pub refresh_audience: Option<String>,
    /// Leave refresh requests unanswered for longer than any client timeout used in tests.
    pub stall_refresh: bool,
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self {
            code_challenge_methods_supported: vec!["plain".to_owned(), "S256".to_owned()],
            reject_refresh: false,
            nonce_override: None,
            published_kid: KEY_ID.to_owned(),
            refresh_audience: None,
            stall_refresh: false,
        }
    }
}

#[derive(Debug, Clone)]
struct IssuedCode {
    nonce: Option<String>,
    code_challenge: Option<String>,
    redirect_uri: String,
}

#[derive(Default)]
pub struct Counters {
    pub discovery: AtomicUsize,
    pub authorization: AtomicUsize,
    pub code_exchange: AtomicUsize,
    pub refresh: AtomicUsize,
    pub jwks: AtomicUsize,
}

impl Counters {
    pub fn token_requests(&self) -> usize {
        self.code_exchange.load(Ordering::SeqCst) + self.refresh.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.discovery.load(Ordering::SeqCst)
            + self.authorization.load(Ordering::SeqCst)
            + self.token_requests()
            + self.jwks.load(Ordering::SeqCst)
    }
}

pub struct IdpState {
    pub issuer: String,
    pub config: Mutex<IdpConfig>,
    pub counters: Counters,
    /// Query parameters of every authorization request.
    pub authorization_requests: Mutex<Vec<HashMap<String, String>>>,
    /// The `code_verifier` sent with each code exchange.
    pub received_verifiers: Mutex<Vec<Option<String>>>,
    codes: Mutex<HashMap<String, IssuedCode>>,
}

pub struct MockIdp {
    pub issuer: String,
    pub state: Arc<IdpState>,
    _server: AbortOnDrop<()>,
}

impl MockIdp {
    pub async fn start(config: IdpConfig) -> MockIdp {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bindable port");
        let addr = listener.local_addr().expect("bound address");
        let issuer = format!("http://{addr}/realms/todoapp");

        let state = Arc::new(IdpState {
            issuer: issuer.clone(),
            config: Mutex::new(config),
            counters: Counters::default(),
            authorization_requests: Mutex::new(Vec::new()),
            received_verifiers: Mutex::new(Vec::new()),
            codes: Mutex::new(HashMap::new()),
        });

        let router = Router::new()
            .route(
                "/realms/todoapp/.well-known/openid-configuration",
                get(discovery),
            )
            .route("/realms/todoapp/protocol/openid-connect/auth", get(authorize))
            .route("/realms/todoapp/protocol/openid-connect/token", post(token))
            .route("/realms/todoapp/protocol/openid-connect/certs", get(certs))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("mock IdP to serve");
        });

        MockIdp {
            issuer,
            state,
            _server: AbortOnDrop(handle),
        }
    }

    pub fn configure(&self, f: impl FnOnce(&mut IdpConfig)) {
        f(&mut self.state.config.lock().unwrap());
    }

    pub fn counters(&self) -> &Counters {
        &self.state.counters
    }

    pub fn authorization_requests(&self) -> Vec<HashMap<String, String>> {
        self.state.authorization_requests.lock().unwrap().clone()
    }

    pub fn received_verifiers(&self) -> Vec<Option<String>> {
        self.state.received_verifiers.lock().unwrap().clone()
    }
}

async fn discovery(State(state): State<Arc<IdpState>>) -> Json<serde_json::Value> {
    state.counters.discovery.fetch_add(1, Ordering::SeqCst);
    let methods = state
        .config
        .lock()
        .unwrap()
        .code_challenge_methods_supported
        .clone();
    let issuer = &state.issuer;
    Json(serde_json::json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/protocol/openid-connect/auth"),
        "token_endpoint": format!("{issuer}/protocol/openid-connect/token"),
        "jwks_uri": format!("{issuer}/protocol/openid-connect/certs"),
        "end_session_endpoint": format!("{issuer}/protocol/openid-connect/logout"),
        "response_types_supported": ["code"],
        "code_challenge_methods_supported": methods,
    }))
}

async fn authorize(
    State(state): State<Arc<IdpState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let n = state.counters.authorization.fetch_add(1, Ordering::SeqCst);
    state
        .authorization_requests
        .lock()
        .unwrap()
        .push(params.clone());

    if params.get("client_id").map(String::as_str) != Some(CLIENT_ID) {
        return (StatusCode::BAD_REQUEST, "unknown client").into_response();
    }
    let Some(redirect_uri) = params.get("redirect_uri") else {
        return (StatusCode::BAD_REQUEST, "missing redirect_uri").into_response();
    };

    let code = format!("code-{n}");
    state.codes.lock().unwrap().insert(
        code.clone(),
        IssuedCode {
            nonce: params.get("nonce").cloned(),
            code_challenge: params.get("code_challenge").cloned(),
            redirect_uri: redirect_uri.clone(),
        },
    );

    let mut callback = Url::parse(redirect_uri).expect("valid redirect_uri");
    callback.query_pairs_mut().append_pair("code", &code);
    if let Some(client_state) = params.get("state") {
        callback.query_pairs_mut().append_pair("state", client_state);
    }
    Redirect::to(callback.as_str()).into_response()
}

fn token_error(error: &str, description: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": error,
            "error_description": description,
        })),
    )
        .into_response()
}

async fn token(
    State(state): State<Arc<IdpState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if form.get("client_id").map(String::as_str) != Some(CLIENT_ID) {
        return token_error("invalid_client", "Invalid client credentials");
    }
    let config = state.config.lock().unwrap().clone();

    match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") => {
            let n = state.counters.code_exchange.fetch_add(1, Ordering::SeqCst);
            let verifier = form.get("code_verifier").cloned();
            state
                .received_verifiers
                .lock()
                .unwrap()
                .push(verifier.clone());

            let issued = form
                .get("code")
                .and_then(|code| state.codes.lock().unwrap().remove(code));
            let Some(issued) = issued else {
                return token_error("invalid_grant", "Code not valid");
            };
            if form.get("redirect_uri") != Some(&issued.redirect_uri) {
                return token_error("invalid_grant", "Incorrect redirect_uri");
            }
            if let Some(challenge) = &issued.code_challenge {
                let computed = verifier
                    .as_deref()
                    .map(|it| URL_SAFE_NO_PAD.encode(Sha256::digest(it.as_bytes())));
                if computed.as_ref() != Some(challenge) {
                    return token_error("invalid_grant", "PKCE verification failed");
                }
            }

            let nonce = config.nonce_override.or(issued.nonce);
            let id_token = sign(&id_token_claims(&state.issuer, nonce.as_deref()));
            Json(serde_json::json!({
                "access_token": format!("access-{n}"),
                "expires_in": 300,
                "refresh_expires_in": 1800,
                "refresh_token": format!("refresh-{n}"),
                "token_type": "Bearer",
                "id_token": id_token,
                "scope": "openid profile email",
            }))
            .into_response()
        }
        Some("refresh_token") => {
            let n = state.counters.refresh.fetch_add(1, Ordering::SeqCst);
            if config.stall_refresh {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if config.reject_refresh || form.get("refresh_token").is_none() {
                return token_error("invalid_grant", "Token is not active");
            }
            // Keycloak-style refresh without rotation: no new refresh token.
            let mut claims = id_token_claims(&state.issuer, None);
            if let Some(audience) = config.refresh_audience {
                claims["aud"] = serde_json::json!(audience);
            }
            let id_token = sign(&claims);
            Json(serde_json::json!({
                "access_token": format!("refreshed-access-{n}"),
                "expires_in": 300,
                "token_type": "Bearer",
                "id_token": id_token,
            }))
            .into_response()
        }
        _ => token_error("unsupported_grant_type", "Unsupported grant type"),
    }
}

async fn certs(State(state): State<Arc<IdpState>>) -> Json<serde_json::Value> {
    state.counters.jwks.fetch_add(1, Ordering::SeqCst);
    let published_kid = state.config.lock().unwrap().published_kid.clone();
    let mut jwks: serde_json::Value =
        serde_json::from_str(TEST_JWKS_JSON).expect("valid JWKS fixture");
    jwks["keys"][0]["kid"] = serde_json::json!(published_kid);
    Json(jwks)
}
