#![allow(dead_code)]

use doit_auth::{InterruptFuture, InterruptSource, Options};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use std::{path::Path, sync::Arc, time::Duration};
use time::OffsetDateTime;

pub mod browser;
pub mod mock_idp;
pub mod tracing;

pub const CLIENT_ID: &str = "todo-app";
pub const KEY_ID: &str = "test-key";
pub const TEST_KEY_PEM: &str = include_str!("../fixtures/test_key.pem");
pub const TEST_JWKS_JSON: &str = include_str!("../fixtures/test_jwks.json");

pub fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Claims of an ID token for `jane`, valid for five minutes.
pub fn id_token_claims(issuer: &str, nonce: Option<&str>) -> serde_json::Value {
    let mut claims = serde_json::json!({
        "iss": issuer,
        "sub": "5c0ffee0-user",
        "aud": CLIENT_ID,
        "exp": now() + 300,
        "iat": now(),
        "name": "Jane Doe",
        "preferred_username": "jane",
        "email": "jane@example.com",
    });
    if let Some(nonce) = nonce {
        claims["nonce"] = serde_json::json!(nonce);
    }
    claims
}

pub fn expired_id_token_claims(issuer: &str) -> serde_json::Value {
    let mut claims = id_token_claims(issuer, None);
    claims["exp"] = serde_json::json!(now() - 3600);
    claims["iat"] = serde_json::json!(now() - 7200);
    claims
}

pub fn sign(claims: &serde_json::Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KEY_ID.to_owned());
    let key = EncodingKey::from_rsa_pem(TEST_KEY_PEM.as_bytes()).expect("valid test key");
    jsonwebtoken::encode(&header, claims, &key).expect("signable claims")
}

/// A port that was free a moment ago.
pub fn free_local_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bindable port");
    let addr = listener.local_addr().expect("bound address");
    format!("127.0.0.1:{}", addr.port())
}

pub fn options(issuer: &str, token_file: &Path, local_addr: &str) -> Options {
    let mut options = Options {
        client_id: CLIENT_ID.to_owned(),
        token_file: token_file.to_string_lossy().into_owned(),
        local_addr: local_addr.to_owned(),
        redirect_url: format!("http://{local_addr}/callback"),
        server_url: issuer.to_owned(),
        insecure_client: false,
        advanced: Default::default(),
    };
    options.advanced.request_timeout = Duration::from_secs(5);
    options.advanced.shutdown_grace_period = Duration::from_secs(2);
    options
}

pub fn never_interrupt() -> InterruptSource {
    Arc::new(|| -> InterruptFuture { Box::pin(std::future::pending::<()>()) })
}

pub fn interrupt_after(delay: Duration) -> InterruptSource {
    Arc::new(move || -> InterruptFuture { Box::pin(tokio::time::sleep(delay)) })
}
