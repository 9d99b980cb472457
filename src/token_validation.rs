use crate::{
    JwkSetEndpoint,
    discovery::AuthorizationServerMetadata,
    request::{self, RequestError},
    token_claims::{IdentityClaims, StandardIdTokenClaims},
};
use jsonwebtoken::{Algorithm, errors::ErrorKind, jwk::JwkSet};
use snafu::{ResultExt, Snafu};
use std::{
    sync::{Mutex, PoisonError, RwLock},
    time::{Duration, Instant},
};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Snafu)]
pub enum VerifyError {
    #[snafu(display("VerifyError: Token is malformed"))]
    Malformed { source: jsonwebtoken::errors::Error },

    #[snafu(display("VerifyError: Signing algorithm {alg:?} is not accepted"))]
    UnsupportedAlgorithm { alg: Algorithm },

    #[snafu(display(
        "VerifyError: Could not find a JWK which would match the tokens 'kid': {token_kid:?}"
    ))]
    UnknownKey { token_kid: Option<String> },

    #[snafu(display("VerifyError: Could not construct DecodingKey from JWK"))]
    UnusableKey { source: jsonwebtoken::errors::Error },

    #[snafu(display("VerifyError: Signature is invalid"))]
    InvalidSignature { source: jsonwebtoken::errors::Error },

    #[snafu(display("VerifyError: Token has expired"))]
    Expired,

    #[snafu(display("VerifyError: Token is not valid yet"))]
    NotYetValid,

    #[snafu(display("VerifyError: Token was issued in the future (iat: {iat})"))]
    IssuedInFuture { iat: i64 },

    #[snafu(display("VerifyError: Audience does not contain '{expected}'"))]
    AudienceMismatch { expected: String },

    #[snafu(display("VerifyError: Issuer is not '{expected}'"))]
    IssuerMismatch { expected: String },

    #[snafu(display("VerifyError: Required claim '{claim}' is missing"))]
    MissingClaim { claim: String },
}

impl VerifyError {
    /// The token was tampered with or was minted for someone else.
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            VerifyError::InvalidSignature { .. }
                | VerifyError::UnsupportedAlgorithm { .. }
                | VerifyError::AudienceMismatch { .. }
                | VerifyError::IssuerMismatch { .. }
        )
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, VerifyError::Expired)
    }

    fn from_decode_error(
        err: jsonwebtoken::errors::Error,
        expected_issuer: &str,
        expected_audience: &str,
    ) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                VerifyError::InvalidSignature { source: err }
            }
            ErrorKind::ExpiredSignature => VerifyError::Expired,
            ErrorKind::ImmatureSignature => VerifyError::NotYetValid,
            ErrorKind::InvalidAudience => VerifyError::AudienceMismatch {
                expected: expected_audience.to_owned(),
            },
            ErrorKind::InvalidIssuer => VerifyError::IssuerMismatch {
                expected: expected_issuer.to_owned(),
            },
            // `exp`, `iss` and `aud` are structural. Only identity claims count as missing.
            _ => VerifyError::Malformed { source: err },
        }
    }
}

#[derive(Debug, Clone)]
struct KeySource {
    http_client: reqwest::Client,
    jwks_uri: JwkSetEndpoint,
}

/// Verifies raw ID tokens against the key set of the authorization server.
///
/// Verification itself never touches the network. It works on the key set held in memory,
/// which is fetched on construction and only re-fetched through
/// [`Verifier::verify_or_refresh_keys`] when a token references an unknown key. Such re-fetches
/// happen at most once per [`Verifier::with_min_key_refresh_interval`].
#[derive(Debug)]
pub struct Verifier {
    issuer: String,
    jwk_set: RwLock<JwkSet>,
    key_source: Option<KeySource>,
    leeway: Duration,
    min_key_refresh_interval: Duration,
    last_key_refresh: Mutex<Option<Instant>>,
}

impl Verifier {
    /// Default tolerated clock skew.
    pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(60);

    /// Default minimum time between two key set re-fetches triggered by unknown keys.
    pub const DEFAULT_MIN_KEY_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

    /// Fetches the key set advertised by `metadata`.
    pub async fn discover_keys(
        http_client: reqwest::Client,
        metadata: &AuthorizationServerMetadata,
    ) -> Result<Self, RequestError> {
        let jwk_set = request::retrieve_jwk_set(&http_client, &metadata.jwks_uri).await?;
        Ok(Self {
            issuer: metadata.issuer.clone(),
            jwk_set: RwLock::new(jwk_set),
            key_source: Some(KeySource {
                http_client,
                jwks_uri: metadata.jwks_uri.clone(),
            }),
            leeway: Self::DEFAULT_LEEWAY,
            min_key_refresh_interval: Self::DEFAULT_MIN_KEY_REFRESH_INTERVAL,
            last_key_refresh: Mutex::new(None),
        })
    }

    /// A verifier over a fixed key set. It never refreshes its keys.
    pub fn from_jwk_set(issuer: impl Into<String>, jwk_set: JwkSet) -> Self {
        Self {
            issuer: issuer.into(),
            jwk_set: RwLock::new(jwk_set),
            key_source: None,
            leeway: Self::DEFAULT_LEEWAY,
            min_key_refresh_interval: Self::DEFAULT_MIN_KEY_REFRESH_INTERVAL,
            last_key_refresh: Mutex::new(None),
        }
    }

    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Tokens with unknown keys arrive unauthenticated, so re-fetches they trigger are
    /// rate limited to one per `interval`.
    pub fn with_min_key_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_key_refresh_interval = interval;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Validates signature, `exp`, `iat`, `iss` and that `aud` contains `expected_audience`, then
    /// projects the identity claims.
    pub fn verify(
        &self,
        raw_id_token: &str,
        expected_audience: &str,
    ) -> Result<IdentityClaims, VerifyError> {
        let jwt_header = jsonwebtoken::decode_header(raw_id_token).context(MalformedSnafu {})?;

        tracing::trace!(?jwt_header, "Decoded JWT header");

        if matches!(
            jwt_header.alg,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return UnsupportedAlgorithmSnafu { alg: jwt_header.alg }.fail();
        }

        let jwt_decoding_key = {
            let jwk_set = self.jwk_set.read().unwrap_or_else(PoisonError::into_inner);
            let jwk = jwk_set
                .keys
                .iter()
                .find(|it| it.common.key_id == jwt_header.kid)
                .ok_or_else(|| {
                    UnknownKeySnafu {
                        token_kid: jwt_header.kid.clone(),
                    }
                    .build()
                })?;
            jsonwebtoken::DecodingKey::from_jwk(jwk).context(UnusableKeySnafu {})?
        };

        let mut validation = jsonwebtoken::Validation::new(jwt_header.alg);
        validation.set_audience(&[expected_audience]);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = self.leeway.as_secs();

        let token_data = jsonwebtoken::decode::<StandardIdTokenClaims>(
            raw_id_token,
            &jwt_decoding_key,
            &validation,
        )
        .map_err(|err| VerifyError::from_decode_error(err, &self.issuer, expected_audience))?;

        let raw_claims: StandardIdTokenClaims = token_data.claims;

        let latest_acceptable_iat =
            latest_acceptable_iat(OffsetDateTime::now_utc().unix_timestamp(), self.leeway);
        if raw_claims.iat > latest_acceptable_iat {
            return IssuedInFutureSnafu {
                iat: raw_claims.iat,
            }
            .fail();
        }

        let claims = IdentityClaims::try_from(raw_claims).map_err(|err| {
            MissingClaimSnafu {
                claim: err.claim,
            }
            .build()
        })?;
        tracing::trace!(subject = %claims.subject, "Verified ID token");
        Ok(claims)
    }

    /// Like [`Verifier::verify`], but re-fetches the key set once if the token references a key
    /// we do not know yet. This handles key rotation on the authorization server.
    ///
    /// Within the minimum refresh interval of the last such re-fetch, the `UnknownKey` error is
    /// returned without contacting the authorization server.
    pub async fn verify_or_refresh_keys(
        &self,
        raw_id_token: &str,
        expected_audience: &str,
    ) -> Result<IdentityClaims, VerifyError> {
        match self.verify(raw_id_token, expected_audience) {
            Err(err @ VerifyError::UnknownKey { .. }) if self.key_source.is_some() => {
                if !self.claim_key_refresh() {
                    tracing::debug!("JWK set was re-fetched recently, not fetching it again");
                    return Err(err);
                }
                if let Err(refresh_err) = self.refresh_keys().await {
                    tracing::warn!(?refresh_err, "Could not refresh JWK set");
                    return Err(err);
                }
                self.verify(raw_id_token, expected_audience)
            }
            other => other,
        }
    }

    fn claim_key_refresh(&self) -> bool {
        let mut last = self
            .last_key_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if last.is_some_and(|at| now.duration_since(at) < self.min_key_refresh_interval) {
            return false;
        }
        *last = Some(now);
        true
    }

    /// Re-fetches the key set. Does nothing for verifiers created with
    /// [`Verifier::from_jwk_set`].
    pub async fn refresh_keys(&self) -> Result<(), RequestError> {
        let Some(key_source) = &self.key_source else {
            return Ok(());
        };
        let jwk_set =
            request::retrieve_jwk_set(&key_source.http_client, &key_source.jwks_uri).await?;
        *self.jwk_set.write().unwrap_or_else(PoisonError::into_inner) = jwk_set;
        Ok(())
    }
}

fn latest_acceptable_iat(now: i64, leeway: Duration) -> i64 {
    now.saturating_add(i64::try_from(leeway.as_secs()).unwrap_or(i64::MAX))
}
