use snafu::Snafu;

/// The operating system's random source could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("RandomnessError: Could not read from the OS random source: {message}"))]
pub struct RandomnessError {
    message: String,
}

/// Produces `N` bytes from the operating system's CSPRNG, base64 url encoded without padding.
pub(crate) fn random_url_safe_string<const N: usize>() -> Result<String, RandomnessError> {
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use rand::TryRngCore;

    let mut bytes = [0u8; N];
    rand::rngs::OsRng.try_fill_bytes(&mut bytes).map_err(|err| {
        RandomnessSnafu {
            message: err.to_string(),
        }
        .build()
    })?;

    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Cryptographically secure per-attempt values binding the authorization redirect to its callback.
///
/// `state` protects the callback against CSRF, `nonce` ties the returned ID token to this attempt.
/// Both use 32 bytes of random data, base64 url encoded as 43 character strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowState {
    state: String,
    nonce: String,
}

impl FlowState {
    pub fn generate() -> Result<Self, RandomnessError> {
        Ok(Self {
            state: random_url_safe_string::<32>()?,
            nonce: random_url_safe_string::<32>()?,
        })
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }
}
