use crate::flow_state::{RandomnessError, random_url_safe_string};

/// A PKCE code verifier. Only ever held in memory for the duration of one login attempt.
///
/// Not serializable. `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct CodeVerifier {
    code_verifier: String,
}

impl std::fmt::Debug for CodeVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeVerifier")
            .field("code_verifier", &"<redacted>")
            .finish()
    }
}

impl CodeVerifier {
    /// 32 random bytes, base64 url encoded without padding, giving the minimal verifier length
    /// of 43 characters.
    ///
    /// see: https://datatracker.ietf.org/doc/html/rfc7636#section-4.1
    pub(crate) fn generate() -> Result<Self, RandomnessError> {
        Ok(Self {
            code_verifier: random_url_safe_string::<32>()?,
        })
    }

    pub(crate) fn to_code_challenge(&self) -> CodeChallenge {
        use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
        use sha2::Digest;

        let mut hasher = sha2::Sha256::new();
        hasher.update(self.code_verifier.as_bytes());
        let digest = hasher.finalize();

        CodeChallenge {
            code_challenge: URL_SAFE_NO_PAD.encode(digest),
            code_challenge_method: CodeChallengeMethod::S256,
        }
    }

    pub(crate) fn code_verifier(&self) -> &str {
        self.code_verifier.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChallengeMethod {
    S256,
}

impl CodeChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeChallengeMethod::S256 => "S256",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeChallenge {
    code_challenge: String,
    code_challenge_method: CodeChallengeMethod,
}

impl CodeChallenge {
    pub fn code_challenge(&self) -> &str {
        self.code_challenge.as_str()
    }

    pub fn code_challenge_method(&self) -> CodeChallengeMethod {
        self.code_challenge_method
    }
}

/// PKCE parameters for a single login attempt.
///
/// `None` is used when the authorization server does not advertise `S256`. The authorization
/// request then carries no PKCE parameters at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PkceParams {
    None,
    S256 {
        verifier: CodeVerifier,
        challenge: CodeChallenge,
    },
}

impl PkceParams {
    /// Creates fresh parameters given the `code_challenge_methods_supported` list of the
    /// authorization server. The `plain` method is never used.
    pub fn new(supported_methods: &[String]) -> Result<Self, RandomnessError> {
        let s256 = CodeChallengeMethod::S256.as_str();
        if !supported_methods.iter().any(|method| method == s256) {
            return Ok(Self::None);
        }

        let verifier = CodeVerifier::generate()?;
        let challenge = verifier.to_code_challenge();
        Ok(Self::S256 {
            verifier,
            challenge,
        })
    }

    pub fn method(&self) -> Option<CodeChallengeMethod> {
        self.challenge().map(CodeChallenge::code_challenge_method)
    }

    pub fn challenge(&self) -> Option<&CodeChallenge> {
        match self {
            PkceParams::None => None,
            PkceParams::S256 { challenge, .. } => Some(challenge),
        }
    }

    pub(crate) fn verifier(&self) -> Option<&CodeVerifier> {
        match self {
            PkceParams::None => None,
            PkceParams::S256 { verifier, .. } => Some(verifier),
        }
    }

    /// Query parameters to append to the authorization request.
    pub(crate) fn authorization_params(&self) -> Vec<(&'static str, &str)> {
        match self.challenge() {
            None => Vec::new(),
            Some(challenge) => vec![
                ("code_challenge", challenge.code_challenge()),
                (
                    "code_challenge_method",
                    challenge.code_challenge_method().as_str(),
                ),
            ],
        }
    }
}
