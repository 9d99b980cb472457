use serde::Deserialize;
use snafu::{OptionExt, Snafu};
use std::{path::PathBuf, time::Duration};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum OptionsError {
    #[snafu(display("OptionsError: 'client-id' must not be empty"))]
    EmptyClientId,

    #[snafu(display("OptionsError: '{option}' is not a valid URL: {value}"))]
    InvalidUrl {
        option: &'static str,
        value: String,
        source: url::ParseError,
    },

    #[snafu(display("OptionsError: '{option}' must use http or https: {value}"))]
    UnsupportedScheme { option: &'static str, value: String },

    #[snafu(display("OptionsError: 'redirect-url' must point to the '/callback' path: {value}"))]
    RedirectPath { value: String },

    #[snafu(display("OptionsError: 'local-addr' must be of the form host:port: {value}"))]
    InvalidLocalAddr { value: String },

    #[snafu(display("OptionsError: Could not determine the home directory of the current user"))]
    NoHomeDirectory,

    #[snafu(display("OptionsError: 'token-file' references unset environment variable '{name}'"))]
    UnsetVariable { name: String },
}

/// User-facing configuration of the token provider.
///
/// Keys mirror the command line flags of the CLI (`client-id`, `token-file`, `local-addr`,
/// `redirect-url`, `server-url`, `insecure-client`). Every key is optional when deserializing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Options {
    /// The client id issued by the authorization server that represents this application.
    /// Defaults to `todo-app`.
    pub client_id: String,

    /// The path to the file holding the tokens. Environment variables and a leading `~` are
    /// expanded by [`Options::complete`].
    /// Defaults to `$HOME/.config/doit/oidc-token`.
    pub token_file: String,

    /// The local address the login flow listens on while waiting for the redirect.
    /// Defaults to `localhost:8080`.
    pub local_addr: String,

    /// The callback URL registered with the authorization server.
    /// Defaults to `http://localhost:8080/callback`.
    pub redirect_url: String,

    /// The issuer URL of the authorization server.
    /// Defaults to `https://localhost/realms/todoapp`.
    pub server_url: String,

    /// Skip TLS certificate validation for calls to the authorization server.
    /// Defaults to `false`.
    pub insecure_client: bool,

    #[serde(skip)]
    pub advanced: AdvancedOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            client_id: "todo-app".to_owned(),
            token_file: "$HOME/.config/doit/oidc-token".to_owned(),
            local_addr: "localhost:8080".to_owned(),
            redirect_url: "http://localhost:8080/callback".to_owned(),
            server_url: "https://localhost/realms/todoapp".to_owned(),
            insecure_client: false,
            advanced: AdvancedOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdvancedOptions {
    /// Timeout for every request to the authorization server.
    /// Defaults to `Duration::from_secs(30)`.
    pub request_timeout: Duration,

    /// How long the local callback server may take to shut down gracefully before it is aborted.
    /// Defaults to `Duration::from_secs(5)`.
    pub shutdown_grace_period: Duration,

    /// Max age of the `state` and `nonce` cookies.
    /// Defaults to `Duration::from_secs(60 * 60)`.
    pub flow_cookie_max_age: Duration,

    /// Tolerated clock skew when validating `exp` and `iat`.
    /// Defaults to `Duration::from_secs(60)`.
    pub clock_leeway: Duration,

    /// Minimum time between two key set re-fetches caused by tokens referencing unknown keys.
    /// Defaults to `Duration::from_secs(30)`.
    pub min_jwk_set_refresh_interval: Duration,

    /// Scopes requested in addition to `openid profile email`.
    /// Defaults to none.
    pub additional_scopes: Vec<String>,

    /// Refuse to log in when the authorization server does not support `S256` PKCE, instead of
    /// continuing without PKCE.
    /// Defaults to `false`.
    pub require_pkce: bool,
}

impl Default for AdvancedOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            shutdown_grace_period: Duration::from_secs(5),
            flow_cookie_max_age: Duration::from_secs(60 * 60),
            clock_leeway: Duration::from_secs(60),
            min_jwk_set_refresh_interval: Duration::from_secs(30),
            additional_scopes: Vec::new(),
            require_pkce: false,
        }
    }
}

/// Options after [`Options::complete`] and [`Options::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedOptions {
    pub client_id: String,
    pub token_file: PathBuf,
    pub local_addr: String,
    pub redirect_url: Url,
    pub issuer_url: Url,
    pub insecure_client: bool,
    pub advanced: AdvancedOptions,
}

impl Options {
    /// Expands environment variables and `~` in the token file path, falling back to
    /// `~/.config/doit/oidc-token` when it is empty.
    pub fn complete(mut self) -> Result<Self, OptionsError> {
        if self.token_file.trim().is_empty() {
            let dirs = directories::BaseDirs::new().context(NoHomeDirectorySnafu {})?;
            self.token_file = dirs
                .home_dir()
                .join(".config")
                .join("doit")
                .join("oidc-token")
                .to_string_lossy()
                .into_owned();
        } else {
            self.token_file = shellexpand::full(&self.token_file)
                .map_err(|err| OptionsError::UnsetVariable {
                    name: err.var_name,
                })?
                .into_owned();
        }
        Ok(self)
    }

    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Vec<OptionsError> {
        let mut errors = Vec::new();

        if self.client_id.trim().is_empty() {
            errors.push(OptionsError::EmptyClientId);
        }

        match parse_http_url("redirect-url", &self.redirect_url) {
            Ok(url) if url.path() != "/callback" => errors.push(OptionsError::RedirectPath {
                value: self.redirect_url.clone(),
            }),
            Ok(_) => {}
            Err(err) => errors.push(err),
        }

        if let Err(err) = parse_http_url("server-url", &self.server_url) {
            errors.push(err);
        }

        if !is_host_port(&self.local_addr) {
            errors.push(OptionsError::InvalidLocalAddr {
                value: self.local_addr.clone(),
            });
        }

        errors
    }

    /// Completes and validates the options. The first validation error is returned.
    pub fn into_completed(self) -> Result<CompletedOptions, OptionsError> {
        let options = self.complete()?;
        if let Some(err) = options.validate().into_iter().next() {
            return Err(err);
        }

        Ok(CompletedOptions {
            redirect_url: parse_http_url("redirect-url", &options.redirect_url)?,
            issuer_url: parse_http_url("server-url", &options.server_url)?,
            client_id: options.client_id,
            token_file: PathBuf::from(options.token_file),
            local_addr: options.local_addr,
            insecure_client: options.insecure_client,
            advanced: options.advanced,
        })
    }
}

fn parse_http_url(option: &'static str, value: &str) -> Result<Url, OptionsError> {
    let url = Url::parse(value).map_err(|source| OptionsError::InvalidUrl {
        option,
        value: value.to_owned(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => UnsupportedSchemeSnafu { option, value }.fail(),
    }
}

fn is_host_port(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
