use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;
use crate::backup::upload::{Authenticator, Session};
use chrono::{DateTime, TimeDelta, Utc};
use derive_more::From;
use function_name::named;
use getset::Getters;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::result;
use std::time::Duration;
use validator::{Validate, ValidationError, ValidationErrors};

static DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "auth_type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum AuthConfig {
    AccessToken(AccessTokenAuthenticator),
    RefreshToken(RefreshTokenConfig),
}

impl Validate for AuthConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            AuthConfig::AccessToken(inner) => inner.validate(),
            AuthConfig::RefreshToken(inner) => inner.validate(),
        }
    }
}

fn validate_secret(secret: &RedactedString) -> result::Result<(), ValidationError> {
    if secret.inner().trim().is_empty() {
        return Err(ValidationError::new("empty_secret").with_message("Secret must not be empty".into()));
    }
    Ok(())
}

/// A token obtained out of band, used as is until it expires.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct AccessTokenAuthenticator {
    #[validate(custom(function = validate_secret))]
    token: RedactedString,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessTokenAuthenticator {
    pub fn new<T: Into<RedactedString>>(token: T, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }
}

impl Authenticator for AccessTokenAuthenticator {
    fn authenticate(&self) -> Result<Session> {
        let session = Session::new(self.token.clone(), self.expires_at);
        if session.is_expired() {
            return Err(Error::auth("configured access token has expired"));
        }
        Ok(session)
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct RefreshTokenConfig {
    #[validate(length(min = 1))]
    client_id: String,
    #[validate(custom(function = validate_secret))]
    client_secret: RedactedString,
    #[validate(custom(function = validate_secret))]
    refresh_token: RedactedString,
    #[validate(url)]
    token_url: Option<String>,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
}

impl RefreshTokenConfig {
    pub fn new<S: Into<String>, C: Into<RedactedString>, R: Into<RedactedString>>(
        client_id: S,
        client_secret: C,
        refresh_token: R,
        token_url: Option<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
            token_url,
            timeout: None,
        }
    }

    pub fn token_url_or_default(&self) -> &str {
        self.token_url.as_deref().unwrap_or(DEFAULT_TOKEN_URL)
    }

    pub fn build(&self) -> Result<RefreshTokenAuthenticator> {
        let client = Client::builder()
            .timeout(self.timeout.unwrap_or(DEFAULT_TOKEN_TIMEOUT))
            .build()?;
        Ok(RefreshTokenAuthenticator {
            config: self.clone(),
            client,
        })
    }
}

/// Trades an OAuth refresh token for a short-lived access token on every call.
pub struct RefreshTokenAuthenticator {
    config: RefreshTokenConfig,
    client: Client,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: RedactedString,
    expires_in: Option<i64>,
}

impl Authenticator for RefreshTokenAuthenticator {
    #[named]
    fn authenticate(&self) -> Result<Session> {
        self.exchange().add_fn_name(function_path!())
    }
}

impl RefreshTokenAuthenticator {
    fn exchange(&self) -> Result<Session> {
        let url = self.config.token_url_or_default();
        tracing::debug!("Requesting access token from {}", url);
        let response = self
            .client
            .post(url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.inner().as_str()),
                ("refresh_token", self.config.refresh_token.inner().as_str()),
            ])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::auth(format!("token endpoint answered {status}: {body}")));
        }

        let token: TokenResponse = response.json()?;
        let expires_at = token
            .expires_in
            .map(|secs| Utc::now() + TimeDelta::seconds(secs));
        Ok(Session::new(token.access_token, expires_at))
    }
}
