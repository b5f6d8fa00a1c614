//! Moving the finished archive to remote storage.
//!
//! Authentication and storage are separate capabilities: the caller decides how a
//! [`Session`] is obtained ([`Authenticator`]) and where bytes go ([`RemoteStorage`]).
//! [`UploadClient`] ties them together and owns the session lifecycle: acquire once,
//! reuse, refresh when the session expires.

pub mod auth;
pub mod drive;

use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use auth::AuthConfig;
use chrono::{DateTime, TimeDelta, Utc};
use drive::{DriveConfig, DriveStorage};
use getset::Getters;
use serde::{Deserialize, Serialize};
use validator::Validate;

use std::path::Path;
use std::time::{Duration, Instant};

/// Sessions this close to their expiry are treated as expired already.
const EXPIRY_SKEW: TimeDelta = TimeDelta::seconds(30);

/// An authenticated session against the storage service.
#[derive(Clone, Debug, Getters)]
#[getset(get = "pub")]
pub struct Session {
    access_token: RedactedString,
    expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new<T: Into<RedactedString>>(access_token: T, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Utc::now() + EXPIRY_SKEW >= expires_at)
    }

    pub fn bearer_token(&self) -> &str {
        self.access_token.inner()
    }
}

/// Obtains a session, e.g. from a token cache or an OAuth refresh token.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self) -> Result<Session>;
}

/// Stores a local file remotely and returns the id the remote side assigned.
///
/// Implementations answer [`Error::SessionExpired`] when the session was rejected.
pub trait RemoteStorage: Send + Sync {
    fn put_file(&self, session: &Session, local_path: &Path) -> Result<String>;
}

#[derive(Clone, Debug, PartialEq, Eq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct UploadResult {
    remote_id: String,
    #[serde(with = "humantime_serde")]
    duration: Duration,
}

pub struct UploadClient {
    authenticator: Box<dyn Authenticator>,
    storage: Box<dyn RemoteStorage>,
}

impl UploadClient {
    pub fn new<A: Authenticator + 'static, S: RemoteStorage + 'static>(
        authenticator: A,
        storage: S,
    ) -> Self {
        Self {
            authenticator: Box::new(authenticator),
            storage: Box::new(storage),
        }
    }

    pub fn authenticate(&self) -> Result<Session> {
        tracing::info!("Authenticating with remote storage");
        self.authenticator.authenticate().map_err(|e| {
            if e.is_auth() {
                e
            } else {
                Error::auth(e.to_string())
            }
        })
    }

    pub fn upload(&self, session: &Session, local_path: &Path) -> Result<UploadResult> {
        tracing::info!("Uploading {:?}", local_path);
        let started = Instant::now();
        let remote_id = self.storage.put_file(session, local_path)?;
        let duration = started.elapsed();
        tracing::info!("Uploaded {:?} as {} in {:?}", local_path, remote_id, duration);
        Ok(UploadResult {
            remote_id,
            duration,
        })
    }

    /// Uploads with `session`, re-authenticating first if it already expired and once
    /// more if the storage rejects it mid-flight.
    pub fn upload_with_refresh(
        &self,
        session: &mut Session,
        local_path: &Path,
    ) -> Result<UploadResult> {
        if session.is_expired() {
            tracing::info!("Session expired, re-authenticating");
            *session = self.authenticate()?;
        }

        match self.upload(session, local_path) {
            Err(e) if e.is_session_expired() => {
                tracing::info!("Storage rejected the session, re-authenticating");
                *session = self.authenticate()?;
                self.upload(session, local_path)
            }
            res => res,
        }
    }
}

/// Where and how to upload the finished archive.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct UploadConfig {
    auth: AuthConfig,
    #[serde(default)]
    drive: DriveConfig,
}

impl UploadConfig {
    pub fn new(auth: AuthConfig, drive: DriveConfig) -> Self {
        Self { auth, drive }
    }

    /// Validates the nested auth and drive sections.
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        self.auth.validate()?;
        self.drive.validate()?;
        Ok(())
    }

    pub fn build_client(&self) -> Result<UploadClient> {
        let storage = DriveStorage::new(self.drive.clone())?;
        Ok(match &self.auth {
            AuthConfig::AccessToken(inner) => UploadClient::new(inner.clone(), storage),
            AuthConfig::RefreshToken(inner) => UploadClient::new(inner.build()?, storage),
        })
    }
}
