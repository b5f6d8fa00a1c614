use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::upload::{RemoteStorage, Session};
use crate::backup::validate::validate_valid_file_name;
use function_name::named;
use getset::Getters;
use reqwest::blocking::{Body, Client, Response};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use validator::Validate;

use std::fs::File;
use std::path::Path;
use std::time::Duration;

static DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com";
static OCTET_STREAM: &str = "application/octet-stream";
const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct DriveConfig {
    #[validate(url)]
    api_base_url: Option<String>,
    /// Parent folder of the uploaded file, the drive root if unset
    folder_id: Option<String>,
    /// Name of the remote file, the archive's file name if unset
    #[validate(custom(function = validate_valid_file_name))]
    remote_name: Option<String>,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
}

impl DriveConfig {
    pub fn new(api_base_url: Option<String>, folder_id: Option<String>) -> Self {
        Self {
            api_base_url,
            folder_id,
            ..Default::default()
        }
    }

    pub fn with_remote_name<S: Into<String>>(mut self, remote_name: S) -> Self {
        self.remote_name = Some(remote_name.into());
        self
    }

    fn base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/')
    }
}

#[skip_serializing_none]
#[derive(Serialize)]
struct FileMetadata<'a> {
    name: &'a str,
    parents: Option<[&'a str; 1]>,
}

#[derive(Deserialize)]
struct CreatedFile {
    id: String,
}

/// Google Drive v3 storage using the resumable upload protocol.
///
/// The first request announces the file and returns a session URI in `Location`;
/// the second streams the bytes to that URI.
pub struct DriveStorage {
    client: Client,
    config: DriveConfig,
}

impl DriveStorage {
    pub fn new(config: DriveConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout.unwrap_or(DEFAULT_UPLOAD_TIMEOUT))
            .build()?;
        Ok(Self { client, config })
    }

    fn remote_name<'a>(&'a self, local_path: &'a Path) -> Result<&'a str> {
        if let Some(name) = self.config.remote_name.as_deref() {
            return Ok(name);
        }
        local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::invalid_job(format!("{local_path:?} has no usable file name")))
    }

    fn start_session(&self, session: &Session, name: &str, len: u64) -> Result<String> {
        let url = format!(
            "{}/upload/drive/v3/files?uploadType=resumable",
            self.config.base_url()
        );
        let metadata = FileMetadata {
            name,
            parents: self.config.folder_id.as_deref().map(|id| [id]),
        };
        tracing::debug!("Starting resumable upload of {} bytes as {:?}", len, name);

        let response = self
            .client
            .post(url)
            .bearer_auth(session.bearer_token())
            .header("X-Upload-Content-Type", OCTET_STREAM)
            .header("X-Upload-Content-Length", len)
            .json(&metadata)
            .send()?;
        let response = check_status(response)?;
        let status = response.status().as_u16();
        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| Error::upload_rejected(status, "response carries no upload session URI"))
    }

    fn send_content(&self, session: &Session, session_uri: &str, file: File, len: u64) -> Result<String> {
        let response = self
            .client
            .put(session_uri)
            .bearer_auth(session.bearer_token())
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(Body::sized(file, len))
            .send()?;
        let created: CreatedFile = check_status(response)?.json()?;
        Ok(created.id)
    }
}

impl RemoteStorage for DriveStorage {
    #[named]
    fn put_file(&self, session: &Session, local_path: &Path) -> Result<String> {
        (|| -> Result<String> {
            let file = File::open(local_path)?;
            let len = file.metadata()?.len();
            let name = self.remote_name(local_path)?;
            let session_uri = self.start_session(session, name, len)?;
            self.send_content(session, &session_uri, file, len)
        })()
        .add_msg(format!("Uploading {local_path:?} to Drive"))
        .add_fn_name(function_path!())
    }
}

fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::SessionExpired);
    }
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(Error::upload_rejected(status.as_u16(), body));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::upload::Session;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use tempfile::TempDir;

    fn archive(dir: &TempDir, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join("backup_final.tar");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_resumable_upload() {
        let mut server = Server::new();
        let start = server
            .mock("POST", "/upload/drive/v3/files")
            .match_query(Matcher::UrlEncoded("uploadType".into(), "resumable".into()))
            .match_header("authorization", "Bearer tok")
            .match_header("x-upload-content-type", "application/octet-stream")
            .match_header("x-upload-content-length", "14")
            .match_body(Matcher::Json(json!({
                "name": "backup_final.tar",
                "parents": ["folder-9"],
            })))
            .with_status(200)
            .with_header("location", &format!("{}/upload/session-42", server.url()))
            .create();
        let content = server
            .mock("PUT", "/upload/session-42")
            .match_header("authorization", "Bearer tok")
            .match_header("content-type", "application/octet-stream")
            .match_body("tar bytes here")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"kind":"drive#file","id":"file-123","name":"backup_final.tar"}"#)
            .create();
        let dir = TempDir::new().unwrap();
        let path = archive(&dir, b"tar bytes here");

        let storage =
            DriveStorage::new(DriveConfig::new(Some(server.url()), Some("folder-9".into()))).unwrap();
        let remote_id = storage
            .put_file(&Session::new("tok", None), &path)
            .unwrap();

        start.assert();
        content.assert();
        assert_eq!(remote_id, "file-123");
    }

    #[test]
    fn test_remote_name_override_and_no_folder() {
        let mut server = Server::new();
        let start = server
            .mock("POST", "/upload/drive/v3/files")
            .match_query(Matcher::Any)
            .match_body(Matcher::Json(json!({ "name": "nightly.tar" })))
            .with_status(200)
            .with_header("location", &format!("{}/s", server.url()))
            .create();
        let content = server
            .mock("PUT", "/s")
            .with_status(200)
            .with_body(r#"{"id":"x"}"#)
            .create();
        let dir = TempDir::new().unwrap();
        let path = archive(&dir, b"abc");

        let config = DriveConfig::new(Some(server.url()), None).with_remote_name("nightly.tar");
        DriveStorage::new(config)
            .unwrap()
            .put_file(&Session::new("tok", None), &path)
            .unwrap();

        start.assert();
        content.assert();
    }

    #[test]
    fn test_unauthorized_maps_to_session_expired() {
        let mut server = Server::new();
        let start = server
            .mock("POST", "/upload/drive/v3/files")
            .match_query(Matcher::Any)
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .with_body("invalid credentials")
            .create();
        let dir = TempDir::new().unwrap();
        let path = archive(&dir, b"abc");

        let storage = DriveStorage::new(DriveConfig::new(Some(server.url()), None)).unwrap();
        let error = storage
            .put_file(&Session::new("stale", None), &path)
            .unwrap_err();

        start.assert();
        assert!(error.is_session_expired());
    }

    #[test]
    fn test_rejection_carries_status() {
        let mut server = Server::new();
        let start = server
            .mock("POST", "/upload/drive/v3/files")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body("storageQuotaExceeded")
            .create();
        let content = server.mock("PUT", Matcher::Any).expect(0).create();
        let dir = TempDir::new().unwrap();
        let path = archive(&dir, b"abc");

        let storage = DriveStorage::new(DriveConfig::new(Some(server.url()), None)).unwrap();
        let error = storage
            .put_file(&Session::new("tok", None), &path)
            .unwrap_err();

        start.assert();
        content.assert();
        assert!(matches!(
            error.root_cause(),
            Error::UploadRejected { status: 403, body } if body == "storageQuotaExceeded"
        ));
    }

    #[test]
    fn test_missing_archive_fails_before_any_request() {
        let storage = DriveStorage::new(DriveConfig::new(Some("http://127.0.0.1:9".into()), None)).unwrap();
        let error = storage
            .put_file(&Session::new("tok", None), Path::new("/nonexistent/archive.tar"))
            .unwrap_err();
        assert!(matches!(error.root_cause(), Error::Io(_)));
    }

    #[test]
    fn test_config_validation() {
        assert!(DriveConfig::default().validate().is_ok());
        assert!(DriveConfig::new(Some("not a url".into()), None).validate().is_err());
        assert!(DriveConfig::default()
            .with_remote_name("../escape")
            .validate()
            .is_err());
    }
}
