//! Best-effort upload of the composed graph.

use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use thiserror::Error;

use crate::settings::UploadTarget;

/// Upload attempts are abandoned after this long.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to read {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("upload failed")]
    Transport(#[from] reqwest::Error),
}

/// PUTs the file's bytes under basic auth (WebDAV semantics; NextCloud
/// answers 204) and returns the remote status code verbatim. No retry, no
/// chunking; the payload is a small raster image.
pub fn publish(local_path: &Path, target: &UploadTarget<'_>) -> Result<StatusCode, PublishError> {
    let body = fs::read(local_path).map_err(|source| PublishError::Read {
        path: local_path.display().to_string(),
        source,
    })?;
    let client = Client::builder().timeout(UPLOAD_TIMEOUT).build()?;
    let response = client
        .put(target_url(target.url, target.file_name))
        .basic_auth(target.user, Some(target.password))
        .body(body)
        .send()?;
    Ok(response.status())
}

fn target_url(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}
