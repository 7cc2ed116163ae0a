//! `reqwest` implementation of both backend seams.
//!
//! One `reqwest::Client` is shared by the upload and every tracker's polls;
//! it is cheap to clone and pools connections to the listing endpoint.

use super::{ListingSource, UploadBackend};
use crate::config::UploaderConfig;
use crate::error::{PollError, UploadError};
use crate::model::{ListingResponse, PendingFile, SessionId, UploadResponse};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Error body the upload endpoint sends with 4xx/5xx answers.
#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// HTTP client for the upload and listing endpoints.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    upload_url: String,
    listing_url: String,
    session_header: String,
    session_query_param: String,
    upload_field: String,
    timeout_secs: u64,
}

impl HttpBackend {
    pub fn new(config: &UploaderConfig) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| UploadError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            upload_url: config.endpoints.upload_url.clone(),
            listing_url: config.endpoints.listing_url.clone(),
            session_header: config.session_header.clone(),
            session_query_param: config.session_query_param.clone(),
            upload_field: config.upload_field.clone(),
            timeout_secs: config.request_timeout_secs,
        })
    }

    async fn build_form(&self, batch: &[PendingFile]) -> Result<Form, UploadError> {
        let mut form = Form::new();
        for file in batch {
            let bytes = file.read_contents().await?;
            let part = Part::bytes(bytes)
                .file_name(file.name.clone())
                .mime_str(&file.mime_type)
                .map_err(|e| {
                    UploadError::Internal(format!("Invalid MIME type '{}': {e}", file.mime_type))
                })?;
            form = form.part(self.upload_field.clone(), part);
        }
        Ok(form)
    }

    fn transport_error(&self, e: reqwest::Error) -> UploadError {
        if e.is_timeout() {
            UploadError::Timeout {
                url: self.upload_url.clone(),
                secs: self.timeout_secs,
            }
        } else {
            UploadError::Transport {
                url: self.upload_url.clone(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl UploadBackend for HttpBackend {
    async fn submit(
        &self,
        batch: &[PendingFile],
        session: &SessionId,
    ) -> Result<UploadResponse, UploadError> {
        info!(
            "Uploading {} file(s) to {} (session '{}')",
            batch.len(),
            self.upload_url,
            session
        );
        let form = self.build_form(batch).await?;

        let response = self
            .client
            .post(&self.upload_url)
            .header(self.session_header.as_str(), session.as_str())
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            let reason = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.error)
                .unwrap_or_else(|| format!("HTTP {status}"));
            warn!("Upload rejected with {}: {}", status, reason);
            return Err(UploadError::UploadRejected { reason });
        }

        let parsed: UploadResponse =
            serde_json::from_str(&body).map_err(|e| UploadError::UploadRejected {
                reason: format!("malformed response body: {e}"),
            })?;
        debug!("Upload accepted with {}: {:?}", status, parsed.message);
        Ok(parsed)
    }
}

#[async_trait]
impl ListingSource for HttpBackend {
    async fn list_files(&self, session: &SessionId) -> Result<ListingResponse, PollError> {
        let response = self
            .client
            .get(&self.listing_url)
            .query(&[(self.session_query_param.as_str(), session.as_str())])
            .send()
            .await
            .map_err(|e| PollError::Transport {
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status {
                status: status.as_u16(),
            });
        }

        response.json::<ListingResponse>().await.map_err(|e| {
            if e.is_decode() {
                PollError::Malformed {
                    detail: e.to_string(),
                }
            } else {
                PollError::Transport {
                    detail: e.to_string(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoints;

    #[test]
    fn new_copies_endpoint_settings() {
        let config = UploaderConfig::builder()
            .endpoints(Endpoints::for_base("http://localhost:9999"))
            .session_header("X-Other")
            .build()
            .unwrap();
        let backend = HttpBackend::new(&config).unwrap();
        assert_eq!(backend.upload_url, "http://localhost:9999/api/python");
        assert_eq!(backend.listing_url, "http://localhost:9999/api/files");
        assert_eq!(backend.session_header, "X-Other");
        assert_eq!(backend.upload_field, "files");
    }

    #[tokio::test]
    async fn unreachable_listing_is_transport_error() {
        // Port 9 (discard) is closed on test hosts.
        let config = UploaderConfig::builder()
            .endpoints(Endpoints::for_base("http://127.0.0.1:9"))
            .request_timeout_secs(2)
            .build()
            .unwrap();
        let backend = HttpBackend::new(&config).unwrap();
        let err = backend
            .list_files(&SessionId::new("s"))
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Transport { .. }), "got {err:?}");
    }
}
