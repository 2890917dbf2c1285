//! Typed request and response schemas for the distribution service, and a
//! thin client that checks each endpoint's expected status before parsing.
//!
//! Every response is validated against its schema at this boundary; a body
//! that does not fit is a [`DistributeError::MalformedResponse`], never a
//! silently missing field.

use bytes::Bytes;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::chunk::expected_chunk_count;
use crate::config::CommitMode;
use crate::contract::{HttpRequest, HttpResponse, HttpTransport, Method};
use crate::error::DistributeError;
use crate::model::{FileEntry, UploadSession};
use crate::retry::RetryPolicy;

/// Response header naming the status URL of an async operation.
pub const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";

/// Header carrying the service API token.
pub const API_TOKEN_HEADER: &str = "X-API-Token";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    pub upload_url: String,
    pub relative_path: String,
}

#[derive(Debug, Serialize)]
struct CreateUploadRequest<'a> {
    file_name: &'a str,
    file_size: u64,
    relative_path: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadResource {
    pub id: String,
    pub upload_url: String,
    pub upload_domain: String,
}

#[derive(Debug, Deserialize)]
struct SetMetadataResponse {
    /// 1-based block numbers the server still expects.
    chunk_list: Vec<usize>,
    chunk_size: u64,
    #[serde(default)]
    resume_restart: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub path: String,
    pub upload_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    pub relative_path: String,
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub uploads: Vec<UploadedFile>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitProperties {
    pub source: SourceDescriptor,
    pub deployment_settings: DeploymentSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitRequest {
    pub properties: CommitProperties,
}

#[derive(Debug, Default, Deserialize)]
struct CommitResponseBody {
    #[serde(default)]
    release_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub release_id: Option<String>,
    /// Status URL from [`ASYNC_OPERATION_HEADER`], when the server continues
    /// the commit asynchronously.
    pub async_operation: Option<String>,
}

#[derive(Debug, Serialize)]
struct SymbolUploadRequest<'a> {
    symbol_type: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SymbolUpload {
    pub symbol_upload_id: String,
    pub upload_url: String,
    #[serde(default)]
    pub expiration_date: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct Destination<'a> {
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    status: &'static str,
    destinations: Vec<Destination<'a>>,
    release_notes: &'a str,
}

/// Client for the service endpoints under `base_url`.
pub struct ServiceClient<'a, T: HttpTransport> {
    transport: &'a T,
    base_url: String,
    api_token: Option<String>,
}

impl<'a, T: HttpTransport> ServiceClient<'a, T> {
    pub fn new(transport: &'a T, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: None,
        }
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    fn authorised(&self, request: HttpRequest) -> HttpRequest {
        match &self.api_token {
            Some(token) => request.header(API_TOKEN_HEADER, token.clone()),
            None => request,
        }
    }

    async fn call(
        &self,
        operation: &'static str,
        request: HttpRequest,
        expected: u16,
    ) -> Result<HttpResponse, DistributeError> {
        debug!(operation, method = request.method.as_str(), url = %request.url, "[API] Request");
        let response = self.transport.send(self.authorised(request)).await?;
        if response.status != expected {
            error!(
                operation,
                expected,
                status = response.status,
                message = %response.message(),
                "[API][ERROR] Unexpected status"
            );
            return Err(DistributeError::Request {
                operation,
                status: response.status,
                message: response.message(),
            });
        }
        Ok(response)
    }

    /// `POST {base}/getResourceUploadUrl`, 200.
    pub async fn get_upload_target(&self) -> Result<UploadTarget, DistributeError> {
        let url = format!("{}/getResourceUploadUrl", self.base_url);
        let response = self
            .call("get upload target", HttpRequest::post(url), 200)
            .await?;
        let target: UploadTarget = response.json("get upload target")?;
        info!(relative_path = %target.relative_path, "[API] Obtained upload target");
        Ok(target)
    }

    /// `POST {base}/uploads`, 201.
    pub async fn create_upload(
        &self,
        file: &FileEntry,
        relative_path: &str,
    ) -> Result<UploadResource, DistributeError> {
        let url = format!("{}/uploads", self.base_url);
        let request = HttpRequest::post(url).json(&CreateUploadRequest {
            file_name: &file.relative_path,
            file_size: file.size_bytes,
            relative_path,
        })?;
        let response = self.call("create upload", request, 201).await?;
        let resource: UploadResource = response.json("create upload")?;
        info!(upload_id = %resource.id, file = %file.relative_path, "[API] Created upload resource");
        Ok(resource)
    }

    /// `POST {upload_domain}/upload/set_metadata/{id}`, 200. Turns the
    /// server's outstanding-block list into an [`UploadSession`].
    pub async fn open_session(
        &self,
        resource: &UploadResource,
        file: &FileEntry,
    ) -> Result<UploadSession, DistributeError> {
        let upload_domain = resource.upload_domain.trim_end_matches('/');
        let file_size = file.size_bytes.to_string();
        let url = Url::parse_with_params(
            &format!("{}/upload/set_metadata/{}", upload_domain, resource.id),
            &[
                ("file_name", file.relative_path.as_str()),
                ("file_size", file_size.as_str()),
                ("content_type", "application/octet-stream"),
            ],
        )
        .map_err(|e| DistributeError::MalformedResponse {
            operation: "set upload metadata",
            reason: format!("unusable upload_domain `{upload_domain}`: {e}"),
        })?;
        let response = self
            .call("set upload metadata", HttpRequest::post(url.as_str()), 200)
            .await?;
        let meta: SetMetadataResponse = response.json("set upload metadata")?;

        if meta.chunk_size == 0 {
            return Err(DistributeError::MalformedResponse {
                operation: "set upload metadata",
                reason: "chunk_size must be positive".into(),
            });
        }
        let total_chunks = expected_chunk_count(file.size_bytes, meta.chunk_size).max(1);
        let resume_from_chunk = if meta.resume_restart {
            0
        } else {
            match meta.chunk_list.iter().min() {
                Some(first_missing) => first_missing.saturating_sub(1),
                None => total_chunks,
            }
        };

        let session = UploadSession::new(
            resource.id.clone(),
            upload_domain,
            meta.chunk_size,
            total_chunks,
            resume_from_chunk.min(total_chunks),
        )?;
        info!(
            session_id = session.session_id(),
            chunk_size = session.chunk_size(),
            total_chunks = session.total_chunks(),
            resume_from_chunk = session.resume_from_chunk(),
            "[API] Upload session issued"
        );
        Ok(session)
    }

    /// PUT (create, 201) or PATCH (update, 202) the deployment resource.
    /// Any other status, including other 2xx codes, is a [`DistributeError::Commit`].
    pub async fn commit(
        &self,
        deployment_name: &str,
        mode: CommitMode,
        body: &CommitRequest,
    ) -> Result<CommitOutcome, DistributeError> {
        let url = format!("{}/deployments/{}", self.base_url, deployment_name);
        let method = match mode {
            CommitMode::Create => Method::Put,
            CommitMode::Update => Method::Patch,
        };
        let request = self.authorised(HttpRequest::new(method, url).json(body)?);
        let expected = mode.expected_status();
        debug!(method = method.as_str(), url = %request.url, "[API] Commit request");

        let response = self.transport.send(request).await?;
        if response.status != expected {
            error!(
                expected,
                status = response.status,
                message = %response.message(),
                "[API][ERROR] Commit rejected"
            );
            return Err(DistributeError::Commit {
                expected,
                status: response.status,
                message: response.message(),
            });
        }

        let parsed: CommitResponseBody = if response.body.is_empty() {
            CommitResponseBody::default()
        } else {
            response.json("commit")?
        };
        Ok(CommitOutcome {
            release_id: parsed.release_id,
            async_operation: response.header(ASYNC_OPERATION_HEADER).map(str::to_string),
        })
    }

    /// `POST {base}/symbol_uploads`, 201.
    pub async fn begin_symbol_upload(&self, symbol_type: &str) -> Result<SymbolUpload, DistributeError> {
        let url = format!("{}/symbol_uploads", self.base_url);
        let request = HttpRequest::post(url).json(&SymbolUploadRequest { symbol_type })?;
        let response = self.call("begin symbol upload", request, 201).await?;
        let upload: SymbolUpload = response.json("begin symbol upload")?;
        info!(symbol_upload_id = %upload.symbol_upload_id, "[API] Symbol upload started");
        Ok(upload)
    }

    /// `PUT` one file into the symbol blob container, 201, retried like a chunk.
    pub async fn put_symbol_blob(
        &self,
        upload: &SymbolUpload,
        file: &FileEntry,
        retry: &RetryPolicy,
    ) -> Result<(), DistributeError> {
        let url = blob_url(&upload.upload_url, &file.relative_path)?;
        let bytes = Bytes::from(
            tokio::fs::read(&file.absolute_path)
                .await
                .map_err(|e| DistributeError::io(&file.absolute_path, e))?,
        );

        retry
            .run(
                &file.relative_path,
                |_| {
                    let request = HttpRequest::new(Method::Put, url.clone())
                        .header("x-ms-blob-type", "BlockBlob")
                        .bytes(bytes.clone(), "application/octet-stream");
                    async move {
                        let response = self.transport.send(request).await?;
                        if response.status == 201 {
                            Ok(())
                        } else {
                            Err(DistributeError::Request {
                                operation: "upload symbol file",
                                status: response.status,
                                message: response.message(),
                            })
                        }
                    }
                },
                |e: &DistributeError| match e {
                    DistributeError::Transport(_) => true,
                    DistributeError::Request { status, .. } => retry.is_retryable_status(*status),
                    _ => false,
                },
            )
            .await
    }

    /// `PATCH {base}/symbol_uploads/{id}` with `{status: committed}`, 200.
    pub async fn commit_symbol_upload(&self, upload: &SymbolUpload) -> Result<(), DistributeError> {
        let url = format!("{}/symbol_uploads/{}", self.base_url, upload.symbol_upload_id);
        let request = HttpRequest::new(Method::Patch, url)
            .json(&serde_json::json!({ "status": "committed" }))?;
        self.call("commit symbol upload", request, 200).await?;
        info!(symbol_upload_id = %upload.symbol_upload_id, "[API] Symbol upload committed");
        Ok(())
    }

    /// `PATCH {base}/releases/{id}` making the release available, 200.
    pub async fn make_available(
        &self,
        release_id: &str,
        destinations: &[String],
        release_notes: &str,
    ) -> Result<(), DistributeError> {
        let url = format!("{}/releases/{}", self.base_url, release_id);
        let body = PublishRequest {
            status: "available",
            destinations: destinations.iter().map(|id| Destination { id }).collect(),
            release_notes,
        };
        let request = HttpRequest::new(Method::Patch, url).json(&body)?;
        self.call("publish release", request, 200).await?;
        info!(release_id, destinations = destinations.len(), "[API] Release is available");
        Ok(())
    }
}

/// Appends a relative path to a container URL, keeping any query string
/// (e.g. a SAS token) at the end.
fn blob_url(container_url: &str, relative_path: &str) -> Result<String, DistributeError> {
    let malformed = |reason: String| DistributeError::MalformedResponse {
        operation: "begin symbol upload",
        reason,
    };
    let mut url = Url::parse(container_url)
        .map_err(|e| malformed(format!("upload_url `{container_url}`: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| malformed(format!("upload_url `{container_url}` cannot carry a path")))?
        .pop_if_empty()
        .extend(relative_path.split('/'));
    Ok(url.into())
}
