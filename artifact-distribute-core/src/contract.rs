//! # contract: the HTTP seam between protocol logic and the network
//!
//! All remote calls made by the resolver-to-publish pipeline go through the
//! [`HttpTransport`] trait. Protocol modules build an [`HttpRequest`], hand it
//! to the transport and inspect the returned [`HttpResponse`]; they never see
//! a concrete HTTP client.
//!
//! ## Implementations
//! - [`crate::transport::ReqwestTransport`] for real network use.
//! - `MockHttpTransport`, generated by `mockall` under `cfg(test)` or the
//!   `test-export-mocks` feature, for deterministic tests.
//!
//! ## Errors
//! A transport only fails with [`TransportError`] when no HTTP response was
//! obtained at all. Non-2xx statuses are ordinary responses; deciding whether
//! a status is acceptable belongs to the caller.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::error::DistributeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
        }
    }
}

/// A fully materialised request. Bodies are buffered: chunks are bounded by
/// the session's chunk size, so nothing here holds a whole artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Serialises `body` as the JSON payload and sets the content type.
    pub fn json<B: Serialize>(self, body: &B) -> Result<Self, DistributeError> {
        let bytes = serde_json::to_vec(body).map_err(|e| DistributeError::RequestEncoding {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        Ok(self.bytes(bytes, "application/json"))
    }

    /// Sets a raw body. Retries clone the request, so callers should hand over
    /// a `Bytes` they already hold rather than a fresh `Vec` per attempt.
    pub fn bytes(mut self, body: impl Into<Bytes>, content_type: &str) -> Self {
        self.headers
            .push(("Content-Type".to_string(), content_type.to_string()));
        self.body = Some(body.into());
        self
    }

    /// Decodes the JSON body back into a value, `None` for empty or non-JSON
    /// bodies.
    pub fn json_body(&self) -> Option<serde_json::Value> {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Reason phrase, e.g. "Accepted".
    pub status_text: String,
    /// Header names are stored lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_json(mut self, value: serde_json::Value) -> Self {
        self.body = value.to_string().into_bytes();
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Human readable message for error reports: the reason phrase, followed
    /// by the body when it is short text.
    pub fn message(&self) -> String {
        let body = String::from_utf8_lossy(&self.body);
        let body = body.trim();
        match (self.status_text.is_empty(), body.is_empty() || body.len() > 512) {
            (true, true) => String::from("<no message>"),
            (true, false) => body.to_string(),
            (false, true) => self.status_text.clone(),
            (false, false) => format!("{} {}", self.status_text, body),
        }
    }

    /// Parses the body against a typed schema; any mismatch is a hard error.
    pub fn json<T: DeserializeOwned>(&self, operation: &'static str) -> Result<T, DistributeError> {
        serde_json::from_slice(&self.body).map_err(|e| DistributeError::MalformedResponse {
            operation,
            reason: e.to_string(),
        })
    }
}

/// No HTTP response could be obtained (DNS, connect, reset, timeout).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{method} {url}: {message}")]
pub struct TransportError {
    pub method: &'static str,
    pub url: String,
    pub message: String,
}

/// Sends one HTTP request and returns whatever the server answered.
///
/// Implementors must not retry on their own; retry belongs to
/// [`crate::retry::RetryPolicy`] in the chunk upload path only.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}
