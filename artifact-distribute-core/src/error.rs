//! Error taxonomy for the distribution pipeline.
//!
//! Every fatal condition surfaces as a [`DistributeError`]. Two outcomes that
//! look like failures are deliberately *not* errors: an async operation that
//! outlives its deadline ([`crate::model::PollResult::TimedOut`]) and symbols
//! that are missing while the caller allows it
//! ([`crate::model::SymbolsOutcome::SkippedOptional`]).

use std::path::PathBuf;

use thiserror::Error;

use crate::contract::TransportError;

/// Why a single chunk could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkFailure {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport: {0}")]
    Transport(String),

    #[error("reading chunk bytes: {0}")]
    Io(String),
}

impl ChunkFailure {
    /// 4xx responses and local read failures will not get better on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChunkFailure::Status { status, .. } => *status >= 500,
            ChunkFailure::Transport(_) => true,
            ChunkFailure::Io(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum DistributeError {
    #[error("no files matched the mandatory pattern `{pattern}`")]
    ArtifactNotFound { pattern: String },

    #[error("pattern `{pattern}` matched {} entries where exactly one file was expected: {matches:?}", matches.len())]
    AmbiguousArtifact {
        pattern: String,
        matches: Vec<PathBuf>,
    },

    #[error("upload session {session_id} failed at chunk {chunk_index}: {cause}")]
    Upload {
        session_id: String,
        chunk_index: usize,
        cause: ChunkFailure,
    },

    #[error("upload session {session_id} did not complete (state `{state}`)")]
    UploadIncomplete { session_id: String, state: String },

    #[error("commit failed: expected HTTP {expected}, got {status}: {message}")]
    Commit {
        expected: u16,
        status: u16,
        message: String,
    },

    #[error("{operation} failed with HTTP {status}: {message}")]
    Request {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("async operation at {status_url} failed with HTTP {status}: {message}")]
    OperationFailed {
        status_url: String,
        status: u16,
        message: String,
    },

    #[error("malformed response from {operation}: {reason}")]
    MalformedResponse {
        operation: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("could not encode request body for {url}: {reason}")]
    RequestEncoding { url: String, reason: String },
}

impl DistributeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DistributeError::Io {
            path: path.into(),
            source,
        }
    }
}
