//! Data model shared by the resolver, the upload client and the orchestrator.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::DistributeError;

/// One uploadable file. Directories are traversed by the resolver and never
/// become entries, so `is_directory` is always false for anything handed to
/// the upload client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub absolute_path: PathBuf,
    /// Path relative to the owning group's root, `/`-separated.
    pub relative_path: String,
    pub size_bytes: u64,
    pub is_directory: bool,
}

/// A named unit of upload: a single binary or one symbol bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactGroup {
    pub group_id: String,
    pub root: PathBuf,
    pub files: Vec<FileEntry>,
    pub total_bytes: u64,
}

impl ArtifactGroup {
    /// Builds a group, sorting files by relative path. Returns `None` for an
    /// empty file list since a group is never empty.
    pub fn new(group_id: impl Into<String>, root: PathBuf, mut files: Vec<FileEntry>) -> Option<Self> {
        if files.is_empty() {
            return None;
        }
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        let total_bytes = files.iter().map(|f| f.size_bytes).sum();
        Some(Self {
            group_id: group_id.into(),
            root,
            files,
            total_bytes,
        })
    }
}

/// Server-issued destination for one file's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    session_id: String,
    upload_url: String,
    chunk_size: u64,
    total_chunks: usize,
    resume_from_chunk: usize,
}

impl UploadSession {
    pub fn new(
        session_id: impl Into<String>,
        upload_url: impl Into<String>,
        chunk_size: u64,
        total_chunks: usize,
        resume_from_chunk: usize,
    ) -> Result<Self, DistributeError> {
        let session_id = session_id.into();
        if chunk_size == 0 {
            return Err(DistributeError::MalformedResponse {
                operation: "set upload metadata",
                reason: format!("session {session_id} has a zero chunk size"),
            });
        }
        if total_chunks == 0 {
            return Err(DistributeError::MalformedResponse {
                operation: "set upload metadata",
                reason: format!("session {session_id} has no chunks"),
            });
        }
        if resume_from_chunk > total_chunks {
            return Err(DistributeError::MalformedResponse {
                operation: "set upload metadata",
                reason: format!(
                    "session {session_id} resumes at chunk {resume_from_chunk} of {total_chunks}"
                ),
            });
        }
        Ok(Self {
            session_id,
            upload_url: upload_url.into(),
            chunk_size,
            total_chunks,
            resume_from_chunk,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    pub fn resume_from_chunk(&self) -> usize {
        self.resume_from_chunk
    }
}

/// A byte range of a file bound to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTask {
    pub session_id: String,
    pub chunk_index: usize,
    pub offset: u64,
    pub length: u64,
}

impl ChunkTask {
    /// Block numbers on the wire are 1-based.
    pub fn block_number(&self) -> usize {
        self.chunk_index + 1
    }
}

/// Default spacing between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// A pending server-side operation observed through `status_url`.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    pub status_url: String,
    pub poll_interval: Duration,
    pub deadline: Instant,
}

impl OperationHandle {
    pub fn new(status_url: impl Into<String>, deadline: Instant) -> Self {
        Self {
            status_url: status_url.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadline,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    Succeeded,
    Failed { status: u16, message: String },
    TimedOut,
}

/// Lifecycle states of one release deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseState {
    Requesting,
    Uploading,
    Committing,
    AwaitingAsyncOp,
    Polling,
    Published,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The commit response carried no async operation marker.
    NotRequired,
    Succeeded,
    /// Deadline passed; the release was published anyway.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolsOutcome {
    NotRequested,
    Uploaded { groups: usize, files: usize },
    /// No symbol files were found and the configuration allowed continuing.
    SkippedOptional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub release_id: String,
    pub states: Vec<ReleaseState>,
    pub poll: PollOutcome,
    pub symbols: SymbolsOutcome,
}
