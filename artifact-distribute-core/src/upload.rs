//! Chunked upload client.
//!
//! Streams one file into an [`UploadSession`]:
//!
//! 1. plan the chunk ranges and drop those below `resume_from_chunk`,
//! 2. send the remaining chunks through a bounded concurrency window, each
//!    under the [`RetryPolicy`],
//! 3. call `finished` and require the server to report state `Done`.
//!
//! Chunks that were accepted before a failure are left on the server; the
//! service owns cleanup of staged blocks.

use std::io::SeekFrom;
use std::path::Path;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, error, info};

use crate::chunk::{chunk_digest, pending_chunks};
use crate::config::UploadOptions;
use crate::contract::{HttpRequest, HttpTransport};
use crate::error::{ChunkFailure, DistributeError};
use crate::model::{ChunkTask, FileEntry, UploadSession};
use crate::retry::RetryPolicy;

/// Header carrying the SHA-256 of a chunk body.
pub const CHUNK_DIGEST_HEADER: &str = "x-chunk-sha256";

/// State reported by `finished` once every block is in place.
pub const UPLOAD_DONE_STATE: &str = "Done";

#[derive(Debug, Deserialize)]
struct FinishedResponse {
    error: bool,
    state: String,
    #[serde(default)]
    message: Option<String>,
}

pub struct ChunkedUploadClient<'a, T: HttpTransport> {
    transport: &'a T,
    concurrency: usize,
    retry: RetryPolicy,
}

impl<'a, T: HttpTransport> ChunkedUploadClient<'a, T> {
    pub fn new(transport: &'a T, options: &UploadOptions) -> Self {
        Self {
            transport,
            concurrency: options.concurrency(),
            retry: options.retry.clone(),
        }
    }

    pub async fn upload(&self, session: &UploadSession, file: &FileEntry) -> Result<(), DistributeError> {
        if file.is_directory {
            return Err(DistributeError::InvalidPattern {
                pattern: file.relative_path.clone(),
                reason: "directories are traversed, never uploaded".into(),
            });
        }

        let chunks = pending_chunks(session, file.size_bytes);
        info!(
            session_id = session.session_id(),
            file = %file.relative_path,
            size = file.size_bytes,
            pending = chunks.len(),
            resume_from = session.resume_from_chunk(),
            concurrency = self.concurrency,
            "[UPLOAD] Starting chunked upload"
        );

        let mut in_flight = stream::iter(chunks)
            .map(|chunk| self.upload_chunk(session, &file.absolute_path, chunk))
            .buffer_unordered(self.concurrency);

        while let Some(result) = in_flight.next().await {
            if let Err(e) = result {
                error!(session_id = session.session_id(), error = %e, "[UPLOAD][ERROR] Aborting file upload");
                return Err(e);
            }
        }
        drop(in_flight);

        self.finish(session).await
    }

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        path: &Path,
        chunk: ChunkTask,
    ) -> Result<(), DistributeError> {
        let bytes = read_range(path, chunk.offset, chunk.length)
            .await
            .map_err(|e| DistributeError::Upload {
                session_id: chunk.session_id.clone(),
                chunk_index: chunk.chunk_index,
                cause: ChunkFailure::Io(e.to_string()),
            })?;
        let digest = chunk_digest(&bytes);
        let url = format!(
            "{}/upload/upload_chunk/{}?block_number={}",
            session.upload_url(),
            session.session_id(),
            chunk.block_number()
        );

        let label = format!("chunk {}", chunk.chunk_index);
        let outcome = self
            .retry
            .run(
                &label,
                |attempt| {
                    let request = HttpRequest::post(url.clone())
                        .header(CHUNK_DIGEST_HEADER, digest.clone())
                        .bytes(bytes.clone(), "application/octet-stream");
                    async move {
                        debug!(url = %request.url, attempt, "[UPLOAD] Sending chunk");
                        let response = self
                            .transport
                            .send(request)
                            .await
                            .map_err(|e| ChunkFailure::Transport(e.to_string()))?;
                        if response.status == 200 {
                            Ok(())
                        } else {
                            Err(ChunkFailure::Status {
                                status: response.status,
                                message: response.message(),
                            })
                        }
                    }
                },
                |failure: &ChunkFailure| match failure {
                    ChunkFailure::Status { status, .. } => self.retry.is_retryable_status(*status),
                    other => other.is_retryable(),
                },
            )
            .await;

        outcome.map_err(|cause| DistributeError::Upload {
            session_id: chunk.session_id.clone(),
            chunk_index: chunk.chunk_index,
            cause,
        })
    }

    async fn finish(&self, session: &UploadSession) -> Result<(), DistributeError> {
        let url = format!(
            "{}/upload/finished/{}",
            session.upload_url(),
            session.session_id()
        );
        let response = self.transport.send(HttpRequest::post(url)).await?;
        if response.status != 200 {
            return Err(DistributeError::Request {
                operation: "finish upload",
                status: response.status,
                message: response.message(),
            });
        }

        let body: FinishedResponse = response.json("finish upload")?;
        if body.error || body.state != UPLOAD_DONE_STATE {
            error!(
                session_id = session.session_id(),
                state = %body.state,
                message = body.message.as_deref().unwrap_or(""),
                "[UPLOAD][ERROR] Server did not accept the upload"
            );
            return Err(DistributeError::UploadIncomplete {
                session_id: session.session_id().to_string(),
                state: body.state,
            });
        }

        info!(session_id = session.session_id(), "[UPLOAD] Upload finished");
        Ok(())
    }
}

async fn read_range(path: &Path, offset: u64, length: u64) -> std::io::Result<Bytes> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; length as usize];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{HttpResponse, MockHttpTransport, TransportError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn fixture(size: usize) -> (TempDir, FileEntry) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.ipa");
        let bytes: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &bytes).unwrap();
        let entry = FileEntry {
            absolute_path: path,
            relative_path: "app.ipa".into(),
            size_bytes: size as u64,
            is_directory: false,
        };
        (dir, entry)
    }

    fn options() -> UploadOptions {
        UploadOptions {
            max_concurrency: 2,
            retry: RetryPolicy::immediate(3),
        }
    }

    fn done() -> HttpResponse {
        HttpResponse::new(200).with_json(serde_json::json!({"error": false, "state": "Done"}))
    }

    #[tokio::test]
    async fn uploads_every_chunk_then_finishes() {
        let (_dir, file) = fixture(250);
        let session = UploadSession::new("s1", "https://up.test", 100, 3, 0).unwrap();
        let blocks = Arc::new(Mutex::new(Vec::new()));
        let seen = blocks.clone();

        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .withf(|r| r.url.contains("/upload_chunk/"))
            .times(3)
            .returning(move |r| {
                let block = r.url.rsplit('=').next().unwrap().parse::<usize>().unwrap();
                let len = r.body.as_ref().unwrap().len();
                seen.lock().unwrap().push((block, len));
                Ok(HttpResponse::new(200))
            });
        transport
            .expect_send()
            .withf(|r| r.url == "https://up.test/upload/finished/s1")
            .times(1)
            .returning(|_| Ok(done()));

        ChunkedUploadClient::new(&transport, &options())
            .upload(&session, &file)
            .await
            .expect("upload succeeds");

        let mut blocks = blocks.lock().unwrap().clone();
        blocks.sort();
        assert_eq!(blocks, vec![(1, 100), (2, 100), (3, 50)]);
    }

    #[tokio::test]
    async fn resume_only_sends_remaining_chunks() {
        let (_dir, file) = fixture(500);
        let session = UploadSession::new("s2", "https://up.test", 100, 5, 3).unwrap();
        let blocks = Arc::new(Mutex::new(Vec::new()));
        let seen = blocks.clone();

        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .withf(|r| r.url.contains("/upload_chunk/"))
            .times(2)
            .returning(move |r| {
                seen.lock().unwrap().push(r.url.clone());
                Ok(HttpResponse::new(200))
            });
        transport
            .expect_send()
            .withf(|r| r.url.contains("/finished/"))
            .returning(|_| Ok(done()));

        ChunkedUploadClient::new(&transport, &options())
            .upload(&session, &file)
            .await
            .unwrap();

        let mut urls = blocks.lock().unwrap().clone();
        urls.sort();
        assert_eq!(
            urls,
            vec![
                "https://up.test/upload/upload_chunk/s2?block_number=4".to_string(),
                "https://up.test/upload/upload_chunk/s2?block_number=5".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let (_dir, file) = fixture(10);
        let session = UploadSession::new("s3", "https://up.test", 100, 1, 0).unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .withf(|r| r.url.contains("/upload_chunk/"))
            .times(3)
            .returning(move |r| match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Err(TransportError {
                    method: "POST",
                    url: r.url.clone(),
                    message: "connection reset".into(),
                }),
                1 => Ok(HttpResponse::new(503)),
                _ => Ok(HttpResponse::new(200)),
            });
        transport
            .expect_send()
            .withf(|r| r.url.contains("/finished/"))
            .returning(|_| Ok(done()));

        ChunkedUploadClient::new(&transport, &options())
            .upload(&session, &file)
            .await
            .expect("third attempt succeeds");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_error_fails_immediately() {
        let (_dir, file) = fixture(10);
        let session = UploadSession::new("s4", "https://up.test", 100, 1, 0).unwrap();

        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .withf(|r| r.url.contains("/upload_chunk/"))
            .times(1)
            .returning(|_| Ok(HttpResponse::new(403)));
        transport
            .expect_send()
            .withf(|r| r.url.contains("/finished/"))
            .never();

        let err = ChunkedUploadClient::new(&transport, &options())
            .upload(&session, &file)
            .await
            .unwrap_err();
        match err {
            DistributeError::Upload {
                chunk_index, cause, ..
            } => {
                assert_eq!(chunk_index, 0);
                assert!(matches!(cause, ChunkFailure::Status { status: 403, .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn retry_exhaustion_surfaces_chunk_index() {
        let (_dir, file) = fixture(150);
        let session = UploadSession::new("s5", "https://up.test", 100, 2, 1).unwrap();

        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .withf(|r| r.url.contains("/upload_chunk/"))
            .times(3)
            .returning(|_| Ok(HttpResponse::new(500)));

        let err = ChunkedUploadClient::new(&transport, &options())
            .upload(&session, &file)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DistributeError::Upload { chunk_index: 1, .. }
        ));
    }

    #[tokio::test]
    async fn finish_state_other_than_done_is_incomplete() {
        let (_dir, file) = fixture(10);
        let session = UploadSession::new("s6", "https://up.test", 100, 1, 0).unwrap();

        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .withf(|r| r.url.contains("/upload_chunk/"))
            .returning(|_| Ok(HttpResponse::new(200)));
        transport
            .expect_send()
            .withf(|r| r.url.contains("/finished/"))
            .returning(|_| {
                Ok(HttpResponse::new(200)
                    .with_json(serde_json::json!({"error": false, "state": "Uploading"})))
            });

        let err = ChunkedUploadClient::new(&transport, &options())
            .upload(&session, &file)
            .await
            .unwrap_err();
        match err {
            DistributeError::UploadIncomplete { state, .. } => assert_eq!(state, "Uploading"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn chunks_carry_content_digest() {
        let (_dir, file) = fixture(3);
        std::fs::write(&file.absolute_path, b"abc").unwrap();
        let session = UploadSession::new("s7", "https://up.test", 100, 1, 0).unwrap();

        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .withf(|r| {
                r.url.contains("/upload_chunk/")
                    && r.headers.iter().any(|(k, v)| {
                        k == CHUNK_DIGEST_HEADER
                            && v == "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
                    })
            })
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200)));
        transport
            .expect_send()
            .withf(|r| r.url.contains("/finished/"))
            .returning(|_| Ok(done()));

        ChunkedUploadClient::new(&transport, &options())
            .upload(&session, &file)
            .await
            .unwrap();
    }

    /// Holds every chunk request open briefly and records the peak number
    /// of requests in flight at once.
    #[derive(Default)]
    struct SlowServer {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        chunks: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl HttpTransport for SlowServer {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            if !request.url.contains("/upload_chunk/") {
                return Ok(done());
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.chunks.fetch_add(1, Ordering::SeqCst);
            Ok(HttpResponse::new(200))
        }
    }

    #[tokio::test]
    async fn oversized_concurrency_is_capped_at_four_in_flight() {
        let (_dir, file) = fixture(1000);
        let session = UploadSession::new("s8", "https://up.test", 100, 10, 0).unwrap();
        let options = UploadOptions {
            max_concurrency: 32,
            retry: RetryPolicy::immediate(1),
        };
        assert_eq!(options.concurrency(), 4);

        let server = SlowServer::default();
        ChunkedUploadClient::new(&server, &options)
            .upload(&session, &file)
            .await
            .unwrap();

        let peak = server.peak.load(Ordering::SeqCst);
        assert!(peak <= 4, "{peak} chunk requests were in flight at once");
        assert!(peak > 1, "chunks were never sent concurrently");
        assert_eq!(server.chunks.load(Ordering::SeqCst), 10);
    }
}
