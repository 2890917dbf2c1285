#![doc = "artifact-distribute-core: chunked artifact upload and release publication."]

//! This crate holds the protocol client, file resolution and release
//! orchestration used by the `artifact-distribute` CLI.
//!
//! # Layout
//! - [`resolver`] turns glob patterns into [`model::ArtifactGroup`]s.
//! - [`api`] speaks the service endpoints; [`upload`] streams chunks.
//! - [`poller`] follows async operations to a terminal state.
//! - [`orchestrator`] sequences a whole release.
//!
//! All network access goes through [`contract::HttpTransport`], so every
//! stage can be exercised against `MockHttpTransport` (exported with the
//! `test-export-mocks` feature).

pub mod api;
pub mod chunk;
pub mod config;
pub mod contract;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod poller;
pub mod resolver;
pub mod retry;
pub mod transport;
pub mod upload;
