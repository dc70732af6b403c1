//! docflow: document-knowledge gateway
//!
//! Accepts uploads into per-user task directories, relays OCR, parsing, schema
//! generation and entity extraction to external services, watches their jobs
//! until completion, and bridges an OnlyOffice document server for editing.
//! Container paths are translated to host paths before any service sees them.

pub mod config;
pub mod dispatch;
pub mod documents;
pub mod editor;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod paths;
pub mod schema;
pub mod server;
pub mod storage;

pub use config::DocflowConfig;
pub use error::{Error, Result};
pub use jobs::{JobKind, JobSnapshot, JobState};
pub use server::DocflowServer;
