//! Inference backend abstraction.
//!
//! The service never runs a model itself. Generation requests are turned into
//! a [`GenerationJob`] and handed to an [`InferenceBackend`], which writes the
//! audio file to the job's output path and returns free-form generation info.
//!
//! Two implementations exist:
//! - [`UnavailableBackend`]: no generator configured; the API stays up and
//!   answers generation requests with 503
//! - [`CommandBackend`]: runs an external generator process per job

mod command;

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::ServiceConfig;

pub use command::CommandBackend;

/// What kind of audio a job produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Vocals and accompaniment from lyrics
    Song,
    /// Instrumental track from a text prompt
    Music,
}

impl JobKind {
    /// Prefix of generated file names
    pub fn file_prefix(self) -> &'static str {
        match self {
            JobKind::Song => "song",
            JobKind::Music => "music",
        }
    }
}

/// A validated generation request, as handed to the backend.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationJob {
    pub kind: JobKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<String>,
    pub genre: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_prompt: Option<String>,
    /// `None` lets the backend pick a random seed
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    pub output_path: PathBuf,
}

/// Free-form details reported by the generator
pub type GenerationInfo = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("inference backend is not configured")]
    Unavailable,

    #[error("failed to start generator `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while talking to the generator: {0}")]
    Io(#[from] io::Error),

    #[error("generator exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },

    #[error("generator did not write {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("generator printed malformed JSON: {0}")]
    MalformedInfo(#[from] serde_json::Error),

    #[error("generation timed out after {0} seconds")]
    TimedOut(u64),
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Whether generation requests can be served at all
    fn is_available(&self) -> bool;

    /// Run one job to completion. On success the output file exists.
    async fn generate(&self, job: &GenerationJob) -> Result<GenerationInfo, BackendError>;
}

/// Backend used when no generator is configured.
#[derive(Debug, Default)]
pub struct UnavailableBackend;

#[async_trait]
impl InferenceBackend for UnavailableBackend {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn generate(&self, _job: &GenerationJob) -> Result<GenerationInfo, BackendError> {
        Err(BackendError::Unavailable)
    }
}

/// Pick the backend described by the configuration.
pub fn from_config(config: &ServiceConfig) -> Arc<dyn InferenceBackend> {
    match CommandBackend::from_config(config) {
        Some(backend) => Arc::new(backend),
        None => Arc::new(UnavailableBackend),
    }
}
