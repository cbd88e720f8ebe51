//! Song and instrumental generation endpoints.
//!
//! Requests are validated here, turned into a [`GenerationJob`] and run on the
//! inference backend under the generation limiter and timeout. The audio is
//! then downloadable from `/outputs/{filename}`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::backend::{BackendError, GenerationInfo, GenerationJob, JobKind};
use crate::config::{DEFAULT_MUSIC_DURATION_SECS, GENRES, LYRICS_PREVIEW_CHARS};
use crate::error::AppError;
use crate::state::AppState;
use crate::storage::output_filename;

/// Seed value meaning "pick one at random"
pub const RANDOM_SEED: i64 = -1;

fn default_genre() -> String {
    "Auto".to_string()
}

fn default_seed() -> i64 {
    RANDOM_SEED
}

/// Body of `POST /api/generate`
#[derive(Debug, Deserialize)]
pub struct SongRequest {
    /// Lyrics with structure tags (`[verse]`, `[chorus]`, ...)
    #[serde(default)]
    pub lyrics: String,
    #[serde(default = "default_genre")]
    pub genre: String,
    /// Reference audio for style
    pub audio_prompt: Option<String>,
    /// Free-text style description
    pub text_prompt: Option<String>,
    #[serde(default = "default_seed")]
    pub seed: i64,
}

/// Body of `POST /api/generate-music`
#[derive(Debug, Deserialize)]
pub struct MusicRequest {
    #[serde(default)]
    pub text_prompt: String,
    #[serde(default = "default_genre")]
    pub genre: String,
    /// Length in seconds
    pub duration: Option<u32>,
    #[serde(default = "default_seed")]
    pub seed: i64,
}

#[derive(Debug, Serialize)]
pub struct GenerationResponse<T> {
    pub status: &'static str,
    pub message: &'static str,
    pub data: T,
    pub timestamp: String,
}

impl<T> GenerationResponse<T> {
    fn success(message: &'static str, data: T) -> Self {
        Self {
            status: "success",
            message,
            data,
            timestamp: Local::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SongData {
    pub audio_url: String,
    pub filename: String,
    pub genre: String,
    pub info: GenerationInfo,
    pub lyrics_preview: String,
}

#[derive(Debug, Serialize)]
pub struct MusicData {
    pub audio_url: String,
    pub filename: String,
    pub genre: String,
    pub duration: u32,
    pub prompt: String,
    pub info: GenerationInfo,
}

/// Generate a song from lyrics.
#[instrument(name = "generate::song", skip_all)]
pub async fn song(
    State(state): State<AppState>,
    payload: Result<Json<SongRequest>, JsonRejection>,
) -> Result<Json<GenerationResponse<SongData>>, AppError> {
    let Json(request) = payload?;

    if request.lyrics.trim().is_empty() {
        return Err(AppError::InvalidRequest("Lyrics cannot be empty".to_string()));
    }
    let genre = canonical_genre(&request.genre)?;
    let seed = parse_seed(request.seed)?;
    ensure_available(&state, JobKind::Song)?;

    let lyrics_preview = lyrics_preview(&request.lyrics);
    let (filename, info) = run_job(&state, JobKind::Song, |output_path| GenerationJob {
        kind: JobKind::Song,
        lyrics: Some(request.lyrics),
        genre: genre.to_string(),
        audio_prompt: non_empty(request.audio_prompt),
        text_prompt: non_empty(request.text_prompt),
        seed,
        duration_seconds: None,
        output_path,
    })
    .await?;

    Ok(Json(GenerationResponse::success(
        "Song generated successfully",
        SongData {
            audio_url: audio_url(&filename),
            filename,
            genre: genre.to_string(),
            info,
            lyrics_preview,
        },
    )))
}

/// Generate instrumental music from a text prompt.
#[instrument(name = "generate::music", skip_all)]
pub async fn music(
    State(state): State<AppState>,
    payload: Result<Json<MusicRequest>, JsonRejection>,
) -> Result<Json<GenerationResponse<MusicData>>, AppError> {
    let Json(request) = payload?;

    let prompt = request.text_prompt.trim().to_string();
    if prompt.is_empty() {
        return Err(AppError::InvalidRequest(
            "Text prompt cannot be empty".to_string(),
        ));
    }
    let genre = canonical_genre(&request.genre)?;
    let duration = checked_duration(
        request.duration,
        state.config.generation.max_duration_seconds,
    )?;
    let seed = parse_seed(request.seed)?;
    ensure_available(&state, JobKind::Music)?;

    let (filename, info) = run_job(&state, JobKind::Music, |output_path| GenerationJob {
        kind: JobKind::Music,
        lyrics: None,
        genre: genre.to_string(),
        audio_prompt: None,
        text_prompt: Some(prompt.clone()),
        seed,
        duration_seconds: Some(duration),
        output_path,
    })
    .await?;

    Ok(Json(GenerationResponse::success(
        "Music generated successfully",
        MusicData {
            audio_url: audio_url(&filename),
            filename,
            genre: genre.to_string(),
            duration,
            prompt,
            info,
        },
    )))
}

fn ensure_available(state: &AppState, kind: JobKind) -> Result<(), AppError> {
    if state.backend.is_available() {
        return Ok(());
    }
    let message = match kind {
        JobKind::Song => "Song generation service not available. Models may be loading.",
        JobKind::Music => "Music generation service not available",
    };
    Err(AppError::BackendUnavailable(message.to_string()))
}

/// Run one job on the backend and return the output file name and generation info.
async fn run_job<F>(
    state: &AppState,
    kind: JobKind,
    build: F,
) -> Result<(String, GenerationInfo), AppError>
where
    F: FnOnce(PathBuf) -> GenerationJob,
{
    let filename = output_filename(kind, Local::now());
    let job = build(state.config.storage.output_dir.join(&filename));
    let timeout = state.config.generation.timeout();

    let _slot = state.generations.acquire().await;
    tracing::info!(
        backend = state.backend.name(),
        genre = %job.genre,
        seed = ?job.seed,
        filename = %filename,
        "Starting generation"
    );

    let result = match tokio::time::timeout(timeout, state.backend.generate(&job)).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::TimedOut(timeout.as_secs())),
    };

    match result {
        Ok(info) => {
            tracing::info!(filename = %filename, "Generation finished");
            Ok((filename, info))
        }
        Err(e) => {
            discard_partial_output(&job.output_path).await;
            Err(e.into())
        }
    }
}

/// Remove whatever a failed job left behind so it cannot be downloaded.
async fn discard_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Failed to remove partial output"
        ),
    }
}

/// Match a genre case-insensitively and return its canonical spelling.
pub fn canonical_genre(genre: &str) -> Result<&'static str, AppError> {
    let genre = genre.trim();
    GENRES
        .iter()
        .find(|known| known.eq_ignore_ascii_case(genre))
        .copied()
        .ok_or_else(|| {
            AppError::InvalidRequest(format!(
                "Unknown genre {:?}. Available genres: {}",
                genre,
                GENRES.join(", ")
            ))
        })
}

/// `-1` means random; any other negative seed is rejected.
pub fn parse_seed(seed: i64) -> Result<Option<u64>, AppError> {
    match seed {
        RANDOM_SEED => Ok(None),
        s if s >= 0 => Ok(Some(s as u64)),
        s => Err(AppError::InvalidRequest(format!(
            "Seed must be -1 (random) or a non-negative integer, got {}",
            s
        ))),
    }
}

/// Requested duration, or the default when unset.
pub fn checked_duration(requested: Option<u32>, max: u32) -> Result<u32, AppError> {
    let duration = requested.unwrap_or(DEFAULT_MUSIC_DURATION_SECS.min(max));
    if duration == 0 {
        return Err(AppError::InvalidRequest(
            "Duration must be at least 1 second".to_string(),
        ));
    }
    if duration > max {
        return Err(AppError::InvalidRequest(format!(
            "Duration max {} seconds",
            max
        )));
    }
    Ok(duration)
}

/// First characters of the lyrics, with `...` when truncated.
pub fn lyrics_preview(lyrics: &str) -> String {
    let mut chars = lyrics.chars();
    let preview: String = chars.by_ref().take(LYRICS_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn audio_url(filename: &str) -> String {
    format!("/outputs/{}", filename)
}
