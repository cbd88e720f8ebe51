//! External generator process.
//!
//! Each job spawns the configured command once. The job goes to the child's
//! stdin as a single JSON line, and the output path is also exported as
//! `SONGGEN_OUTPUT_PATH` so plain scripts need not parse JSON. The child must
//! exit successfully and leave the output file behind. If the last non-empty
//! line of its stdout is a JSON object, that object becomes the generation
//! info; other stdout is treated as log noise.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::instrument;

use super::{BackendError, GenerationInfo, GenerationJob, InferenceBackend};
use crate::config::{ServiceConfig, ENV_CACHE_DIR, ENV_UNBUFFERED};

/// Environment variable carrying the output path to the child
pub const ENV_OUTPUT_PATH: &str = "SONGGEN_OUTPUT_PATH";

/// How much of the child's stderr ends up in an error message
const STDERR_TAIL_BYTES: usize = 2048;

/// Runs a generator program for every job.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    cache_dir: PathBuf,
    unbuffered: bool,
}

impl CommandBackend {
    /// Build from a command line. Returns `None` for an empty command.
    pub fn new(command: &[String], cache_dir: PathBuf, unbuffered: bool) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            cache_dir,
            unbuffered,
        })
    }

    pub fn from_config(config: &ServiceConfig) -> Option<Self> {
        Self::new(
            &config.generation.command,
            config.storage.cache_dir.clone(),
            config.generation.unbuffered_output,
        )
    }

    fn command(&self, job: &GenerationJob) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(ENV_CACHE_DIR, &self.cache_dir)
            .env(ENV_OUTPUT_PATH, &job.output_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.unbuffered {
            command.env(ENV_UNBUFFERED, "1");
        }
        command
    }
}

#[async_trait]
impl InferenceBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.program
    }

    fn is_available(&self) -> bool {
        true
    }

    #[instrument(name = "backend::command", skip(self, job), fields(kind = ?job.kind, output = %job.output_path.display()))]
    async fn generate(&self, job: &GenerationJob) -> Result<GenerationInfo, BackendError> {
        let mut child = self
            .command(job)
            .spawn()
            .map_err(|source| BackendError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let mut request = serde_json::to_vec(job)?;
        request.push(b'\n');
        let stdin = child.stdin.take();
        // Output is drained while the job is written; either side may fill its pipe first
        let write_job = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(&request).await {
                // A generator that ignores stdin may exit before we finish writing
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    tracing::debug!("Generator closed stdin early");
                    Ok(())
                }
                other => other,
            }
        };

        let (written, output) = tokio::join!(write_job, child.wait_with_output());
        let output = output?;
        written?;
        if !output.status.success() {
            return Err(BackendError::Failed {
                status: output.status,
                stderr: stderr_tail(&output.stderr),
            });
        }

        if !tokio::fs::try_exists(&job.output_path).await? {
            return Err(BackendError::MissingOutput(job.output_path.clone()));
        }

        let info = parse_info(&output.stdout)?;
        tracing::debug!(fields = info.len(), "Generator finished");
        Ok(info)
    }
}

/// Extract the generation info from the child's stdout.
fn parse_info(stdout: &[u8]) -> Result<GenerationInfo, BackendError> {
    let text = String::from_utf8_lossy(stdout);
    let last = text.lines().rev().map(str::trim).find(|line| !line.is_empty());

    match last {
        Some(line) if line.starts_with('{') => Ok(serde_json::from_str(line)?),
        _ => Ok(GenerationInfo::new()),
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}
