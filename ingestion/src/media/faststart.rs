use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempPath;

use super::{CommandRunner, ToolError};

const OUTPUT_SUFFIX: &str = ".processing";

#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("remux finished but produced no output at {0}")]
    MissingOutput(PathBuf),
}

/// Rewrites an MP4 so its index sits at the head of the file, which lets
/// players start before the whole download completes. Streams are copied,
/// never re-encoded.
#[derive(Clone)]
pub struct StreamOptimizer {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl StreamOptimizer {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        StreamOptimizer {
            runner,
            program: program.into(),
        }
    }

    /// Writes `<input>.processing` next to the input and returns it as a
    /// path that is deleted when dropped. The input file is left alone.
    pub async fn optimize(&self, input: &Path) -> Result<TempPath, OptimizeError> {
        let output = output_path(input);
        // owned before the tool runs, so a partial file goes away on failure
        let output = TempPath::from_path(output);

        let args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            input.as_os_str().to_owned(),
            "-c".into(),
            "copy".into(),
            "-movflags".into(),
            "faststart".into(),
            "-f".into(),
            "mp4".into(),
            output.as_os_str().to_owned(),
        ];

        tracing::info!("Remuxing {} for fast start", input.display());
        self.runner.run(&self.program, &args).await?;

        if !tokio::fs::try_exists(&*output).await.unwrap_or(false) {
            return Err(OptimizeError::MissingOutput(output.to_path_buf()));
        }

        Ok(output)
    }
}

fn output_path(input: &Path) -> PathBuf {
    let mut output = input.as_os_str().to_owned();
    output.push(OUTPUT_SUFFIX);
    PathBuf::from(output)
}
