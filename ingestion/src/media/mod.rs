pub mod faststart;
pub mod probe;

use std::ffi::OsString;
use std::io;
use std::process::Stdio;

use async_trait::async_trait;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with status {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Capability to run an external media tool against local files: spawn it,
/// wait for it to exit, and hand back its complete stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[OsString]) -> Result<Vec<u8>, ToolError>;
}

/// Runs tools as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[OsString]) -> Result<Vec<u8>, ToolError> {
        let io_err = |source: io::Error| ToolError::Io {
            program: program.to_string(),
            source,
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| io_err(io::Error::other("stdout was not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io_err(io::Error::other("stderr was not captured")))?;

        // both pipes are drained together so a chatty stderr can't block the child
        let mut stdout_buf = Vec::new();
        let read_stdout = stdout.read_to_end(&mut stdout_buf);
        let read_stderr = async {
            let mut stderr_reader = BufReader::new(stderr).lines();
            let mut stderr_lines = vec![];
            while let Some(line) = stderr_reader.next_line().await? {
                stderr_lines.push(line);
            }
            Ok::<_, io::Error>(stderr_lines)
        };

        let (stdout_result, stderr_result) = tokio::join!(read_stdout, read_stderr);
        stdout_result.map_err(io_err)?;
        let stderr_lines = stderr_result.map_err(io_err)?;

        let status = child.wait().await.map_err(io_err)?;
        if !status.success() {
            let stderr_output = stderr_lines.join("\n");
            tracing::error!("{} command failed with status: {:?}\nStderr: {}", program, status, stderr_output);
            return Err(ToolError::Failed {
                program: program.to_string(),
                code: status.code(),
                stderr: stderr_output,
            });
        }

        Ok(stdout_buf)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_of_successful_command() {
        let out = ProcessRunner
            .run("sh", &["-c".into(), "printf '{\"streams\": []}'".into()])
            .await
            .unwrap();

        assert_eq!(out, b"{\"streams\": []}");
    }

    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let err = ProcessRunner
            .run("sh", &["-c".into(), "echo broken input >&2; exit 3".into()])
            .await
            .unwrap_err();

        match err {
            ToolError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken input");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let err = ProcessRunner
            .run("definitely-not-a-real-media-tool", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
