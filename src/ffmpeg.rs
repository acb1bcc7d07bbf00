//! FFmpeg command wrapper utilities

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum FfmpegError {
    #[error("FFmpeg not found: {0}")]
    NotInstalled(String),

    #[error("FFmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed { exit_code: Option<i32>, stderr: String },

    #[error("FFmpeg timed out after {0:?}")]
    TimedOut(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct FfmpegCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    /// Overwrite outputs without asking.
    pub fn overwrite(self) -> Self {
        self.args(&["-y"])
    }

    /// Quiet banner and progress; errors still go to stderr.
    pub fn quiet(self) -> Self {
        self.args(&["-hide_banner", "-loglevel", "error"])
    }

    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push("-i".to_string());
        self.args.push(path.as_ref().display().to_string());
        self
    }

    /// Add an input that starts decoding at `seconds` (fast input seek).
    pub fn input_at(mut self, path: impl AsRef<Path>, seconds: u32) -> Self {
        self.args.push("-ss".to_string());
        self.args.push(seconds.to_string());
        self.input(path)
    }

    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().display().to_string());
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    /// Run to completion. The child is killed if the timeout fires or the
    /// returned future is dropped.
    pub async fn execute(self, timeout: Option<Duration>) -> Result<Output, FfmpegError> {
        let program = self.program.display().to_string();
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => FfmpegError::NotInstalled(program.clone()),
                _ => FfmpegError::Io(e),
            })?;

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| FfmpegError::TimedOut(limit))??,
            None => child.wait_with_output().await?,
        };

        if !output.status.success() {
            return Err(FfmpegError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_order() {
        let cmd = FfmpegCommand::new("ffmpeg")
            .overwrite()
            .input_at("/videos/demo.mov", 425)
            .args(&["-frames:v", "1"])
            .output("/frames/out.jpg");

        assert_eq!(
            cmd.arg_list(),
            ["-y", "-ss", "425", "-i", "/videos/demo.mov", "-frames:v", "1", "/frames/out.jpg"]
        );
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let err = FfmpegCommand::new("/nonexistent/ffmpeg-binary")
            .execute(None)
            .await
            .unwrap_err();
        assert!(matches!(err, FfmpegError::NotInstalled(_)));
    }

    #[tokio::test]
    async fn test_timeout_kills_tool() {
        let start = std::time::Instant::now();
        let err = FfmpegCommand::new("sleep")
            .args(&["5"])
            .execute(Some(Duration::from_millis(50)))
            .await
            .unwrap_err();

        assert!(matches!(err, FfmpegError::TimedOut(limit) if limit == Duration::from_millis(50)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let err = FfmpegCommand::new("sh")
            .args(&["-c", "echo boom >&2; exit 3"])
            .execute(Some(Duration::from_secs(5)))
            .await
            .unwrap_err();

        match err {
            FfmpegError::ExecutionFailed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
