//! CommandTransformer - runs the transformation as an external program.
//!
//! The program is started once per task with `{input}` and `{output}` substituted
//! in its arguments. Progress is read from its stdout: any line of the form
//! `PROGRESS <percent>` is relayed. Everything else on stdout is logged at debug.
//! Exit status 0 plus an existing output file means success.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::TransformError;
use crate::ports::{ProgressReporter, Transformer};

const STDERR_TAIL_LINES: usize = 5;

#[derive(Debug, Clone)]
pub struct CommandTransformer {
    program: String,
    args: Vec<String>,
}

impl CommandTransformer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace-separated command line such as `sorawm-run --in {input} --out {output}`.
    ///
    /// No shell quoting rules: arguments cannot contain spaces.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    fn render_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|a| a.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }
}

/// `PROGRESS 42` -> `Some(42)`.
fn parse_progress(line: &str) -> Option<u8> {
    let rest = line.trim().strip_prefix("PROGRESS")?;
    let value: u32 = rest.trim().trim_end_matches('%').parse().ok()?;
    Some(value.min(100) as u8)
}

async fn relay_stdout(stdout: impl AsyncRead + Unpin, progress: ProgressReporter) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match parse_progress(&line) {
            Some(pct) => progress.report(pct),
            None => debug!(line = %line, "transformer stdout"),
        }
    }
}

async fn collect_stderr_tail(stderr: impl AsyncRead + Unpin) -> Vec<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into()
}

#[async_trait]
impl Transformer for CommandTransformer {
    async fn transform(
        &self,
        input: &Path,
        workdir: &Path,
        progress: ProgressReporter,
    ) -> Result<PathBuf, TransformError> {
        let ext = input
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let output = workdir.join(format!("output{ext}"));

        let mut child = Command::new(&self.program)
            .args(self.render_args(input, &output))
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        debug!(program = %self.program, pid = ?child.id(), "transformer started");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let relay = async {
            if let Some(out) = stdout {
                relay_stdout(out, progress).await;
            }
        };
        let tail = async {
            match stderr {
                Some(err) => collect_stderr_tail(err).await,
                None => Vec::new(),
            }
        };
        let ((), tail, status) = tokio::join!(relay, tail, child.wait());
        let status = status?;

        if !status.success() {
            // stderr stays in the log; the task record only learns the exit code
            warn!(
                program = %self.program,
                %status,
                stderr = %tail.join(" | "),
                "transformer failed"
            );
            return Err(TransformError::Exited {
                code: status.code(),
            });
        }
        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(TransformError::MissingOutput(output));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_lines() {
        assert_eq!(parse_progress("PROGRESS 42"), Some(42));
        assert_eq!(parse_progress("  PROGRESS 7% "), Some(7));
        assert_eq!(parse_progress("PROGRESS 300"), Some(100));
        assert_eq!(parse_progress("progress 5"), None);
        assert_eq!(parse_progress("PROGRESS x"), None);
        assert_eq!(parse_progress("frame=10"), None);
    }

    #[test]
    fn command_line_placeholders() {
        let t = CommandTransformer::from_command_line("run --in {input} --out {output}").unwrap();
        let args = t.render_args(Path::new("/s/in.mp4"), Path::new("/s/output.mp4"));
        assert_eq!(args, vec!["--in", "/s/in.mp4", "--out", "/s/output.mp4"]);
        assert!(CommandTransformer::from_command_line("   ").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_script_success_with_progress() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        std::fs::write(&input, b"abc").unwrap();

        let t = CommandTransformer::new(
            "sh",
            vec![
                "-c".into(),
                "echo 'PROGRESS 10'; echo hello; echo 'PROGRESS 90'; cp \"$0\" \"$1\"".into(),
                "{input}".into(),
                "{output}".into(),
            ],
        );
        let (reporter, mut rx) = ProgressReporter::channel(16);
        let out = t.transform(&input, dir.path(), reporter).await.unwrap();

        assert_eq!(out, dir.path().join("output.bin"));
        assert_eq!(std::fs::read(&out).unwrap(), b"abc");
        let mut seen = Vec::new();
        while let Ok(p) = rx.try_recv() {
            seen.push(p);
        }
        assert_eq!(seen, vec![10, 90]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_reports_only_the_code() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        std::fs::write(&input, b"abc").unwrap();

        let t = CommandTransformer::new(
            "sh",
            vec!["-c".into(), "echo 'no watermark model' >&2; exit 3".into()],
        );
        let err = t
            .transform(&input, dir.path(), ProgressReporter::noop())
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::Exited { code: Some(3) }), "{err:?}");
        assert!(!err.to_string().contains("no watermark model"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn success_without_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        std::fs::write(&input, b"abc").unwrap();

        let t = CommandTransformer::new("true", vec![]);
        let err = t
            .transform(&input, dir.path(), ProgressReporter::noop())
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::MissingOutput(_)));
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let t = CommandTransformer::new("definitely-not-a-real-program-7f3a", vec![]);
        let err = t
            .transform(&dir.path().join("in"), dir.path(), ProgressReporter::noop())
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::Io(_)));
    }
}
