//! The concolic tracer: an external collaborator out of scope for this crate (spec §1).
//!
//! The real symbolic-execution engine lives elsewhere; this module only specifies the seam
//! `TraceScorer` uses to reach it, plus a subprocess-based default implementation that shells
//! out to a configured tracer executable.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::testcase::Testcase;

#[derive(Debug, thiserror::Error)]
pub enum TracerError {
    #[error("failed to spawn the tracer process")]
    Spawn(#[source] std::io::Error),

    #[error("tracer exited with a non-zero status")]
    NonZeroExit,

    #[error("tracer stdout did not contain a parseable path length")]
    UnparseableOutput,
}

/// A numeric property of the concolic trace's last live execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceResult {
    pub path_length: u64,
}

/// Re-executes the target under concolic semantics and reports a property of the resulting
/// execution trace. Implementations are external-process collaborators: the core never links
/// against a symbolic execution engine directly.
pub trait ConcolicTracer: Send + Sync {
    fn trace(&self, testcase: &Testcase) -> Result<TraceResult, TracerError>;
}

/// Invokes a standalone tracer executable, feeding it the testcase on standard input and
/// parsing a single decimal integer (the path length) from its standard output.
#[derive(Debug, derive_new::new)]
pub struct ProcessTracer {
    tracer_path: PathBuf,
    target_path: PathBuf,
    target_args: Vec<String>,
}

impl ConcolicTracer for ProcessTracer {
    fn trace(&self, testcase: &Testcase) -> Result<TraceResult, TracerError> {
        use std::io::Write;
        use std::process::Stdio;

        let mut child = Command::new(&self.tracer_path)
            .arg(&self.target_path)
            .args(&self.target_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(TracerError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(testcase.as_bytes());
        }

        let output = child.wait_with_output().map_err(TracerError::Spawn)?;
        if !output.status.success() {
            return Err(TracerError::NonZeroExit);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path_length = stdout
            .trim()
            .lines()
            .last()
            .and_then(|line| line.trim().parse::<u64>().ok())
            .ok_or(TracerError::UnparseableOutput)?;

        Ok(TraceResult { path_length })
    }
}

/// Whether `args` contains the engine's file-input placeholder token.
pub fn uses_file_placeholder(args: &[String], placeholder: &str) -> bool {
    args.iter().any(|arg| arg == placeholder)
}

pub const FILE_PLACEHOLDER: &str = "@@";

/// Materializes `testcase` at `path` so a file-reading target has something to read.
pub fn write_input_file(path: &Path, testcase: &Testcase) -> std::io::Result<()> {
    std::fs::write(path, testcase.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_file_placeholder() {
        let args = vec!["--input".to_owned(), FILE_PLACEHOLDER.to_owned()];
        assert!(uses_file_placeholder(&args, FILE_PLACEHOLDER));
        assert!(!uses_file_placeholder(&["--verbose".to_owned()], FILE_PLACEHOLDER));
    }

    #[test]
    fn writes_input_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("input");
        write_input_file(&path, &Testcase::new(b"hello".to_vec())).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }
}
