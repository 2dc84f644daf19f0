//! External command execution.
//!
//! Every backend variant expresses its mutations purely in terms of
//! [`CommandRunner::run`], so drivers can be exercised in tests with a
//! scripted runner instead of real storage tooling.

use std::process::Command;

use tracing::{debug, error};

use crate::error::{Result, StorageError};

/// Captured result of one external command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Process exit code.
    pub code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Diagnostic text for error reporting: stderr when present, stdout otherwise.
    pub fn diagnostic(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Executes external storage commands.
///
/// `run` returns an error on non-zero exit, carrying the tool's diagnostic
/// output. Callers rewrap that error with operation-specific context.
pub trait CommandRunner: Send + Sync {
    /// Run `argv` to completion and capture its output.
    fn run(&self, argv: &[&str]) -> Result<CommandOutput>;
}

/// Runs commands on the local node via `std::process::Command`.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

impl SystemRunner {
    /// Create a new system runner.
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[&str]) -> Result<CommandOutput> {
        let (cmd, args) = argv.split_first().ok_or_else(|| {
            StorageError::InvalidStorageConfiguration("empty command line".to_string())
        })?;

        debug!(command = %cmd, args = ?args, "Executing command");

        let output = Command::new(cmd).args(args).output().map_err(|e| {
            StorageError::ExternalCommand {
                context: format!("Failed to execute {}", cmd),
                output: e.to_string(),
            }
        })?;

        let result = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !output.status.success() {
            error!(command = %cmd, code = result.code, stderr = %result.stderr, "Command failed");
            return Err(StorageError::ExternalCommand {
                context: format!("{} exited with code {}", cmd, result.code),
                output: result.diagnostic().to_string(),
            });
        }

        Ok(result)
    }
}

/// Parse decimal size output from the storage tools ("  1024.00 ") into
/// whole megabytes, truncating fractions.
pub(crate) fn parse_megabytes(raw: &str) -> Option<u64> {
    raw.trim().parse::<f64>().ok().map(|mb| mb as u64)
}

/// Rewrap a command failure with operation-specific context, leaving other
/// error kinds untouched.
pub(crate) fn with_context(context: &str, err: StorageError) -> StorageError {
    match err {
        StorageError::ExternalCommand { output, .. } => StorageError::ExternalCommand {
            context: context.to_string(),
            output,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_true_command_succeeds() {
        let runner = SystemRunner::new();
        let out = runner.run(&["true"]).unwrap();
        assert_eq!(out.code, 0);
    }

    #[test]
    fn test_false_command_is_an_error() {
        let runner = SystemRunner::new();
        let err = runner.run(&["false"]).unwrap_err();
        assert!(matches!(err, StorageError::ExternalCommand { .. }));
    }

    #[test]
    fn test_parse_megabytes_truncates() {
        assert_eq!(parse_megabytes("  5000.52\n"), Some(5000));
        assert_eq!(parse_megabytes("0.00"), Some(0));
        assert_eq!(parse_megabytes("no units"), None);
    }

    #[test]
    fn test_diagnostic_prefers_stderr() {
        let out = CommandOutput {
            code: 5,
            stdout: "ignored".to_string(),
            stderr: "volume group not found".to_string(),
        };
        assert_eq!(out.diagnostic(), "volume group not found");

        let out = CommandOutput {
            code: 5,
            stdout: "only stdout".to_string(),
            stderr: String::new(),
        };
        assert_eq!(out.diagnostic(), "only stdout");
    }
}
