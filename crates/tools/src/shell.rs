//! Shell tool: run one allowlisted program without a shell.
//!
//! The command line is split on whitespace and executed directly, so
//! pipes, redirects and substitutions never reach an interpreter. They are
//! rejected up front anyway so the model gets a clear error.

use async_trait::async_trait;
use clawloop_core::error::ToolError;
use clawloop_core::tool::{Tool, ToolArguments, ToolErrorKind, ToolParameter, ToolResult};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::required_str;

const METACHARACTERS: &[&str] = &[";", "|", "&", "`", "$(", ">", "<", "\n"];
const DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "mkfs",
    "dd if=",
    "shutdown",
    "reboot",
    ":(){",
    "chmod -r 777 /",
];

pub const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ShellTool {
    allowed_commands: Vec<String>,
    working_dir: PathBuf,
    timeout: Duration,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            allowed_commands,
            working_dir: working_dir.into(),
            timeout: DEFAULT_SHELL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check the command line and split it into program and arguments.
    fn check(&self, command: &str) -> Result<Vec<String>, ToolError> {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Err(ToolError::invalid("shell", "command must not be empty"));
        }
        if let Some(meta) = METACHARACTERS.iter().find(|m| trimmed.contains(*m)) {
            return Err(ToolError::denied(
                "shell",
                format!("shell metacharacter '{}' is not allowed", meta.escape_default()),
            ));
        }
        let lower = trimmed.to_lowercase();
        if let Some(pattern) = DANGEROUS_PATTERNS.iter().find(|p| lower.contains(*p)) {
            return Err(ToolError::denied(
                "shell",
                format!("command matches blocked pattern '{pattern}'"),
            ));
        }

        let parts: Vec<String> = trimmed.split_whitespace().map(String::from).collect();
        let program = parts.first().map(String::as_str).unwrap_or_default();
        if !self.allowed_commands.iter().any(|a| a == program) {
            return Err(ToolError::denied(
                "shell",
                format!("command '{program}' is not in the allowlist"),
            ));
        }
        Ok(parts)
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run an allowlisted command (no pipes, redirects or chaining) in the workspace and return stdout, stderr and the exit code."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::string("command", "Command line, e.g. 'git status'")]
    }

    fn strict(&self) -> bool {
        true
    }

    fn timeout(&self) -> Option<Duration> {
        // One second of slack so the process timeout below reports first.
        Some(self.timeout + Duration::from_secs(1))
    }

    async fn execute(&self, arguments: ToolArguments) -> Result<ToolResult, ToolError> {
        let command = required_str(&arguments, self.name(), "command")?;
        let parts = self.check(command)?;

        debug!(command = %command, "Executing shell command");
        let child = Command::new(&parts[0])
            .args(&parts[1..])
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::failed(
                    self.name(),
                    format!("cannot run '{}': {e}", parts[0]),
                ));
            }
            Err(_) => {
                return Err(ToolError::Timeout {
                    tool_name: self.name().into(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().unwrap_or(-1);

        let mut text = stdout.trim_end().to_string();
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("[stderr]\n");
            text.push_str(stderr.trim_end());
        }
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!("[exit code: {code}]"));

        if output.status.success() {
            Ok(ToolResult::ok(text))
        } else {
            warn!(command = %command, exit_code = code, "Command failed");
            Ok(ToolResult {
                success: false,
                output: text.clone(),
                error: Some(text),
                error_kind: Some(ToolErrorKind::Execution),
                data: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool() -> ShellTool {
        ShellTool::new(
            vec!["ls".into(), "echo".into(), "git".into(), "sleep".into(), "false".into()],
            std::env::temp_dir(),
        )
    }

    fn args(command: &str) -> ToolArguments {
        json!({ "command": command }).as_object().cloned().unwrap()
    }

    #[test]
    fn allowlist_check() {
        let tool = tool();
        assert!(tool.check("ls -la").is_ok());
        assert!(tool.check("git status").is_ok());
        assert!(tool.check("sudo something").is_err());
        assert!(tool.check("rm file").is_err());
        assert!(ShellTool::new(vec![], ".").check("ls").is_err());
    }

    #[test]
    fn metacharacters_rejected() {
        let tool = tool();
        for cmd in ["ls; rm x", "ls | wc", "echo hi > f", "echo $(id)", "ls && ls", "echo `id`"] {
            let err = tool.check(cmd).unwrap_err();
            assert!(matches!(err, ToolError::PermissionDenied { .. }), "{cmd}");
        }
    }

    #[test]
    fn dangerous_patterns_rejected() {
        let tool = ShellTool::new(vec!["rm".into(), "dd".into()], ".");
        assert!(tool.check("rm -rf /").is_err());
        assert!(tool.check("dd if=/dev/zero of=/dev/sda").is_err());
    }

    #[test]
    fn schema_is_strict() {
        let def = tool().definition();
        assert!(def.strict);
        let err = def
            .validate(&json!({"command": "ls", "cwd": "/"}).as_object().cloned().unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("cwd"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_echo() {
        let result = tool().execute(args("echo hello world")).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "hello world\n[exit code: 0]");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_failure_with_output() {
        let result = tool().execute(args("false")).await.unwrap();
        assert!(!result.success);
        assert!(result.to_message_content().contains("[exit code: 1]"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let tool = tool().with_timeout(Duration::from_millis(100));
        let err = tool.execute(args("sleep 5")).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }
}
