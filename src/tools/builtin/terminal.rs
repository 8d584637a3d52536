//! `terminal_command` tool: run a shell command after deny-list and
//! working-directory checks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{info, warn};

use crate::config::TerminalConfig;
use crate::error::{DasiError, Result};
use crate::tools::arguments::ToolArguments;
use crate::tools::tool::{Tool, ToolExecutionContext};
use crate::tools::types::ToolParameters;

use super::truncate_utf8;

pub const NAME: &str = "terminal_command";

const OUTPUT_MAX_BYTES: usize = 32_768;
const SUPPORTED_SHELLS: [&str; 4] = ["bash", "sh", "zsh", "fish"];

pub struct TerminalCommandTool {
    deny: Vec<Regex>,
    default_timeout: Duration,
    parameters: ToolParameters,
}

impl TerminalCommandTool {
    pub fn new(config: &TerminalConfig) -> Result<Self> {
        let deny = config
            .deny_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    DasiError::Configuration(format!("invalid terminal deny pattern '{pattern}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            deny,
            default_timeout: Duration::from_secs(config.timeout_secs.max(1)),
            parameters: ToolParameters::object()
                .string("command", "The shell command to execute", true)
                .string(
                    "working_dir",
                    "Directory to run the command in (defaults to the home directory)",
                    false,
                )
                .integer("timeout", "Maximum execution time in seconds", false)
                .string_enum(
                    "shell_type",
                    "Shell to run the command with",
                    &SUPPORTED_SHELLS,
                    false,
                )
                .build(),
        })
    }

    fn denied_by(&self, command: &str) -> Option<&Regex> {
        self.deny.iter().find(|re| re.is_match(command))
    }
}

fn home_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// `~`, `~/...` and `$HOME` expand to the home directory; no value means home.
fn resolve_working_dir(raw: Option<&str>) -> PathBuf {
    let home = home_dir();
    match raw.map(str::trim) {
        None | Some("") | Some("~") | Some("$HOME") => home,
        Some(path) => {
            if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("$HOME/")) {
                home.join(rest)
            } else {
                PathBuf::from(path)
            }
        }
    }
}

fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Requested shell if supported and installed, else the login shell, else `sh`.
fn resolve_shell(requested: Option<&str>) -> String {
    if let Some(shell) = requested {
        if SUPPORTED_SHELLS.contains(&shell) && find_in_path(shell).is_some() {
            return shell.to_string();
        }
        warn!(shell, "requested shell unavailable, using default");
    }
    std::env::var("SHELL")
        .ok()
        .and_then(|path| {
            Path::new(&path)
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
        })
        .filter(|name| SUPPORTED_SHELLS.contains(&name.as_str()))
        .unwrap_or_else(|| "sh".to_string())
}

fn format_output(dir: &Path, shell: &str, command: &str, stdout: &str, stderr: &str) -> String {
    let mut data = format!(
        "Directory: {}\nShell: {shell}\nCommand: {command}\n\n",
        dir.display()
    );
    let stdout = stdout.trim();
    if stdout.is_empty() {
        data.push_str("(Command executed with no output)");
    } else {
        data.push_str(&format!("```\n{stdout}\n```"));
    }
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        data.push_str(&format!("\n\nErrors:\n```\n{stderr}\n```"));
    }
    if data.len() > OUTPUT_MAX_BYTES {
        data = truncate_utf8(&data, OUTPUT_MAX_BYTES);
        data.push_str("\n... (truncated)");
    }
    data
}

#[async_trait]
impl Tool for TerminalCommandTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Execute a shell command on the user's machine and return its output"
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        _ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value> {
        let command = args.get_non_empty_str("command")?;

        if let Some(pattern) = self.denied_by(command) {
            warn!(command, pattern = %pattern, "terminal command refused by deny-list");
            return Err(DasiError::tool(
                NAME,
                format!("Command '{command}' is not allowed for security reasons"),
            ));
        }

        let dir = resolve_working_dir(args.get_str_opt("working_dir"));
        if !dir.is_dir() {
            return Err(DasiError::tool(
                NAME,
                format!("Working directory '{}' does not exist", dir.display()),
            ));
        }

        let shell = resolve_shell(args.get_str_opt("shell_type"));
        let timeout = args
            .get_u64_opt("timeout")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        info!(command, dir = %dir.display(), shell = %shell, "running terminal command");
        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new(&shell)
                .arg("-c")
                .arg(command)
                .current_dir(&dir)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(DasiError::tool(NAME, format!("Failed to execute command: {e}"))),
            Err(_) => {
                return Err(DasiError::tool(
                    NAME,
                    format!("Command timed out after {} seconds", timeout.as_secs()),
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut data = format_output(&dir, &shell, command, &stdout, &stderr);
        let exit_code = output.status.code();
        let succeeded = output.status.success();
        if !succeeded {
            data.push_str(&format!(
                "\n\nCommand failed with exit code {}",
                exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
            ));
        }

        Ok(serde_json::json!({
            "status": if succeeded { "success" } else { "error" },
            "exit_code": exit_code,
            "data": data,
        }))
    }
}
