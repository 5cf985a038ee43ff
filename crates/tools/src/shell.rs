//! Shell steps: run system commands under a command policy.
//!
//! Every program in a command line (each segment of a pipeline or `&&`/`;`
//! chain) is checked: blocked programs are always refused, and when an
//! allowlist is configured only listed programs may run. Refusals and
//! timeouts come back as failed outcomes with the conventional exit codes
//! (126 and 124) so the classifier can treat them like any other failure.

use conductor_config::ExecutionConfig;
use conductor_core::executor::ExecutionOutcome;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const EXIT_TIMEOUT: i32 = 124;
const EXIT_DENIED: i32 = 126;

/// Which programs shell steps may run.
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    /// If non-empty, only these programs are allowed.
    allowed: Vec<String>,
    /// Always refused, even when allowlisted.
    blocked: Vec<String>,
}

impl CommandPolicy {
    pub fn new(allowed: Vec<String>, blocked: Vec<String>) -> Self {
        Self { allowed, blocked }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(config.allowed_commands.clone(), config.blocked_commands.clone())
    }

    /// Base program names of every segment of `command`.
    fn programs(command: &str) -> Vec<&str> {
        command
            .split(['|', ';', '&', '\n'])
            .filter_map(|segment| {
                segment
                    .split_whitespace()
                    // skip leading VAR=value assignments
                    .find(|word| !word.contains('='))
            })
            .map(|program| program.rsplit('/').next().unwrap_or(program))
            .collect()
    }

    /// `Err` names the first refused program.
    pub fn check(&self, command: &str) -> Result<(), String> {
        let programs = Self::programs(command);
        if programs.is_empty() {
            return Err("empty command".into());
        }
        for program in programs {
            if self.blocked.iter().any(|b| b == program) {
                return Err(format!("command '{program}' is blocked"));
            }
            if !self.allowed.is_empty() && !self.allowed.iter().any(|a| a == program) {
                return Err(format!("command '{program}' is not in the allowlist"));
            }
        }
        Ok(())
    }
}

/// Runs shell steps in a working directory with a timeout.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    policy: CommandPolicy,
    working_dir: Option<PathBuf>,
    default_timeout: Duration,
}

impl ShellRunner {
    pub fn new(policy: CommandPolicy, default_timeout: Duration) -> Self {
        Self {
            policy,
            working_dir: None,
            default_timeout,
        }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(
            CommandPolicy::from_config(config),
            Duration::from_secs(config.tool_timeout_secs),
        )
        .with_working_dir(config.resolved_working_dir())
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn policy(&self) -> &CommandPolicy {
        &self.policy
    }

    /// Run one command. Never errors: refusals, spawn failures and timeouts
    /// are failed outcomes.
    pub async fn run(&self, command: &str, timeout: Option<Duration>) -> ExecutionOutcome {
        if let Err(reason) = self.policy.check(command) {
            warn!(command = %command, %reason, "Shell command refused");
            return ExecutionOutcome::failure(format!("Permission denied: {reason}"), Some(EXIT_DENIED));
        }

        let timeout = timeout.unwrap_or(self.default_timeout);
        debug!(command = %command, timeout_secs = timeout.as_secs(), "Executing shell command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                return ExecutionOutcome::failure(
                    format!("Failed to prepare working directory {}: {e}", dir.display()),
                    None,
                );
            }
            cmd.current_dir(dir);
        }

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ExecutionOutcome::failure(format!("Failed to spawn shell: {e}"), None);
            }
            Err(_) => {
                warn!(command = %command, timeout_secs = timeout.as_secs(), "Shell command timed out");
                return ExecutionOutcome::failure(
                    format!("Command timed out after {}s", timeout.as_secs()),
                    Some(EXIT_TIMEOUT),
                );
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            return ExecutionOutcome::success(stdout);
        }

        let code = output.status.code().unwrap_or(-1);
        warn!(command = %command, exit_code = code, "Command failed");
        let error = if stderr.is_empty() { stdout.clone() } else { stderr };
        ExecutionOutcome {
            output: stdout,
            artifacts: Vec::new(),
            raw_error: Some(error),
            exit_code: Some(code),
        }
    }
}
