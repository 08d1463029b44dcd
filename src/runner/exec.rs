use crate::config::RunnerConfig;
use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, ExitStatus};

/// Everything the external runner needs for one invocation.
pub struct ExecutionRequest<'a> {
    pub playbook: &'a Path,
    pub inventory: Option<&'a Path>,
    pub extra_vars: &'a Map<String, Value>,
    /// Staged variables merged over the inherited environment.
    pub env: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub return_code: i32,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.return_code == 0
    }
}

/// Runs a playbook and reports its return code.
pub trait PlaybookExecutor {
    fn execute(&self, request: &ExecutionRequest<'_>) -> Result<ExecutionOutcome>;
}

/// Spawns the configured runner program as a child process.
pub struct CommandExecutor {
    runner: RunnerConfig,
}

impl CommandExecutor {
    pub fn new(runner: RunnerConfig) -> Self {
        Self { runner }
    }
}

impl PlaybookExecutor for CommandExecutor {
    fn execute(&self, request: &ExecutionRequest<'_>) -> Result<ExecutionOutcome> {
        let program = which::which(&self.runner.program)
            .map_err(|err| anyhow!("runner {:?} not found: {err}", self.runner.program))?;
        let args = build_runner_args(&self.runner, request)?;
        tracing::info!(
            program = %program.display(),
            command = %format_command_line(&self.runner.program, &args),
            "invoking runner"
        );
        let mut cmd = Command::new(&program);
        cmd.args(&args);
        for (key, value) in request.env {
            cmd.env(key, value);
        }
        let status = cmd
            .status()
            .with_context(|| format!("spawn {}", program.display()))?;
        let return_code = status.code().unwrap_or(-1);
        tracing::info!(status = %exit_status_string(&status), "runner finished");
        Ok(ExecutionOutcome { return_code })
    }
}

pub(crate) fn build_runner_args(runner: &RunnerConfig, request: &ExecutionRequest<'_>) -> Result<Vec<String>> {
    let mut args = runner.args.clone();
    args.push(request.playbook.display().to_string());
    if let Some(inventory) = request.inventory {
        args.push("-i".to_string());
        args.push(inventory.display().to_string());
    }
    if !request.extra_vars.is_empty() {
        let encoded = serde_json::to_string(request.extra_vars).context("encode extra vars")?;
        args.push("--extra-vars".to_string());
        args.push(encoded);
    }
    if runner.verbosity > 0 {
        args.push(format!("-{}", "v".repeat(usize::from(runner.verbosity))));
    }
    Ok(args)
}

fn exit_status_string(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        format!("{code}")
    } else {
        "terminated by signal".to_string()
    }
}

fn format_command_line(program: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program.to_string());
    parts.extend(args.iter().cloned());
    shell_words::join(parts)
}
