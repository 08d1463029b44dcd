//! CLI argument parsing for the playbook test harness.
use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "playtest",
    version,
    about = "Scenario-driven playbook tests with mocked steps and trace verification",
    after_help = "Examples:\n  playtest run playbooks/site.yml --scenario happy_path\n  playtest run site.yml -s outage -e env=staging --keep-mocks\n  playtest list --config-dir tests/ansible\n  playtest discover --json\n  ANSIBLE_MOCK_COMMUNITY_GENERAL_FILESIZE_CONFIG=cfg.json playtest mock-step --step community.general.filesize --params '{\"path\": \"/tmp/x\"}'\n  playtest mock-step --record --task 'Check size' --step community.general.filesize --params '{\"path\": \"/tmp/x\"}'",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    List(ListArgs),
    Discover(DiscoverArgs),
    MockStep(MockStepArgs),
}

/// Where to find the project configuration.
#[derive(Args, Debug, Default, Clone)]
pub struct ConfigArgs {
    /// Project root that relative config paths are anchored to
    #[arg(long, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Explicit config file instead of playtest.json
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Run a playbook under a scenario and verify the trace")]
pub struct RunArgs {
    /// Playbook to run (relative to cwd or the config dir)
    #[arg(value_name = "PLAYBOOK")]
    pub playbook: PathBuf,

    /// Scenario name or path
    #[arg(long, short = 's', value_name = "NAME")]
    pub scenario: String,

    /// Inventory passed to the runner
    #[arg(long, short = 'i', value_name = "PATH")]
    pub inventory: Option<PathBuf>,

    /// Extra variable for the playbook; repeatable
    #[arg(long = "extra-var", short = 'e', value_name = "KEY=VALUE", value_parser = parse_extra_var)]
    pub extra_vars: Vec<(String, String)>,

    /// Keep the staging directory and report its paths
    #[arg(long, short = 'k')]
    pub keep_mocks: bool,

    /// Runner command line, overriding config and PLAYTEST_RUNNER
    #[arg(long, value_name = "CMD")]
    pub runner: Option<String>,

    /// Runner verbosity (number of -v flags)
    #[arg(long, value_name = "N")]
    pub verbosity: Option<u8>,

    /// Emit the run details as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Parser, Debug)]
#[command(about = "List available scenarios")]
pub struct ListArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Pair scenarios with the playbooks they name")]
pub struct DiscoverArgs {
    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Answer one mocked step invocation from its staged config")]
pub struct MockStepArgs {
    /// Step id, e.g. community.general.filesize
    #[arg(long, value_name = "ID")]
    pub step: String,

    /// Invocation parameters as a JSON object
    #[arg(long, value_name = "JSON", default_value = "{}")]
    pub params: String,

    /// Resolve from this scenario's mock table instead of the staged config
    #[arg(long, short = 's', value_name = "NAME")]
    pub scenario: Option<String>,

    /// Append the call and its result to the run's execution trace
    #[arg(long)]
    pub record: bool,

    /// Trace directory for --record (defaults to $ANSIBLE_TEST_TMP_DIR)
    #[arg(long, value_name = "DIR", requires = "record")]
    pub trace_dir: Option<PathBuf>,

    /// Task label stored with the recorded call
    #[arg(long, value_name = "NAME")]
    pub task: Option<String>,

    /// Host the recorded call ran on
    #[arg(long, value_name = "HOST", default_value = "localhost")]
    pub host: String,

    /// Playbook name for a trace started by this call
    #[arg(long, value_name = "NAME")]
    pub playbook: Option<String>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

pub fn parse_extra_var(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("extra var key must be non-empty in {raw:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_var_splits_on_first_equals() {
        assert_eq!(
            parse_extra_var("query=a=b").unwrap(),
            ("query".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_extra_var(" env =").unwrap(),
            ("env".to_string(), String::new())
        );
        assert!(parse_extra_var("novalue").is_err());
        assert!(parse_extra_var("=x").is_err());
    }

    #[test]
    fn run_args_parse() {
        let args = RootArgs::try_parse_from([
            "playtest",
            "run",
            "site.yml",
            "-s",
            "happy",
            "-e",
            "a=1",
            "--extra-var",
            "b=2",
            "-k",
            "--config-dir",
            "/proj",
        ])
        .unwrap();
        let Command::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.playbook, PathBuf::from("site.yml"));
        assert_eq!(run.scenario, "happy");
        assert_eq!(run.extra_vars.len(), 2);
        assert!(run.keep_mocks);
        assert_eq!(run.config.config_dir, Some(PathBuf::from("/proj")));
    }

    #[test]
    fn mock_step_trace_dir_needs_record() {
        let parsed = RootArgs::try_parse_from([
            "playtest", "mock-step", "--step", "svc", "--trace-dir", "/tmp/t",
        ]);
        assert!(parsed.is_err());
        let args = RootArgs::try_parse_from([
            "playtest", "mock-step", "--step", "svc", "--record", "--task", "Check",
        ])
        .unwrap();
        let Command::MockStep(step) = args.command else {
            panic!("expected mock-step");
        };
        assert!(step.record);
        assert_eq!(step.host, "localhost");
        assert_eq!(step.task.as_deref(), Some("Check"));
        assert!(step.trace_dir.is_none());
    }

    #[test]
    fn run_requires_a_scenario() {
        assert!(RootArgs::try_parse_from(["playtest", "run", "site.yml"]).is_err());
    }
}
