use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde_json::{Map, Value};
use std::env;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod mock;
mod report;
mod runner;
mod scenario;
mod staging;
mod substitute;
mod trace;
mod util;
mod verify;

use cli::{Command, ConfigArgs, DiscoverArgs, ListArgs, MockStepArgs, RootArgs, RunArgs};
use config::{load_config, ConfigEnv, ConfigOverrides, HarnessConfig};
use runner::{Harness, RunRequest};
use staging::TEST_TMP_DIR_ENV;
use trace::StepCall;

const EXIT_FAIL: u8 = 1;
const EXIT_INPUT_ERROR: u8 = 2;

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let args = RootArgs::parse();
    let result = match args.command {
        Command::Run(args) => cmd_run(args),
        Command::List(args) => cmd_list(args),
        Command::Discover(args) => cmd_discover(args),
        Command::MockStep(args) => cmd_mock_step(args),
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_INPUT_ERROR)
        }
    }
}

fn resolve_config(args: &ConfigArgs, runner: Option<String>, verbosity: Option<u8>) -> Result<HarnessConfig> {
    let overrides = ConfigOverrides {
        config_dir: args.config_dir.clone(),
        config_file: args.config.clone(),
        runner,
        verbosity,
    };
    load_config(&overrides, &ConfigEnv::from_process())
}

fn cmd_run(args: RunArgs) -> Result<ExitCode> {
    let config = resolve_config(&args.config, args.runner.clone(), args.verbosity)?;
    let extra_vars: Map<String, Value> = args
        .extra_vars
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    let request = RunRequest {
        playbook: args.playbook,
        scenario: args.scenario,
        inventory: args.inventory,
        extra_vars,
        keep_artifacts: args.keep_mocks,
    };
    let harness = Harness::with_command_executor(config);
    let report = harness.run_named(&request);
    if args.json {
        let text = serde_json::to_string_pretty(&report).context("serialize run report")?;
        println!("{text}");
    } else {
        print!("{}", report::render_run(&report.details));
    }
    let details = &report.details;
    if report.success {
        Ok(ExitCode::SUCCESS)
    } else if details.error.is_some() && details.returncode.is_none() {
        Ok(ExitCode::from(EXIT_INPUT_ERROR))
    } else {
        Ok(ExitCode::from(EXIT_FAIL))
    }
}

fn cmd_list(args: ListArgs) -> Result<ExitCode> {
    let config = resolve_config(&args.config, None, None)?;
    let names = config.catalog().list()?;
    if names.is_empty() {
        println!(
            "No scenarios found in {}",
            util::display_path(&config.scenarios_dir, Some(&config.config_dir))
        );
        return Ok(ExitCode::SUCCESS);
    }
    println!("Available scenarios:");
    for name in names {
        println!("  {name}");
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_discover(args: DiscoverArgs) -> Result<ExitCode> {
    let config = resolve_config(&args.config, None, None)?;
    let found = config.catalog().discover()?;
    if args.json {
        let text = serde_json::to_string_pretty(&found).context("serialize discovered scenarios")?;
        println!("{text}");
        return Ok(ExitCode::SUCCESS);
    }
    let base = Some(config.config_dir.as_path());
    for entry in &found {
        println!(
            "{}\n  scenario: {}\n  playbook: {}",
            entry.id,
            util::display_path(&entry.scenario_path, base),
            util::display_path(&entry.playbook_path, base)
        );
    }
    println!("{} scenario(s) discovered", found.len());
    Ok(ExitCode::SUCCESS)
}

fn cmd_mock_step(args: MockStepArgs) -> Result<ExitCode> {
    let params: Value = serde_json::from_str(&args.params)
        .with_context(|| format!("parse --params {:?}", args.params))?;
    let Value::Object(params) = params else {
        return Err(anyhow!("--params must be a JSON object"));
    };
    let result = match &args.scenario {
        Some(name) => {
            let config = resolve_config(&args.config, None, None)?;
            let scenario = config.catalog().load(name)?;
            mock::resolve(&scenario, &args.step, &params)?.module_result()
        }
        None => mock::module_result_for_step(&args.step, &params),
    };
    if args.record {
        let dir = args
            .trace_dir
            .clone()
            .or_else(|| env::var_os(TEST_TMP_DIR_ENV).map(PathBuf::from))
            .ok_or_else(|| anyhow!("--record needs --trace-dir or {TEST_TMP_DIR_ENV}"))?;
        let call = StepCall {
            step: &args.step,
            task: args.task.as_deref(),
            host: &args.host,
            params,
            result: result.clone(),
        };
        trace::append_call(&dir, args.playbook.as_deref().unwrap_or_default(), call)
            .with_context(|| format!("record {} call", args.step))?;
    }
    let text = serde_json::to_string(&result).context("serialize module result")?;
    println!("{text}");
    if result.get("failed").and_then(Value::as_bool).unwrap_or(false) {
        Ok(ExitCode::from(EXIT_FAIL))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
