// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Main entry point for the mcp-contract harness
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

use mcp_contract::config::{ConfigOverrides, HarnessConfig};
use mcp_contract::scenario::{Outcome, Scenario, ScenarioDriver, SessionFactory, SuiteReport};

/// Exit code when the harness cannot run at all
const EXIT_HARNESS_FAILURE: u8 = 2;

#[derive(Parser, Debug)]
#[command(version, about = "Verify an MCP server against its contract", long_about = None)]
struct Cli {
    /// Server command line (e.g. "biomcp serve"). Overrides MCP_TEST_CMD.
    #[arg(long)]
    mcp_cmd: Option<String>,

    /// Per-call timeout in seconds. Overrides MCP_TEST_TIMEOUT.
    #[arg(long, value_name = "SECONDS")]
    mcp_timeout: Option<f64>,

    /// Reference document whose markers must appear in the tool description
    #[arg(long)]
    reference: Option<PathBuf>,

    /// YAML file overriding the built-in contract
    #[arg(long)]
    expectations: Option<PathBuf>,

    /// Run only these scenarios (repeatable). Defaults to all.
    #[arg(long = "scenario", value_enum)]
    scenarios: Vec<Scenario>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// List scenario names and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    install_panic_hook();

    if cli.list {
        for scenario in Scenario::ALL {
            println!("{}", scenario);
        }
        return ExitCode::SUCCESS;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(EXIT_HARNESS_FAILURE);
        }
    };

    if let Err(e) = init_tracing(&config) {
        eprintln!("Failed to init tracing: {}", e);
    }

    match run(&cli, &config).await {
        Ok(report) => {
            if let Err(e) = print_report(&report, cli.json) {
                eprintln!("Error: {:#}", e);
                return ExitCode::from(EXIT_HARNESS_FAILURE);
            }
            ExitCode::from(report.exit_code())
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_HARNESS_FAILURE)
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<HarnessConfig> {
    let config = HarnessConfig::from_env().context("invalid environment configuration")?;
    let config = config.apply(ConfigOverrides {
        mcp_command: cli.mcp_cmd.clone(),
        mcp_timeout_secs: cli.mcp_timeout,
        reference_path: cli.reference.clone(),
        expectations_path: cli.expectations.clone(),
    })?;
    Ok(config)
}

async fn run(cli: &Cli, config: &HarnessConfig) -> anyhow::Result<SuiteReport> {
    let expectations = config.load_expectations()?;
    let reference = config.load_reference()?;
    let factory = SessionFactory::new(config.server_parameters()?, config.session_options()?);

    info!(
        "Verifying '{}' (timeout {}s)",
        config.mcp_command, config.mcp_timeout_secs
    );

    let driver = ScenarioDriver::new(factory, expectations).with_reference(reference);
    let report = if cli.scenarios.is_empty() {
        driver.run_all().await
    } else {
        driver.run_selected(&cli.scenarios).await
    };
    Ok(report)
}

fn print_report(report: &SuiteReport, json: bool) -> anyhow::Result<()> {
    if json {
        let text = serde_json::to_string_pretty(report).context("failed to encode report")?;
        println!("{}", text);
        return Ok(());
    }

    for result in &report.results {
        match &result.outcome {
            Outcome::Passed => println!("PASS  {} ({} ms)", result.scenario, result.elapsed_ms),
            Outcome::ServerBroken(msg) => println!("FAIL  {}: {}", result.scenario, msg),
            Outcome::HarnessFailure(msg) => println!("ERROR {}: {}", result.scenario, msg),
        }
    }
    println!(
        "{}/{} scenarios passed",
        report.passed(),
        report.results.len()
    );
    Ok(())
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC: {} at {}", message, location);
    }));
}

fn init_tracing(config: &HarnessConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("mcp_contract=debug,info"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.log_format == "json" {
        subscriber.json().try_init()?;
    } else {
        subscriber.try_init()?;
    }

    Ok(())
}
