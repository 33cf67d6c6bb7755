//! `sense_factory` - run the factory hardware suite against an attached device.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};

use sense_factory::checks::default_suite;
use sense_factory::console::{Console, ScriptedConsole, TerminalConsole};
use sense_factory::device::{DeviceRpc, MockDevice};
use sense_factory::logging::{self, LogConfig};
use sense_factory::{query_device_info, FactoryConfig, FactoryError, RunMetadata, TestRunner};

#[derive(Parser, Debug)]
#[command(name = "sense_factory", version, about = "Factory hardware tests for the Enviro+ sensor pack")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Run against a simulated device that passes every check
    #[arg(long = "simulate", action = ArgAction::SetTrue)]
    simulate: bool,

    /// Answer every operator prompt with "yes" without waiting
    #[arg(long = "unattended", action = ArgAction::SetTrue)]
    unattended: bool,

    /// Write the JSON report to this file
    #[arg(long = "report")]
    report: Option<PathBuf>,

    /// Write the operator transcript to this file
    #[arg(long = "operator-log")]
    operator_log: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long = "dump-config", action = ArgAction::SetTrue)]
    dump_config: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config =
        FactoryConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(path) = &cli.operator_log {
        config.application.operator_log = Some(path.clone());
    }

    if cli.dump_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    logging::init(&LogConfig::from(&config.application))
        .context("Failed to initialize logging")?;

    let device = connect(&cli)?;
    println!("Connected to attached device");
    if let Some(path) = &config.application.operator_log {
        println!("Factory logs: {}", path.display());
    }

    let device_id = match query_device_info(device.as_ref()).await {
        Ok(id) => id,
        Err(FactoryError::ServiceNotFound) => {
            eprintln!("No factory service exists on the connected device.");
            eprintln!();
            eprintln!("Make sure that your device is running an up-to-date factory app.");
            return Ok(ExitCode::FAILURE);
        }
        Err(e @ FactoryError::DeviceTimeout { .. }) => {
            eprintln!("Timed out while trying to query device info: {e}");
            eprintln!();
            eprintln!("Please re-flash your device and try again.");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => {
            eprintln!("Failed to query device info: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let console: Box<dyn Console> = if cli.unattended {
        Box::new(ScriptedConsole::unattended().echo(true))
    } else {
        Box::new(TerminalConsole::new())
    };

    let metadata = RunMetadata::new(config.operator(), device_id);
    info!(operator = %metadata.operator, device_id = %metadata.device_id_hex(), "starting suite");

    let runner = TestRunner::new(&config, console.as_ref());
    let report = runner
        .run(
            device.as_ref(),
            default_suite(&config),
            metadata,
            interrupted(),
        )
        .await;

    if let Some(path) = &cli.report {
        report
            .write_json_to(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }
    if let Some(dir) = &config.application.report_dir {
        let path = report
            .write_json(dir)
            .with_context(|| format!("Failed to write report into {}", dir.display()))?;
        println!("Report: {}", path.display());
    }

    if report.interrupted {
        // A prompt's stdin read may still be pending on the blocking pool.
        std::process::exit(if report.success() { 0 } else { 1 });
    }

    Ok(if report.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Selects the device collaborator. Only the simulated device is built in.
fn connect(cli: &Cli) -> Result<Box<dyn DeviceRpc>> {
    if cli.simulate {
        return Ok(Box::new(MockDevice::happy_path()));
    }
    anyhow::bail!("no device transport is configured; run with --simulate")
}

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
