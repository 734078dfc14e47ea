use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{LevelFilter, info};
use std::fs;
use std::process::ExitCode;

use toolshed::app::App;
use toolshed::cli::Cli;
use toolshed::config::Config;
use toolshed::error::ToolshedError;
use toolshed::session::HostLauncher;

fn setup_logging(config: &Config, verbose: bool) -> Result<()> {
    let log_dir = config.state.logs_dir();
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join(format!("{}.log", env!("CARGO_PKG_NAME")));

    // Logs go to a file; stdout carries only results
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let mut builder = env_logger::Builder::new();
    builder.parse_filters(config.log_level.as_deref().unwrap_or("info"));
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Session hosts are this same binary, launched with the same configuration
fn host_launcher(cli: &Cli, config: &Config) -> Result<HostLauncher> {
    let mut launcher = HostLauncher::current_exe().context("Failed to locate the toolshed executable")?;
    if let Some(path) = &cli.config {
        launcher = launcher.arg("--config").arg(path);
    }
    launcher = launcher.arg("--catalogue").arg(&config.catalogue.root);
    if cli.is_verbose() {
        launcher = launcher.arg("--verbose");
    }
    Ok(launcher)
}

async fn run_application(cli: &Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(root) = &cli.catalogue {
        config = config.with_catalogue_root(root);
    }

    setup_logging(&config, cli.is_verbose()).context("Failed to setup logging")?;
    info!("Starting with config from: {:?}", cli.config);

    let launcher = host_launcher(cli, &config)?;
    let app = App::new(config, launcher);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    app.run(&cli.command, &mut out).await?;
    Ok(())
}

fn report_error(report: &eyre::Report) {
    match report.downcast_ref::<ToolshedError>() {
        Some(err) => {
            eprintln!("{}: {}", format!("error[{}]", err.kind()).red().bold(), err);
            if let Some(payload) = err.payload() {
                eprintln!("{}", serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string()));
            }
        }
        None => eprintln!("{}: {:#}", "error".red().bold(), report),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_application(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            log::error!("{:#}", report);
            report_error(&report);
            ExitCode::FAILURE
        }
    }
}
