use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use gomoku_sandbox::{Backend, BrokerConfig, SandboxBroker};

/// Run an untrusted Python snippet in a locked-down sandbox
#[derive(Parser, Debug)]
#[command(name = "gomoku-sandbox", version, about)]
struct Cli {
    /// Sandbox configuration file (defaults to SANDBOX_CONFIG or built-in defaults)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Execution backend: docker or isolate
    #[arg(long)]
    backend: Option<String>,

    /// Wall-clock limit in seconds
    #[arg(long, value_name = "SECONDS")]
    time_limit: Option<u32>,

    /// Memory limit in megabytes
    #[arg(long, value_name = "MB")]
    memory_limit: Option<u32>,

    /// Give the snippet network access
    #[arg(long)]
    allow_network: bool,

    /// Mount the snippet's filesystem writable
    #[arg(long)]
    writable_fs: bool,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,

    /// Snippet to run; `-` or nothing reads stdin
    file: Option<PathBuf>,
}

fn read_code(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snippet {:?}", path)),
        _ => {
            let mut code = String::new();
            std::io::stdin()
                .read_to_string(&mut code)
                .context("Failed to read snippet from stdin")?;
            Ok(code)
        }
    }
}

fn build_config(cli: &Cli) -> Result<BrokerConfig> {
    let mut config = BrokerConfig::load(cli.config.as_deref())?;

    if let Some(backend) = &cli.backend {
        config.backend = backend.parse::<Backend>()?;
    }
    if let Some(seconds) = cli.time_limit {
        config.limits.time_limit_seconds = seconds;
    }
    if let Some(mb) = cli.memory_limit {
        config.limits.memory_limit_mb = mb;
    }
    config.limits.network_enabled |= cli.allow_network;
    config.limits.filesystem_writable |= cli.writable_fs;

    config.validate()?;
    if cli.allow_network || cli.writable_fs {
        warn!("Sandbox restrictions relaxed on the command line: {:?}", config.limits);
    }

    Ok(config)
}

async fn run(cli: Cli) -> Result<bool> {
    let config = build_config(&cli)?;
    let code = read_code(cli.file.as_ref())?;

    info!("Using {:?} backend", config.backend);
    let broker = SandboxBroker::from_config(config);
    let report = broker.execute_report(&code, broker.limits()).await;
    let success = report.verdict.is_success();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.output);
        if !report.output.is_empty() && !report.output.ends_with('\n') {
            println!();
        }
    }

    Ok(success)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gomoku_sandbox=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    if run(cli).await? {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
