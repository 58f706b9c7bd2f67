use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use throttler::config::ThrottlerConfig;
use throttler::throttling::{SystemTimeSource, Throttler};

/// Evaluate requests read from stdin against configured usage limits.
///
/// Each input line is `<client-id> [cost]`. One decision is written per line.
#[derive(Debug, Parser)]
#[command(name = "throttler", version, about)]
struct Cli {
    /// YAML file declaring the throttle windows
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cost of a request when the line does not give one
    #[arg(long, default_value_t = 1.0)]
    cost: f64,

    /// Write decisions as JSON lines
    #[arg(long)]
    json: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct Decision<'a> {
    client: &'a str,
    cost: f64,
    admitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ThrottlerConfig::load(cli.config.as_deref())?;
    let throttler = config.build_throttler(Arc::new(SystemTimeSource))?;
    info!(
        throttler = %throttler.name(),
        windows = throttler.definitions().definition_count(),
        policy = ?config.policy,
        "Throttler initialized"
    );

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let client = parts.next().unwrap_or_default();
        let cost = match parts.next() {
            Some(raw) => match raw.parse::<f64>() {
                Ok(cost) => cost,
                Err(e) => {
                    warn!(line = %line, error = %e, "Skipping line with invalid cost");
                    continue;
                }
            },
            None => cli.cost,
        };

        let decision = match throttler.proceed_with_cost(client, cost) {
            Ok(admitted) => Decision {
                client,
                cost,
                admitted,
                reason: None,
            },
            Err(e) => Decision {
                client,
                cost,
                admitted: false,
                reason: Some(e.to_string()),
            },
        };
        write_decision(&mut out, &decision, cli.json)?;
    }

    info!(clients = throttler.tracked_clients(), "Input exhausted");
    Ok(())
}

fn write_decision(out: &mut impl Write, decision: &Decision<'_>, json: bool) -> anyhow::Result<()> {
    if json {
        serde_json::to_writer(&mut *out, decision)?;
        writeln!(out)?;
        return Ok(());
    }

    let verdict = if decision.admitted { "ADMIT" } else { "DENY" };
    match &decision.reason {
        Some(reason) => writeln!(
            out,
            "{} {} {}: {}",
            verdict, decision.client, decision.cost, reason
        )?,
        None => writeln!(out, "{} {} {}", verdict, decision.client, decision.cost)?,
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
