use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use engage_client::{api_key_from_env, HttpDeliverySink, HttpSinkConfig};
use engage_core::settings::{load_settings, load_settings_from_path};
use engage_core::Properties;
use engage_pipeline::{Analytics, AnalyticsConfig, DeliverySink, LogSink};
use engage_telemetry::{init_telemetry, TelemetryConfig};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::Level;

#[derive(Parser)]
#[command(name = "engage", version, about = "Drive the engage activity pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a JSON-lines intent script through the pipeline.
    Replay(ReplayArgs),
}

#[derive(Args)]
struct ReplayArgs {
    /// Script path, or `-` for stdin.
    script: String,
    /// Settings file (defaults to ~/.engage/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Print payloads to stdout instead of sending them.
    #[arg(long)]
    dry_run: bool,
    /// Override the debounce window.
    #[arg(long)]
    debounce_ms: Option<u64>,
    /// Log the metrics snapshot when the replay finishes.
    #[arg(long)]
    metrics: bool,
    /// Per-module log level, e.g. `engage_pipeline=debug`. Repeatable.
    #[arg(long = "log-module", value_parser = parse_module_level)]
    log_module: Vec<(String, Level)>,
}

fn parse_module_level(s: &str) -> Result<(String, Level), String> {
    let (module, level) = s
        .split_once('=')
        .ok_or_else(|| format!("expected MODULE=LEVEL, got {s:?}"))?;
    if module.is_empty() {
        return Err("module name is empty".into());
    }
    let level = level
        .parse::<Level>()
        .map_err(|_| format!("unknown log level {level:?}"))?;
    Ok((module.to_string(), level))
}

/// One line of a replay script.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ScriptOp {
    Identify {
        #[serde(alias = "userId")]
        user_id: String,
        #[serde(default)]
        properties: Properties,
    },
    Anonymous,
    Profile {
        #[serde(default)]
        properties: Properties,
    },
    Group {
        #[serde(default, alias = "groupId")]
        group_id: Option<String>,
        #[serde(default)]
        properties: Properties,
    },
    Track {
        name: String,
        #[serde(default)]
        attributes: Properties,
        #[serde(default)]
        interactive: bool,
    },
    Screen {
        title: String,
        #[serde(default)]
        attributes: Properties,
    },
    Flush,
    Sleep {
        ms: u64,
    },
    Reset,
}

/// Parse a script. Blank lines and lines starting with `#` are skipped.
fn parse_script(reader: impl BufRead) -> Result<Vec<ScriptOp>> {
    let mut ops = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading script line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let op = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid script entry on line {}", idx + 1))?;
        ops.push(op);
    }
    Ok(ops)
}

fn read_script(source: &str) -> Result<Vec<ScriptOp>> {
    if source == "-" {
        return parse_script(std::io::stdin().lock());
    }
    let path = Path::new(source);
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening script {}", path.display()))?;
    parse_script(BufReader::new(file))
}

async fn run_script(analytics: &Analytics, ops: Vec<ScriptOp>) {
    for op in ops {
        tracing::debug!(?op, "replaying");
        match op {
            ScriptOp::Identify {
                user_id,
                properties,
            } => analytics.identify(user_id, properties),
            ScriptOp::Anonymous => analytics.anonymous(),
            ScriptOp::Profile { properties } => analytics.update_profile(properties),
            ScriptOp::Group {
                group_id,
                properties,
            } => analytics.group(group_id, properties),
            ScriptOp::Track {
                name,
                attributes,
                interactive,
            } => analytics.track(name, attributes, interactive),
            ScriptOp::Screen { title, attributes } => analytics.screen(title, attributes),
            ScriptOp::Flush => analytics.flush(),
            ScriptOp::Sleep { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
            ScriptOp::Reset => analytics.reset(),
        }
    }
}

async fn replay(args: ReplayArgs) -> Result<()> {
    let mut settings = match &args.settings {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("loading settings")?;
    if let Some(ms) = args.debounce_ms {
        settings.pipeline.debounce_ms = ms;
    }

    let telemetry = init_telemetry(
        TelemetryConfig {
            json: settings.telemetry.json_logs,
            ..TelemetryConfig::default()
        }
        .with_level_str(&settings.telemetry.log_level),
    );
    for (module, level) in &args.log_module {
        telemetry.set_module_level(module, *level);
    }

    if settings.account_id.is_empty() {
        bail!("accountId is not configured (settings file or ENGAGE_ACCOUNT_ID)");
    }

    let ops = read_script(&args.script)?;

    let sink: Arc<dyn DeliverySink> = if args.dry_run {
        Arc::new(LogSink::stdout())
    } else {
        let config = HttpSinkConfig::from_settings(&settings, api_key_from_env());
        Arc::new(HttpDeliverySink::new(config).context("building HTTP sink")?)
    };

    let analytics = Analytics::builder(AnalyticsConfig::from_settings(&settings), sink)
        .metrics(telemetry.metrics())
        .build()?;

    let mut qualifications = analytics.subscribe();
    let _ = tokio::spawn(async move {
        loop {
            match qualifications.recv().await {
                Ok(q) => tracing::info!(
                    user_id = %q.user_id,
                    events = ?q.event_names,
                    result = %q.result.body,
                    "delivered"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "qualification listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let count = ops.len();
    tracing::info!(ops = count, dry_run = args.dry_run, "replay started");
    run_script(&analytics, ops).await;
    analytics.shutdown().await;
    tracing::info!(ops = count, "replay finished");

    if args.metrics {
        if let Some(metrics) = telemetry.metrics() {
            for sample in metrics.snapshot() {
                tracing::info!(
                    name = %sample.name,
                    value = sample.value,
                    labels = ?sample.labels,
                    "metric"
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Replay(args) => replay(args).await,
    }
}
