use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::stream::{self, StreamExt};
use reqwest::Method;
use resilient_dispatch::{
    Config, ConfigOverrides, HttpTransport, Request, ResilientDispatcher, Response,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "resilient-dispatch", version, about = "Send requests through a circuit breaker, timeouts and retries")]
struct Cli {
    /// Configuration file (TOML); defaults to the per-user config location
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    /// Base URL of the downstream service
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Consecutive failed requests before the circuit opens
    #[arg(long, global = true)]
    failure_threshold: Option<u32>,

    /// Retries after the first attempt
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Per-attempt timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// How long the circuit stays open, in milliseconds
    #[arg(long, global = true)]
    break_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dispatch requests and print one JSON line per response
    Send {
        /// Request path, resolved against the base URL
        #[arg(default_value = "/")]
        path: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request body
        #[arg(short, long)]
        data: Option<String>,

        /// Number of requests to send
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Requests in flight at once
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Serialize)]
struct ResponseLine {
    index: usize,
    status: u16,
    failure: Option<resilient_dispatch::FailureKind>,
    bytes: usize,
    elapsed_ms: u128,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    let overrides = ConfigOverrides {
        base_url: cli.base_url.clone(),
        failure_threshold: cli.failure_threshold,
        max_retries: cli.max_retries,
        per_attempt_timeout_ms: cli.timeout_ms,
        break_duration_ms: cli.break_ms,
    };
    config
        .apply_overrides(&overrides)
        .context("invalid command-line override")?;

    Ok(config)
}

async fn send(
    config: &Config,
    request: Request,
    count: usize,
    concurrency: usize,
) -> Result<()> {
    let transport = HttpTransport::new(&config.transport).context("failed to build HTTP transport")?;
    let dispatcher = Arc::new(ResilientDispatcher::new(&config.dispatcher, Arc::new(transport)));

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight requests");
            ctrl_c_token.cancel();
        }
    });

    info!(count, concurrency, "Dispatching requests to {}", config.transport.base_url);

    let mut lines = stream::iter(0..count)
        .map(|index| {
            let dispatcher = dispatcher.clone();
            let request = request.clone();
            let cancel = cancel.clone();
            async move {
                let started = Instant::now();
                let response = dispatcher.dispatch_with_cancel(request, &cancel).await;
                (index, started.elapsed().as_millis(), response)
            }
        })
        .buffer_unordered(concurrency.max(1));

    while let Some((index, elapsed_ms, response)) = lines.next().await {
        println!("{}", serde_json::to_string(&line(index, elapsed_ms, &response))?);
    }

    let metrics = dispatcher.breaker_metrics();
    info!(
        state = ?metrics.state,
        total_calls = metrics.total_calls,
        rejected_calls = metrics.rejected_calls,
        "Circuit breaker summary"
    );
    Ok(())
}

fn line(index: usize, elapsed_ms: u128, response: &Response) -> ResponseLine {
    ResponseLine {
        index,
        status: response.status.as_u16(),
        failure: response.failure,
        bytes: response.body.len(),
        elapsed_ms,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = load_config(&cli)?;

    match &cli.command {
        Command::Send {
            path,
            method,
            data,
            count,
            concurrency,
        } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("invalid HTTP method: {method}"))?;
            let mut request = Request::new(method, path.clone());
            if let Some(data) = data {
                request = request.with_body(data.clone().into_bytes());
            }
            send(&config, request, *count, *concurrency).await
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}
