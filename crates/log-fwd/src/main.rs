// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use clap::Parser;
use std::backtrace::Backtrace;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use logfwd::buffer::{RecordBuffer, RingBuffer};
use logfwd::config::{self, Config, TransportKind};
use logfwd::delivery::Delivery;
use logfwd::hostname::get_hostname;
use logfwd::ingest::{DrainOutcome, Ingestor};
use logfwd::logger;
use logfwd::signal::wakeup_channel;
use logfwd::stats::{run_reporter, DeliveryStats};
use logfwd::transport::build_transport;

/// Time given to blocking tasks (the stdin reader) once everything else is done
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(200);

/// Forwards lines read from stdin to a remote log collector, buffering them
/// on disk until they are delivered.
#[derive(Debug, Parser)]
#[command(name = "log_fwd", version)]
struct Args {
    /// Log destination host
    #[arg(long, env = "LOG_FWD_HOST", default_value = "")]
    host: String,

    /// Log destination port
    #[arg(long, env = "LOG_FWD_PORT", default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Full endpoint URL, overrides host and port for the HTTP transport
    #[arg(long, env = "LOG_FWD_URL")]
    url: Option<String>,

    /// Path to a PEM certificate bundle (system certificates when absent)
    #[arg(long = "cert", env = "LOG_FWD_CERT")]
    cert_file: Option<PathBuf>,

    /// Skip server certificate verification
    #[arg(short = 'k', long = "insecure", env = "LOG_FWD_INSECURE")]
    insecure_tls: bool,

    /// Authorization token, required for the HTTP transport
    #[arg(long = "token", env = "LOG_FWD_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// Wire transport: `http` or `stream`
    #[arg(long, env = "LOG_FWD_TRANSPORT", default_value = "http")]
    transport: TransportKind,

    /// Program name stamped on every record
    #[arg(long = "program", env = "LOG_FWD_PROGRAM", default_value = config::DEFAULT_PROGRAM_NAME)]
    program_name: String,

    /// Path to the buffer file
    #[arg(long = "buffer", env = "LOG_FWD_BUFFER", default_value = config::DEFAULT_BUFFER_PATH)]
    buffer_path: PathBuf,

    /// Maximum buffer size in bytes
    #[arg(long = "maxsize", env = "LOG_FWD_MAX_SIZE", default_value_t = config::DEFAULT_MAX_BUFFER_SIZE)]
    max_buffer_size: u64,

    /// Send records one at a time
    #[arg(long, env = "LOG_FWD_NO_BATCHING")]
    no_batching: bool,

    /// Records per request when batching
    #[arg(long, env = "LOG_FWD_BATCH_SIZE", default_value_t = config::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Attempts after the first before a record is dropped
    #[arg(long, env = "LOG_FWD_MAX_RETRIES", default_value_t = config::DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Overall HTTP client timeout, in seconds
    #[arg(long = "timeout", env = "LOG_FWD_TIMEOUT", default_value_t = config::DEFAULT_HTTP_TIMEOUT.as_secs())]
    http_timeout_secs: u64,

    /// Timeout of each request, connect or write, in seconds
    #[arg(long = "request-timeout", env = "LOG_FWD_REQUEST_TIMEOUT", default_value_t = config::DEFAULT_REQUEST_TIMEOUT.as_secs())]
    request_timeout_secs: u64,

    /// Idle polling interval of the delivery loop, in milliseconds
    #[arg(long = "poll-interval", env = "LOG_FWD_POLL_INTERVAL", default_value_t = 1000)]
    polling_interval_ms: u64,

    /// Statistics report interval, in seconds
    #[arg(long = "stats-interval", env = "LOG_FWD_STATS_INTERVAL", default_value_t = config::DEFAULT_STATS_INTERVAL.as_secs())]
    stats_interval_secs: u64,

    /// Gzip request bodies
    #[arg(long, env = "LOG_FWD_COMPRESS")]
    compress: bool,

    /// Don't echo input lines to stdout
    #[arg(short, long, env = "LOG_FWD_QUIET")]
    quiet: bool,

    /// Enable verbose debug logging
    #[arg(short, long, env = "LOG_FWD_VERBOSE")]
    verbose: bool,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config {
            host: args.host,
            port: args.port,
            url: args.url,
            cert_file: args.cert_file,
            insecure_tls: args.insecure_tls,
            auth_token: args.auth_token,
            transport: args.transport,
            program_name: args.program_name,
            buffer_path: args.buffer_path,
            max_buffer_size: args.max_buffer_size,
            enable_batching: !args.no_batching,
            batch_size: args.batch_size,
            max_retries: args.max_retries,
            http_timeout: Duration::from_secs(args.http_timeout_secs),
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            polling_interval: Duration::from_millis(args.polling_interval_ms),
            compress: args.compress,
            quiet: args.quiet,
            verbose: args.verbose,
            stats_interval: Duration::from_secs(args.stats_interval_secs),
            ..Config::default()
        }
    }
}

fn main() -> ExitCode {
    let config = Config::from(Args::parse());

    let default_level = if config.verbose { "debug" } else { "info" };
    let log_level = env::var("LOG_FWD_LOG_LEVEL").unwrap_or_else(|_| default_level.to_string());
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(logger::env_filter(&log_level))
        .with_ansi(false)
        .event_format(logger::Formatter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("{} | ERROR | setting default subscriber failed: {e}", logger::LOG_PREFIX);
    }

    std::panic::set_hook(Box::new(|panic_info| {
        error!(
            "Fatal error: {}\nStacktrace:\n{}",
            panic_info,
            Backtrace::force_capture()
        );
        std::process::exit(1);
    }));

    if let Err(e) = config.validate() {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(run(config));
    // The stdin reader may still be parked in a blocking read
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    code
}

async fn run(config: Config) -> ExitCode {
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let buffer = match RingBuffer::open(&config.buffer_path, config.max_buffer_size) {
        Ok(buffer) => Arc::new(buffer),
        Err(e) => {
            error!(
                "Failed to open buffer {}: {}",
                config.buffer_path.display(),
                e
            );
            return ExitCode::FAILURE;
        }
    };

    let tls_config =
        match logfwd_tls::load_client_config(config.cert_file.as_deref(), config.insecure_tls) {
            Ok(tls_config) => tls_config,
            Err(e) => {
                error!("Failed to load TLS configuration: {}", e);
                return ExitCode::FAILURE;
            }
        };

    let transport = match build_transport(&config, tls_config) {
        Ok(transport) => transport,
        Err(e) => {
            error!("Failed to create {} transport: {}", config.transport, e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Forwarding logs from stdin to {} over {}",
        transport.destination(),
        config.transport
    );

    let stats = Arc::new(DeliveryStats::new());
    let (wakeup_tx, wakeup_rx) = wakeup_channel();
    let delivery = Delivery::new(
        buffer.clone(),
        transport,
        wakeup_rx,
        Arc::clone(&stats),
        &config,
    );
    let delivery_handle = tokio::spawn(delivery.run(cancel.clone()));
    let reporter_handle = tokio::spawn(run_reporter(
        Arc::clone(&stats),
        config.stats_interval,
        cancel.clone(),
    ));

    let ingestor = Ingestor::new(
        buffer.clone(),
        wakeup_tx,
        Arc::clone(&stats),
        get_hostname(),
        &config,
    );
    let summary = ingestor
        .run(tokio::io::stdin(), tokio::io::stdout(), &cancel)
        .await;
    info!(
        "Input finished: {} lines read, {} stored, {} rejected",
        summary.lines, summary.written, summary.failed
    );

    match ingestor.drain_wait(&summary, &cancel).await {
        DrainOutcome::Stalled => warn!(
            "Exiting with {} bytes still buffered in {}",
            buffer.size(),
            config.buffer_path.display()
        ),
        outcome => debug!("Drain finished: {:?}", outcome),
    }

    cancel.cancel();
    if let Err(e) = delivery_handle.await {
        error!("Delivery task failed: {}", e);
    }
    if let Err(e) = reporter_handle.await {
        error!("Stats reporter task failed: {}", e);
    }
    if let Err(e) = buffer.close() {
        error!("Error closing buffer: {}", e);
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn cancel_on_signal(cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sighup) =
        match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
            (Ok(sigterm), Ok(sighup)) => (sigterm, sighup),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to install signal handlers: {}", e);
                return;
            }
        };

    let received = tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sighup.recv() => "SIGHUP",
    };
    info!("Received {}, shutting down", received);
    cancel.cancel();
}

#[cfg(not(unix))]
async fn cancel_on_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        return;
    }
    info!("Received Ctrl-C, shutting down");
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_into_config() {
        let args = Args::try_parse_from([
            "log_fwd",
            "--host",
            "logs.example.com",
            "--port",
            "6514",
            "--token",
            "abc",
            "--transport",
            "stream",
            "--no-batching",
            "--maxsize",
            "2048",
            "-q",
        ])
        .unwrap();
        let config = Config::from(args);

        assert_eq!(config.host, "logs.example.com");
        assert_eq!(config.port, 6514);
        assert_eq!(config.transport, TransportKind::Stream);
        assert!(!config.enable_batching);
        assert_eq!(config.max_buffer_size, 2048);
        assert!(config.quiet);
        assert_eq!(config.drain_stall_ticks, config::DEFAULT_DRAIN_STALL_TICKS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_fail_validation_without_host() {
        let config = Config::from(Args::try_parse_from(["log_fwd"]).unwrap());
        assert_eq!(config.port, 443);
        assert_eq!(config.batch_size, 10);
        assert!(config.validate().is_err());
    }
}
