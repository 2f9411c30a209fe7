//! `resilient-gateway` command line.
//!
//! ```text
//! resilient-gateway [--config gateway.toml] call GET /widgets
//! resilient-gateway probe
//! resilient-gateway --config gateway.toml --watch-config watch --interval-secs 10
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;

use resilient_gateway::config::loader::load_config;
use resilient_gateway::config::watcher::ConfigWatcher;
use resilient_gateway::lifecycle::signals;
use resilient_gateway::observability::{logging, metrics};
use resilient_gateway::{ApiResponse, Gateway, GatewayConfig, RequestDescriptor, Shutdown};

#[derive(Parser)]
#[command(name = "resilient-gateway")]
#[command(about = "Resilient client for a backend HTTP API", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload retry rules, timeouts and alert thresholds when the file changes.
    #[arg(long, requires = "config")]
    watch_config: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one request through the gateway
    Call {
        /// HTTP method
        method: String,
        /// Endpoint path, joined onto the backend base URL
        endpoint: String,
        /// JSON body for non-GET requests
        #[arg(short, long)]
        data: Option<String>,
        /// Extra header, `name:value`
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// Never skip this call because of backend health
        #[arg(long)]
        critical: bool,
        #[arg(long)]
        no_cache: bool,
        #[arg(long)]
        no_retry: bool,
        /// Per-attempt timeout override
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Send the same request this many times
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },
    /// Probe the health endpoint once
    Probe,
    /// Run health checks and sweepers, printing metrics until interrupted
    Watch {
        #[arg(long, default_value_t = 30)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("Failed to initialize logging: {e}");
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.backend.base_url,
        "resilient-gateway starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let gateway = Arc::new(Gateway::from_config(config)?);

    // Keep the notify handle alive for the whole run.
    let _watcher = match (&cli.config, cli.watch_config) {
        (Some(path), true) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            let target = gateway.clone();
            tokio::spawn(async move {
                while let Some(next) = updates.recv().await {
                    target.apply_config(next);
                }
            });
            Some(handle)
        }
        _ => None,
    };

    match cli.command {
        Commands::Call {
            method,
            endpoint,
            data,
            headers,
            critical,
            no_cache,
            no_retry,
            timeout_ms,
            repeat,
        } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())?;
            let mut request = RequestDescriptor::new(method, endpoint);
            for header in &headers {
                let (name, value) = header
                    .split_once(':')
                    .ok_or_else(|| format!("header '{header}' must be name:value"))?;
                request = request.header(
                    HeaderName::from_bytes(name.trim().as_bytes())?,
                    HeaderValue::from_str(value.trim())?,
                );
            }
            if let Some(data) = data {
                request = request.json(serde_json::from_str(&data)?);
            }
            if critical {
                request = request.critical();
            }
            if no_cache {
                request = request.no_cache();
            }
            if no_retry {
                request = request.no_retry();
            }
            if let Some(ms) = timeout_ms {
                request = request.timeout(Duration::from_millis(ms));
            }

            for _ in 0..repeat.max(1) {
                match gateway.call(request.clone()).await {
                    Ok(response) => print_response(&response)?,
                    Err(e) => eprintln!("Error: {e}"),
                }
            }
            println!("{}", serde_json::to_string_pretty(&gateway.snapshot())?);
        }
        Commands::Probe => {
            let status = gateway.health_monitor().probe_once().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Watch { interval_secs } => {
            let shutdown = Shutdown::new();
            let handles = gateway.spawn_background(&shutdown);

            let mut alerts = gateway.metrics().subscribe();
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            let stop = signals::wait_for_signal();
            tokio::pin!(stop);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        println!("{}", serde_json::to_string_pretty(&gateway.snapshot())?);
                    }
                    Ok(alert) = alerts.recv() => {
                        println!("ALERT {}: {}", alert.kind.as_str(), alert.message);
                    }
                    _ = &mut stop => break,
                }
            }

            shutdown.trigger();
            for handle in handles {
                let _ = handle.await;
            }
            tracing::info!("Background tasks stopped");
        }
    }

    Ok(())
}

fn print_response(response: &ApiResponse) -> Result<(), Box<dyn std::error::Error>> {
    println!("{} ({:?})", response.status, response.source);
    match response.json::<serde_json::Value>() {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", response.text()),
    }
    Ok(())
}
