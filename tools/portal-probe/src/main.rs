//! Inspection and smoke-test harness for the GymKit offline workers.
//!
//! Provides commands for:
//! - Classifying a URL the way a worker's router would
//! - Running a worker install against a live origin
//! - Dumping worker configuration
//! - Checking the CRM health and schema endpoints
//!
//! ## Usage
//!
//! ```bash
//! # Which strategy handles a page?
//! portal-probe route https://gym.example/portal/bookings/ --navigate
//!
//! # Precache the public site against staging
//! portal-probe precache --origin https://staging.gym.example --portal public
//!
//! # Health checks, with a JSON report
//! portal-probe health --origin http://localhost:8000 --output health.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use gymkit_common::{init_logging, GymKitError, LogConfig, LogFormat};
use gymkit_net::{HttpFetcher, LoaderConfig, Request};
use gymkit_sw::{Disposition, OfflineWorker, Router, WorkerConfig};
use http::Method;
use serde::Serialize;
use tracing::info;
use url::Url;

mod health;

#[derive(Parser)]
#[command(name = "portal-probe")]
#[command(about = "Inspection and smoke-test harness for the GymKit offline workers")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Log format: pretty, compact or json
    #[arg(long, default_value = "pretty", global = true)]
    log_format: LogFormat,

    /// Tracing filter directives, e.g. "gymkit_sw=debug,reqwest=warn"
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show how a worker routes a request
    Route {
        /// Absolute URL of the request
        url: Url,
        /// Built-in worker: portal or public
        #[arg(short, long, default_value = "portal")]
        portal: String,
        /// Worker configuration file (overrides --portal)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Treat the request as a page navigation
        #[arg(long)]
        navigate: bool,
        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,
    },

    /// Install a worker against a live origin and report what was precached
    Precache {
        /// Origin serving the precache manifest
        #[arg(long)]
        origin: Url,
        /// Built-in worker: portal or public
        #[arg(short, long, default_value = "portal")]
        portal: String,
        /// Worker configuration file (overrides --portal)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print a worker configuration as JSON
    Config {
        /// Built-in worker: portal or public
        #[arg(short, long, default_value = "portal")]
        portal: String,
        /// Validate and print this file instead
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Check the health and schema endpoints of an origin
    Health {
        /// Origin to check
        #[arg(long)]
        origin: Url,
        /// Output JSON report path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
struct RouteReport {
    url: String,
    method: String,
    navigate: bool,
    worker: String,
    disposition: Disposition,
}

#[derive(Debug, Serialize)]
struct PrecacheReport {
    origin: String,
    worker: String,
    cache_name: String,
    ok: bool,
    precached: usize,
    entries: Vec<String>,
    error: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig {
        filter: cli.log_filter.clone(),
        ..LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format)
    });

    match cli.command {
        Commands::Route {
            url,
            portal,
            config,
            navigate,
            method,
        } => {
            let config = load_config(&portal, config.as_deref())?;
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| GymKitError::InvalidArgument(format!("bad method: {method}")))?;

            let request = if navigate {
                Request::navigate(url.clone())
            } else {
                Request::get(url.clone())
            }
            .with_method(method.clone());

            let report = RouteReport {
                url: url.to_string(),
                method: method.to_string(),
                navigate,
                worker: config.label.clone(),
                disposition: Router::new(&config).route(&request),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Precache {
            origin,
            portal,
            config,
        } => {
            let config = load_config(&portal, config.as_deref())?;
            let report = precache(origin, config).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if !report.ok {
                std::process::exit(1);
            }
        }

        Commands::Config { portal, config } => {
            let config = load_config(&portal, config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Health { origin, output } => {
            let fetcher = HttpFetcher::new(LoaderConfig::default())
                .map_err(|e| GymKitError::network_with_source("cannot build HTTP client", e))?;
            let report = health::run(&fetcher, &origin).await?;

            let json = serde_json::to_string_pretty(&report)?;
            println!("{json}");
            if let Some(path) = output {
                std::fs::write(&path, &json)
                    .with_context(|| format!("writing {}", path.display()))?;
                info!(path = %path.display(), "Report written");
            }

            eprintln!("Health checks: {}/{} passed", report.passed, report.total);
            if !report.all_passed() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Built-in configuration by name, or a validated configuration file.
fn load_config(name: &str, path: Option<&Path>) -> gymkit_common::Result<WorkerConfig> {
    match path {
        Some(path) => WorkerConfig::load(path).map_err(|e| {
            GymKitError::config_with_source(format!("cannot load {}", path.display()), e)
        }),
        None => WorkerConfig::named(name)
            .ok_or_else(|| GymKitError::InvalidArgument(format!("unknown worker: {name}"))),
    }
}

async fn precache(origin: Url, config: WorkerConfig) -> gymkit_common::Result<PrecacheReport> {
    let fetcher = HttpFetcher::new(LoaderConfig::default())
        .map_err(|e| GymKitError::network_with_source("cannot build HTTP client", e))?;
    let worker = OfflineWorker::new(config, origin.clone(), Arc::new(fetcher))
        .map_err(|e| GymKitError::worker_with_source("invalid worker configuration", e))?;

    let result = worker.install().await;
    let entries: Vec<String> = worker
        .storage()
        .read()
        .await
        .get(worker.cache_name())
        .map(|cache| cache.keys().into_iter().map(str::to_string).collect())
        .unwrap_or_default();

    let (ok, precached, error) = match result {
        Ok(installed) => (true, installed.precached, None),
        Err(e) => {
            let error = GymKitError::worker_with_source("install failed", e);
            (false, 0, Some(format!("{} ({})", error, error.category())))
        }
    };

    Ok(PrecacheReport {
        origin: origin.to_string(),
        worker: worker.config().label.clone(),
        cache_name: worker.cache_name().to_string(),
        ok,
        precached,
        entries,
        error,
    })
}
