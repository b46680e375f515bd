use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use metafetch::config::AppConfig;
use metafetch::fetch::{FetchOption, Fetcher};
use metafetch::{random, utils};

#[derive(Parser)]
#[command(name = "metafetch", about = "Resilient HTTP fetcher", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Extra TOML configuration file
    #[arg(short, long, global = true, env = "METAFETCH_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// GET one or more URLs concurrently
    Get {
        #[arg(required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// POST a body to a URL
    Post {
        url: String,

        /// Request body
        #[arg(short, long, default_value = "")]
        data: String,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// Print a random browser user agent
    UserAgent,

    /// Print the effective configuration
    Config,
}

#[derive(Args, Clone)]
struct RequestArgs {
    /// Extra header, `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    #[arg(long)]
    user_agent: Option<String>,

    #[arg(long)]
    referer: Option<String>,

    /// Per-attempt timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Overall deadline in seconds, retries included
    #[arg(long)]
    deadline: Option<u64>,

    /// Return non-200 responses instead of failing
    #[arg(long)]
    no_raise: bool,

    /// Print response bodies instead of JSON reports
    #[arg(long)]
    body: bool,
}

impl RequestArgs {
    fn options(&self, cancel: &CancellationToken) -> Result<Vec<FetchOption>> {
        let mut options = vec![FetchOption::cancellation(cancel.clone())];
        if let Some(ua) = &self.user_agent {
            options.push(FetchOption::user_agent(ua));
        }
        if let Some(referer) = &self.referer {
            options.push(FetchOption::referer(referer));
        }
        for raw in &self.headers {
            let Some((name, value)) = utils::parse_header(raw) else {
                bail!("Malformed header {:?}, expected `Name: value`", raw);
            };
            options.push(FetchOption::header(name, value));
        }
        if let Some(secs) = self.timeout {
            options.push(FetchOption::timeout(Duration::from_secs(secs)));
        }
        if let Some(secs) = self.deadline {
            options.push(FetchOption::deadline(Duration::from_secs(secs)));
        }
        if self.no_raise {
            options.push(FetchOption::raise_for_status(false));
        }
        Ok(options)
    }
}

/// One line of output per fetched URL.
#[derive(Debug, Serialize)]
struct FetchReport {
    url: String,
    final_url: String,
    status: u16,
    content_type: Option<String>,
    bytes: usize,
    elapsed_ms: u128,
    fetched_at: DateTime<Utc>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "metafetch=info,warn",
        1 => "metafetch=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = AppConfig::load_from(cli.config.as_deref())?;

    match cli.command {
        Command::Get { urls, request } => {
            let _t = utils::Timer::start(format!("GET {} url(s)", urls.len()));
            let fetcher = Arc::new(
                Fetcher::from_settings(&config.fetch).context("Failed to build fetcher")?,
            );
            let cancel = cancel_on_ctrl_c();
            let options = request.options(&cancel)?;

            let sem = Arc::new(Semaphore::new(config.cli.concurrency.max(1)));
            let mut handles = Vec::new();

            for url in urls {
                let fetcher = Arc::clone(&fetcher);
                let sem = Arc::clone(&sem);
                let options = options.clone();
                let print_body = request.body;

                let handle = tokio::spawn(async move {
                    let _permit = sem.acquire().await?;
                    let started = Instant::now();
                    let response = fetcher.get(&url, options).await?;
                    emit(&url, response, started, print_body).await
                });
                handles.push(handle);
            }

            let mut errors = 0usize;
            for handle in handles {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("{:#}", e);
                        errors += 1;
                    }
                    Err(e) => {
                        error!("Task panic: {}", e);
                        errors += 1;
                    }
                }
            }
            if errors > 0 {
                bail!("{} request(s) failed", errors);
            }
        }

        Command::Post { url, data, request } => {
            let fetcher = Fetcher::from_settings(&config.fetch).context("Failed to build fetcher")?;
            let cancel = cancel_on_ctrl_c();
            let options = request.options(&cancel)?;
            let started = Instant::now();
            let response = fetcher.post(&url, data, options).await?;
            emit(&url, response, started, request.body).await?;
        }

        Command::UserAgent => {
            println!("{}", random::user_agent());
        }

        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Read the body and print either the body or a JSON report.
async fn emit(url: &str, response: reqwest::Response, started: Instant, print_body: bool) -> Result<()> {
    let status = response.status().as_u16();
    let final_url = response.url().to_string();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response
        .bytes()
        .await
        .with_context(|| format!("Failed to read body of {}", url))?;

    if print_body {
        println!("{}", String::from_utf8_lossy(&body));
        return Ok(());
    }

    let report = FetchReport {
        url: url.to_string(),
        final_url,
        status,
        content_type,
        bytes: body.len(),
        elapsed_ms: started.elapsed().as_millis(),
        fetched_at: Utc::now(),
    };
    info!("{}: HTTP {} ({} bytes)", url, status, report.bytes);
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight requests");
            trigger.cancel();
        }
    });
    token
}
