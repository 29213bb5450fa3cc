use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repolens::clone::CloneOrchestrator;
use repolens::runner::{SessionEvent, TaskRunner};
use repolens::{CloneError, Config, GitHubClient, RateLimiter, RepoRecord};

#[derive(Parser)]
#[command(name = "repolens")]
#[command(about = "GitHub repository listing and cloning with rate-limit awareness")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List every repository of a user or organization
    List {
        /// Account login to list
        owner: String,

        /// Show repository details
        #[arg(long)]
        details: bool,
    },

    /// Clone a repository into the configured destination
    Clone {
        /// Repository to clone, as "owner/name"
        repo: String,

        /// Destination directory (defaults to config destination + name)
        #[arg(long)]
        dest: Option<PathBuf>,
    },

    /// Show current API quota and GitHub service status
    Limits,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;
    info!("Starting RepoLens v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config)?;

    match cli.command {
        Commands::List { owner, details } => cmd_list(&owner, details, &config).await,
        Commands::Clone { repo, dest } => cmd_clone(&repo, dest, &config).await,
        Commands::Limits => cmd_limits(&config).await,
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<std::path::PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

/// Stream every repository of `owner` to stdout as pages arrive
async fn cmd_list(owner: &str, details: bool, config: &Config) -> Result<()> {
    info!("Listing repositories for '{}'...", owner);

    let limiter = RateLimiter::new();
    let client = GitHubClient::new(config, limiter.clone())?;
    let mut runner = TaskRunner::new(Arc::new(client), CloneOrchestrator::from_config(config), limiter);

    let mut handle = runner.submit_fetch(owner);

    while let Some(event) = handle.next_event().await {
        match event {
            SessionEvent::OwnerResolved(profile) => {
                println!("🔍 Fetching repositories for {} ({})", profile.login, profile.kind);
            }
            SessionEvent::PageDelivered(records) => {
                for record in &records {
                    print_record(record, details);
                }
            }
            SessionEvent::RateLimitUpdated(status) => {
                if status.remaining < 10 {
                    println!(
                        "⚠️  API quota low: {}/{} requests remaining",
                        status.remaining, status.limit_total
                    );
                }
            }
            SessionEvent::RateLimitPause { resume_at } => {
                println!(
                    "⏸️  API rate limit reached; resuming at {}",
                    format_epoch(resume_at)
                );
            }
            SessionEvent::Completed { total } => {
                println!("\n✅ {} repositories", total);
            }
            SessionEvent::Failed(reason) => {
                bail!("Listing failed: {reason}");
            }
            SessionEvent::Cancelled => {
                println!("🛑 Listing cancelled");
            }
        }
    }

    Ok(())
}

/// Clone "owner/name" with the configured timeout and destination
async fn cmd_clone(repo: &str, dest: Option<PathBuf>, config: &Config) -> Result<()> {
    let (owner, name) = repo
        .split_once('/')
        .ok_or_else(|| anyhow!("Repository must be given as \"owner/name\", got '{repo}'"))?;
    if owner.is_empty() || name.is_empty() {
        bail!("Repository must be given as \"owner/name\", got '{repo}'");
    }

    let clone_url = format!("https://github.com/{owner}/{name}.git");
    let destination = match dest {
        Some(path) => path,
        None => {
            let base = shellexpand::full(&config.clone.destination)
                .context("Failed to expand clone destination")?;
            CloneOrchestrator::destination_for(std::path::Path::new(base.as_ref()), name)
        }
    };

    info!("Cloning {} into {}", repo, destination.display());
    println!("📥 Cloning {} into {}", repo, destination.display());

    let limiter = RateLimiter::new();
    let client = GitHubClient::new(config, limiter.clone())?;
    let mut runner = TaskRunner::new(Arc::new(client), CloneOrchestrator::from_config(config), limiter);

    let handle = runner.submit_clone(repo, &clone_url, destination.clone());
    let result = handle.join().await;

    match result.outcome {
        Ok(()) => {
            println!("✅ Cloned to {}", destination.display());
            Ok(())
        }
        Err(CloneError::ConflictingDestination(path)) => {
            println!("⏭️  Skipped: {} already exists", path.display());
            Ok(())
        }
        Err(CloneError::Classified { kind, detail }) => {
            Err(anyhow!("Clone failed ({kind}): {detail}"))
        }
    }
}

/// Show API quota and the public GitHub service indicator
async fn cmd_limits(config: &Config) -> Result<()> {
    let limiter = RateLimiter::new();
    let client = GitHubClient::new(config, limiter)?;

    println!("📊 GitHub API Status");
    println!();

    match client.probe_rate_limit().await {
        Ok(status) => {
            println!("   Quota: {}/{} requests remaining", status.remaining, status.limit_total);
            println!("   Window resets: {}", format_epoch(status.reset_epoch));
        }
        Err(e) => {
            println!("   ❌ Could not read quota: {e}");
        }
    }

    let (healthy, description) = client.service_status().await;
    if healthy {
        println!("   🟢 Service: {description}");
    } else {
        println!("   🔴 Service: {description}");
    }

    Ok(())
}

fn print_record(record: &RepoRecord, details: bool) {
    if !details {
        println!("  📁 {}", record.full_name);
        return;
    }

    println!("📁 {}", record.full_name);
    if let Some(description) = &record.description {
        println!("   📝 {}", description);
    }
    if let Some(language) = &record.language {
        println!("   💻 {}", language);
    }
    println!("   ⭐ {} stars, {} forks", record.star_count, record.fork_count);
    if let Some(pushed) = record.pushed_at {
        println!("   🕒 Pushed: {}", pushed.format("%Y-%m-%d"));
    }
    if let Some(url) = &record.html_url {
        println!("   🔗 {}", url);
    }
    println!();
}

fn format_epoch(epoch: u64) -> String {
    DateTime::<Utc>::from_timestamp(epoch as i64, 0)
        .map(|t| t.format("%H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("epoch {epoch}"))
}
