use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logaudit::alerts::{
    AlertManager, EmailNotifier, FixedWindowLimiter, HttpEmailNotifier, HttpPushNotifier,
    MockNotifier, PushNotifier, UnconfiguredNotifier,
};
use logaudit::collectors::ManagementApiLogSource;
use logaudit::config::Config;
use logaudit::server::{self, TriggerState};
use logaudit::store::{transition_issue, IssueStatus, IssueStore, MemoryStore, PostgrestStore, Resolution};
use logaudit::LogAuditor;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

/// Command-line arguments for the log audit
#[derive(Parser)]
#[command(
    name = "logaudit",
    about = "Log error aggregator - groups service errors into tracked issues and alerts on new ones",
    long_about = "Fetches the last hour of API, edge function, auth and database logs, groups the \
                  errors into stable signatures, reconciles them with persisted issues and alerts \
                  admins about new and recurring problems."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        global = true,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Use an in-memory store and logging notifiers
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one audit and print its summary as JSON
    Run,
    /// Serve the HTTP trigger until interrupted
    Serve,
    /// Inspect and triage issues
    #[command(subcommand)]
    Issues(IssuesCommand),
}

#[derive(Subcommand)]
enum IssuesCommand {
    /// List issues, most recently seen first
    List {
        /// Only list issues with this status
        #[arg(long)]
        status: Option<IssueStatus>,
    },
    /// Mark an issue as being investigated
    Investigate { signature: String },
    /// Mark an issue as resolved
    Resolve {
        signature: String,
        /// Who resolved it
        #[arg(long)]
        by: Option<String>,
        /// Resolution note
        #[arg(long)]
        note: Option<String>,
    },
    /// Ignore an issue
    Ignore { signature: String },
}

fn build_store(config: &Config, dry_run: bool) -> Result<Arc<dyn IssueStore>> {
    if dry_run {
        info!("Dry run: using in-memory issue store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = PostgrestStore::new(
        config.rest_url()?,
        config.service_role_key()?.to_string(),
        config.store.tables.clone(),
        config.store_timeout(),
    )?;
    Ok(Arc::new(store))
}

fn build_alert_manager(config: &Config, dry_run: bool) -> Result<AlertManager> {
    let settings = config.alerts.settings.clone();
    if dry_run {
        let notifier = MockNotifier::new();
        return Ok(AlertManager::new(
            Arc::new(notifier.clone()),
            Arc::new(notifier),
            settings,
        ));
    }

    let token = config.function_token().unwrap_or_default().to_string();
    let push: Arc<dyn PushNotifier> = match config.push_url() {
        Some(url) => Arc::new(HttpPushNotifier::new(url, token.clone(), config.alerts_timeout())?),
        None => {
            warn!("No push endpoint configured; push alerts will fail");
            Arc::new(UnconfiguredNotifier::new("push"))
        }
    };
    let email: Arc<dyn EmailNotifier> = match config.email_url() {
        Some(url) => Arc::new(HttpEmailNotifier::new(url, token, config.alerts_timeout())?),
        None => {
            warn!("No email endpoint configured; email alerts will fail");
            Arc::new(UnconfiguredNotifier::new("email"))
        }
    };
    Ok(AlertManager::new(push, email, settings))
}

fn build_auditor(config: &Config, dry_run: bool) -> Result<LogAuditor> {
    let (project_ref, access_token) = config.source_credentials()?;
    let source = ManagementApiLogSource::new(
        config.source.base_url.clone(),
        project_ref.to_string(),
        access_token.to_string(),
        config.source_timeout(),
    )?;

    Ok(LogAuditor::new(
        Arc::new(source),
        build_store(config, dry_run)?,
        build_alert_manager(config, dry_run)?,
        config.services()?,
        config.source.lookback_minutes,
    ))
}

async fn run_once(config: &Config, dry_run: bool) -> Result<()> {
    let auditor = build_auditor(config, dry_run)?;
    let summary = auditor.run().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn serve(config: &Config, dry_run: bool) -> Result<()> {
    let auditor = build_auditor(config, dry_run).map_err(|e| {
        error!("Log audit is not configured, triggers will fail: {:#}", e);
        format!("{:#}", e)
    });
    let limiter = FixedWindowLimiter::new(
        config.trigger.rate_limit_max,
        chrono::Duration::seconds(config.trigger.rate_limit_window_seconds as i64),
    );
    let state = TriggerState::new(
        auditor,
        config.cron_secret().map(str::to_string),
        Arc::new(limiter),
    );

    let addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    // Set up signal handling for graceful shutdown
    let shutdown = Arc::new(Notify::new());
    let signal = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        signal.notify_one();
    })
    .context("Error setting SIGINT handler for graceful shutdown")?;

    info!("Log audit trigger is running. Press Ctrl+C to stop.");
    server::serve(listener, state, async move { shutdown.notified().await }).await?;
    info!("Log audit trigger stopped");
    Ok(())
}

async fn issues(config: &Config, dry_run: bool, command: IssuesCommand) -> Result<()> {
    let store = build_store(config, dry_run)?;

    let (signature, next, resolution) = match command {
        IssuesCommand::List { status } => {
            let issues = store.list_issues(status).await?;
            if issues.is_empty() {
                println!("No issues");
            }
            for issue in issues {
                println!(
                    "{}  {:<13} {:>6}x  {} {} {}  (last seen {})",
                    issue.signature,
                    issue.status.as_str(),
                    issue.occurrence_count,
                    issue.status_code,
                    issue.method,
                    issue.path,
                    issue.last_seen.format("%Y-%m-%d %H:%M:%S")
                );
            }
            return Ok(());
        }
        IssuesCommand::Investigate { signature } => (signature, IssueStatus::Investigating, None),
        IssuesCommand::Ignore { signature } => (signature, IssueStatus::Ignored, None),
        IssuesCommand::Resolve {
            signature,
            by,
            note,
        } => (
            signature,
            IssueStatus::Resolved,
            Some(Resolution {
                at: None,
                by,
                note,
            }),
        ),
    };

    let issue = transition_issue(store.as_ref(), &signature, next, resolution).await?;
    println!("{} is now {}", issue.signature, issue.status);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run => run_once(&config, cli.dry_run).await,
        Command::Serve => serve(&config, cli.dry_run).await,
        Command::Issues(command) => issues(&config, cli.dry_run, command).await,
    }
}
