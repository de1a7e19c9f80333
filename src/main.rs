use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{Level, error, info, warn};

use flairsync::{
    config::{BotConfig, RunMode, sanitize_for_logging},
    database::DatabasePool,
    flair::resolver_for,
    forum::{KarmaForum, RedditClient},
    karma::{CommandParser, GrantLedger, KarmaBot, MemoryGrantLedger, ReplyTemplates},
    sync::run_sync_loop,
};

#[derive(Parser)]
#[command(name = "flairsync", version, about = "Subreddit flair sync and karma bots")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep the managed flair consistent across the configured subreddits
    Sync {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,

        /// Plan and log updates without uploading them
        #[arg(long)]
        dry_run: bool,
    },
    /// Grant karma flair from `+karma` replies
    Karma {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = BotConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {:#}", e);
        eprintln!("Please check environment variables.");
        e
    })?;

    init_logging(&config)?;

    if config.logging.sanitize_logs {
        info!(
            client_id = %sanitize_for_logging(&config.reddit.client_id),
            user_agent = %config.reddit.user_agent,
            "Loaded credentials"
        );
    }

    match cli.command {
        Commands::Sync { once, dry_run } => run_sync(config, once, dry_run).await,
        Commands::Karma { once } => run_karma(config, once).await,
    }
}

async fn run_sync(config: BotConfig, once: bool, dry_run: bool) -> Result<()> {
    let mut ctx = config.sync_context()?;
    ctx.dry_run |= dry_run;

    let mode = if once {
        RunMode::Once
    } else {
        config.flairsync.mode
    };

    let client = RedditClient::new(config.reddit.clone()).context("Failed to create Reddit client")?;
    let mut resolver = resolver_for(config.flairsync.operation);

    info!(
        subreddits = ?ctx.forums,
        mode = ?mode,
        dry_run = ctx.dry_run,
        "Starting flair sync"
    );

    run_sync_loop(
        &ctx,
        &client,
        &client,
        resolver.as_mut(),
        mode,
        config.flairsync.loop_time(),
        shutdown_signal(),
    )
    .await?;

    info!("Stopping flair sync");
    Ok(())
}

async fn run_karma(config: BotConfig, once: bool) -> Result<()> {
    let settings = config.karma_settings()?;
    let parser = CommandParser::new(&config.karma.valid_commands)?;
    let templates = ReplyTemplates::new(&config.karma.template_dir);

    if !templates.dir().is_dir() {
        warn!(dir = %templates.dir().display(), "Template directory not found; replies will fail");
    }

    let ledger: Arc<dyn GrantLedger> = if config.database.enabled {
        let pool = DatabasePool::new(&config.database)
            .await
            .context("Failed to connect to PostgreSQL")?;
        let grants = pool
            .init_schema()
            .await
            .context("Failed to initialize grant table")?;
        Arc::new(grants)
    } else {
        warn!("PostgreSQL disabled; karma grants are kept in memory and lost on exit");
        Arc::new(MemoryGrantLedger::new())
    };

    let client = RedditClient::new(config.reddit.clone()).context("Failed to create Reddit client")?;
    let forum: Arc<dyn KarmaForum> = Arc::new(client);

    let mode = if once { RunMode::Once } else { config.karma.mode };

    let mut bot = KarmaBot::new(forum, ledger, parser, templates, settings);
    bot.run(mode, config.karma.loop_time(), shutdown_signal())
        .await?;

    Ok(())
}

/// Initialize logging based on configuration
fn init_logging(config: &BotConfig) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}

/// Resolves on Ctrl-C
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down"),
        Err(e) => {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
