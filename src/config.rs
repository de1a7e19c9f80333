use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::flair::{MatchRule, Operation, SuppressionLists};
use crate::karma::KarmaSettings;
use crate::sync::SyncContext;

/// Configuration for both bots
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    /// Flair sync configuration
    pub flairsync: FlairSyncConfig,
    /// Forum API credentials
    pub reddit: RedditConfig,
    /// Karma bot configuration
    pub karma: KarmaConfig,
    /// Grant storage
    pub database: DatabaseConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Whether a bot loops or runs a single pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Continuous,
    Once,
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "continuous" => Ok(RunMode::Continuous),
            "once" | "single" => Ok(RunMode::Once),
            other => Err(format!(
                "unknown mode '{}' (expected continuous or once)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlairSyncConfig {
    /// Forums in merge order
    pub subreddits: Vec<String>,
    /// Pattern of the managed flair substring
    pub valid_flairs: String,
    /// Conflict policy
    pub operation: Operation,
    /// Users never written
    pub ignore_list: Vec<String>,
    /// Users whose managed flair is cleared
    pub kill_list: Vec<String>,
    pub mode: RunMode,
    /// Seconds between cycles in continuous mode
    pub loop_time_secs: u64,
    /// Plan and log without uploading
    pub dry_run: bool,
}

impl Default for FlairSyncConfig {
    fn default() -> Self {
        Self {
            subreddits: Vec::new(),
            valid_flairs: String::new(),
            operation: Operation::Automatic,
            ignore_list: Vec::new(),
            kill_list: Vec::new(),
            mode: RunMode::Continuous,
            loop_time_secs: 300,
            dry_run: false,
        }
    }
}

impl FlairSyncConfig {
    pub fn loop_time(&self) -> Duration {
        Duration::from_secs(self.loop_time_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditConfig {
    /// OAuth application id
    pub client_id: String,
    /// OAuth application secret
    pub client_secret: String,
    /// Long-lived refresh token for the bot account
    pub refresh_token: String,
    pub user_agent: String,
    /// Token endpoint
    pub auth_url: String,
    /// Base URL for authenticated API calls
    pub api_base_url: String,
    pub timeout_secs: u64,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            user_agent: "flairsync/0.1".to_string(),
            auth_url: "https://www.reddit.com/api/v1/access_token".to_string(),
            api_base_url: "https://oauth.reddit.com".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KarmaConfig {
    /// Forum whose comments are watched
    pub subreddit: String,
    /// `|`-separated command names
    pub valid_commands: String,
    /// Link flair a submission needs before karma can be granted in it
    pub valid_link_flair_text: String,
    /// Directory holding the reply `.tpl` files
    pub template_dir: PathBuf,
    /// Comments fetched per pass
    pub comment_limit: usize,
    pub mode: RunMode,
    pub loop_time_secs: u64,
}

impl Default for KarmaConfig {
    fn default() -> Self {
        Self {
            subreddit: String::new(),
            valid_commands: "karma".to_string(),
            valid_link_flair_text: String::new(),
            template_dir: PathBuf::from("tmpl/karmaflair"),
            comment_limit: 100,
            mode: RunMode::Continuous,
            loop_time_secs: 60,
        }
    }
}

impl KarmaConfig {
    pub fn loop_time(&self) -> Duration {
        Duration::from_secs(self.loop_time_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub url: String,
    /// Enable PostgreSQL (if false, uses in-memory grants)
    pub enabled: bool,
    /// Grant table name
    pub table: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost:5432/karmaflair".to_string(),
            enabled: false,
            table: "karma".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Mask credentials before they reach the logs
    pub sanitize_logs: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            sanitize_logs: true,
        }
    }
}

impl BotConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup, then validate the shared parts
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Flair sync
        if let Some(subs) = lookup("FLAIRSYNC_SUBREDDITS") {
            config.flairsync.subreddits = split_list(&subs);
        }

        if let Some(pattern) = lookup("FLAIRSYNC_VALID_FLAIRS") {
            config.flairsync.valid_flairs = pattern;
        }

        if let Some(operation) = lookup("FLAIRSYNC_OPERATION") {
            config.flairsync.operation = operation
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid FLAIRSYNC_OPERATION value")?;
        }

        if let Some(list) = lookup("FLAIRSYNC_IGNORE_LIST") {
            config.flairsync.ignore_list = split_list(&list);
        }

        if let Some(list) = lookup("FLAIRSYNC_KILL_LIST") {
            config.flairsync.kill_list = split_list(&list);
        }

        if let Some(mode) = lookup("FLAIRSYNC_MODE") {
            config.flairsync.mode = mode
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid FLAIRSYNC_MODE value")?;
        }

        if let Some(secs) = lookup("FLAIRSYNC_LOOP_TIME") {
            config.flairsync.loop_time_secs =
                secs.parse().context("Invalid FLAIRSYNC_LOOP_TIME value")?;
        }

        if let Some(dry_run) = lookup("FLAIRSYNC_DRY_RUN") {
            config.flairsync.dry_run = dry_run
                .parse()
                .context("Invalid FLAIRSYNC_DRY_RUN value")?;
        }

        // Forum credentials
        if let Some(id) = lookup("REDDIT_CLIENT_ID") {
            config.reddit.client_id = id;
        }

        if let Some(secret) = lookup("REDDIT_CLIENT_SECRET") {
            config.reddit.client_secret = secret;
        }

        if let Some(token) = lookup("REDDIT_REFRESH_TOKEN") {
            config.reddit.refresh_token = token;
        }

        if let Some(agent) = lookup("REDDIT_USER_AGENT") {
            config.reddit.user_agent = agent;
        }

        if let Some(url) = lookup("REDDIT_AUTH_URL") {
            config.reddit.auth_url = url;
        }

        if let Some(url) = lookup("REDDIT_API_BASE_URL") {
            config.reddit.api_base_url = url;
        }

        if let Some(timeout) = lookup("REDDIT_TIMEOUT_SECS") {
            config.reddit.timeout_secs = timeout
                .parse()
                .context("Invalid REDDIT_TIMEOUT_SECS value")?;
        }

        // Karma bot
        if let Some(sub) = lookup("KARMA_SUBREDDIT") {
            config.karma.subreddit = sub;
        }

        if let Some(commands) = lookup("KARMA_VALID_COMMANDS") {
            config.karma.valid_commands = commands;
        }

        if let Some(text) = lookup("KARMA_VALID_LINK_FLAIR_TEXT") {
            config.karma.valid_link_flair_text = text;
        }

        if let Some(dir) = lookup("KARMA_TEMPLATE_DIR") {
            config.karma.template_dir = PathBuf::from(dir);
        }

        if let Some(limit) = lookup("KARMA_COMMENT_LIMIT") {
            config.karma.comment_limit = limit
                .parse()
                .context("Invalid KARMA_COMMENT_LIMIT value")?;
        }

        if let Some(mode) = lookup("KARMA_MODE") {
            config.karma.mode = mode
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid KARMA_MODE value")?;
        }

        if let Some(secs) = lookup("KARMA_LOOP_TIME") {
            config.karma.loop_time_secs = secs.parse().context("Invalid KARMA_LOOP_TIME value")?;
        }

        // Database configuration
        if let Some(url) = lookup("DATABASE_URL") {
            config.database.url = url;
        }

        if let Some(enabled) = lookup("DATABASE_ENABLED") {
            config.database.enabled = enabled
                .parse()
                .context("Invalid DATABASE_ENABLED value")?;
        }

        if let Some(table) = lookup("DATABASE_TABLE") {
            config.database.table = table;
        }

        if let Some(max) = lookup("DATABASE_MAX_CONNECTIONS") {
            config.database.max_connections = max
                .parse()
                .context("Invalid DATABASE_MAX_CONNECTIONS value")?;
        }

        // Logging configuration
        if let Some(level) = lookup("FLAIRSYNC_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Some(sanitize) = lookup("FLAIRSYNC_SANITIZE_LOGS") {
            config.logging.sanitize_logs = sanitize
                .parse()
                .context("Invalid FLAIRSYNC_SANITIZE_LOGS value")?;
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate settings shared by both bots
    fn validate(&self) -> Result<()> {
        if self.reddit.client_id.is_empty() {
            return Err(anyhow::anyhow!("REDDIT_CLIENT_ID is required"));
        }

        if self.reddit.client_secret.is_empty() {
            return Err(anyhow::anyhow!("REDDIT_CLIENT_SECRET is required"));
        }

        if self.reddit.refresh_token.is_empty() {
            return Err(anyhow::anyhow!("REDDIT_REFRESH_TOKEN is required"));
        }

        if self.reddit.user_agent.trim().is_empty() {
            return Err(anyhow::anyhow!("User agent cannot be empty"));
        }

        for (name, url) in [
            ("auth", &self.reddit.auth_url),
            ("API base", &self.reddit.api_base_url),
        ] {
            if !url.starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "HTTPS is required but {} URL is not HTTPS: {}",
                    name,
                    url
                ));
            }
        }

        if self.reddit.timeout_secs == 0 {
            return Err(anyhow::anyhow!("REDDIT_TIMEOUT_SECS must be non-zero"));
        }

        Ok(())
    }

    /// Validate the flair sync section and build its context
    pub fn sync_context(&self) -> Result<SyncContext> {
        let cfg = &self.flairsync;

        if cfg.subreddits.is_empty() {
            return Err(anyhow::anyhow!(
                "FLAIRSYNC_SUBREDDITS must list at least one subreddit"
            ));
        }

        if cfg.subreddits.len() == 1 {
            warn!("Only one subreddit configured; nothing to sync against");
        }

        let mut seen = std::collections::HashSet::new();
        for sub in &cfg.subreddits {
            if !seen.insert(sub.to_lowercase()) {
                return Err(anyhow::anyhow!("Subreddit {} is listed twice", sub));
            }
        }

        if cfg.valid_flairs.is_empty() {
            return Err(anyhow::anyhow!("FLAIRSYNC_VALID_FLAIRS is required"));
        }

        let rule = MatchRule::new(&cfg.valid_flairs).context("Invalid FLAIRSYNC_VALID_FLAIRS")?;

        if cfg.mode == RunMode::Continuous && cfg.loop_time_secs == 0 {
            return Err(anyhow::anyhow!(
                "FLAIRSYNC_LOOP_TIME must be non-zero in continuous mode"
            ));
        }

        let suppression =
            SuppressionLists::new(cfg.ignore_list.iter().cloned(), cfg.kill_list.iter().cloned());

        info!(
            subreddits = ?cfg.subreddits,
            pattern = %cfg.valid_flairs,
            operation = ?cfg.operation,
            ignored = suppression.ignore.len(),
            killed = suppression.kill.len(),
            "Configured flair sync"
        );

        Ok(SyncContext {
            forums: cfg.subreddits.clone(),
            rule,
            suppression,
            dry_run: cfg.dry_run,
        })
    }

    /// Validate the karma and database sections
    pub fn validate_karma(&self) -> Result<()> {
        if self.karma.subreddit.is_empty() {
            return Err(anyhow::anyhow!("KARMA_SUBREDDIT is required"));
        }

        if self.karma.valid_link_flair_text.is_empty() {
            return Err(anyhow::anyhow!("KARMA_VALID_LINK_FLAIR_TEXT is required"));
        }

        if self.karma.valid_commands.trim().is_empty() {
            return Err(anyhow::anyhow!("KARMA_VALID_COMMANDS cannot be empty"));
        }

        if self.karma.comment_limit == 0 || self.karma.comment_limit > 100 {
            return Err(anyhow::anyhow!(
                "KARMA_COMMENT_LIMIT must be between 1 and 100"
            ));
        }

        if self.karma.mode == RunMode::Continuous && self.karma.loop_time_secs == 0 {
            return Err(anyhow::anyhow!(
                "KARMA_LOOP_TIME must be non-zero in continuous mode"
            ));
        }

        if !is_sql_identifier(&self.database.table) {
            return Err(anyhow::anyhow!(
                "DATABASE_TABLE '{}' is not a plain SQL identifier",
                self.database.table
            ));
        }

        if self.database.enabled && self.database.url.is_empty() {
            return Err(anyhow::anyhow!(
                "DATABASE_URL is required when DATABASE_ENABLED is true"
            ));
        }

        Ok(())
    }

    /// Validate the karma section and build the bot settings
    pub fn karma_settings(&self) -> Result<KarmaSettings> {
        self.validate_karma()?;

        info!(
            subreddit = %self.karma.subreddit,
            commands = %self.karma.valid_commands,
            link_flair = %self.karma.valid_link_flair_text,
            postgres = self.database.enabled,
            "Configured karma bot"
        );

        Ok(KarmaSettings {
            forum: self.karma.subreddit.clone(),
            valid_link_flair_text: self.karma.valid_link_flair_text.clone(),
            comment_limit: self.karma.comment_limit,
        })
    }
}

/// Split a comma-separated list, dropping blanks
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Letters, digits and underscores, not starting with a digit
fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Sanitize sensitive data for logging
pub fn sanitize_for_logging(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();

    if chars.len() > 20 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        return format!("{}***{}", head, tail);
    }

    if chars.len() > 4 {
        let head: String = chars[..2].iter().collect();
        return format!("{}***", head);
    }

    "***".to_string()
}
