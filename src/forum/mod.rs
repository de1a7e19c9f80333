//! Forum boundary
//!
//! Traits at the edge between the bots and a forum backend, plus the wire-level
//! types they exchange. `RedditClient` implements all of them; tests use
//! in-memory fakes.

pub mod reddit;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flair::PlannedUpdate;

pub use reddit::RedditClient;

/// Errors raised by a forum backend
#[derive(Debug, Error)]
pub enum ForumError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Unexpected response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("Invalid URL: {0}")]
    Url(String),

    #[error("{} flair row(s) rejected", .0.len())]
    Rejected(Vec<RejectedRow>),

    #[error("Forum unavailable: {0}")]
    Unavailable(String),
}

/// A single row refused by a bulk flair update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRow {
    pub user: String,
    pub reason: String,
}

/// One user's flair as reported by a forum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlairEntry {
    pub user: String,
    #[serde(default)]
    pub flair_text: Option<String>,
    #[serde(default)]
    pub flair_css_class: Option<String>,
}

impl FlairEntry {
    pub fn new(user: &str, flair_text: Option<&str>, flair_css_class: Option<&str>) -> Self {
        Self {
            user: user.to_string(),
            flair_text: flair_text.map(str::to_string),
            flair_css_class: flair_css_class.map(str::to_string),
        }
    }
}

/// A comment as seen by the karma bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Fullname (`t1_...`)
    pub name: String,
    pub author: String,
    #[serde(default)]
    pub body: String,
    /// Fullname of the submission (`t3_...`)
    pub link_id: String,
    /// Fullname of the parent comment or submission
    pub parent_id: String,
    #[serde(default)]
    pub link_author: Option<String>,
    #[serde(default)]
    pub created_utc: f64,
}

impl Comment {
    /// Top-level comments reply directly to the submission
    pub fn is_root(&self) -> bool {
        self.parent_id.starts_with("t3_")
    }

    pub fn has_author(&self) -> bool {
        !self.author.is_empty() && self.author != "[deleted]"
    }
}

/// A submission (link post)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Fullname (`t3_...`)
    pub name: String,
    pub author: String,
    #[serde(default)]
    pub link_flair_text: Option<String>,
}

impl Submission {
    /// Short id without the `t3_` kind prefix
    pub fn short_id(&self) -> &str {
        self.name.strip_prefix("t3_").unwrap_or(&self.name)
    }
}

/// Reads every user's flair for a forum
#[async_trait]
pub trait FlairSource: Send + Sync {
    async fn fetch_flairs(&self, forum: &str) -> Result<Vec<FlairEntry>, ForumError>;
}

/// Writes a batch of flair updates to a forum
///
/// A batch either applies fully or returns an error; rows the forum refused
/// come back as [`ForumError::Rejected`].
#[async_trait]
pub trait FlairSink: Send + Sync {
    async fn apply_flairs(&self, forum: &str, updates: &[PlannedUpdate]) -> Result<(), ForumError>;
}

/// Operations the karma bot needs from a forum
#[async_trait]
pub trait KarmaForum: Send + Sync {
    /// Newest comments first, at most `limit`
    async fn new_comments(&self, forum: &str, limit: usize) -> Result<Vec<Comment>, ForumError>;

    async fn comment(&self, fullname: &str) -> Result<Option<Comment>, ForumError>;

    async fn submission(&self, fullname: &str) -> Result<Option<Submission>, ForumError>;

    async fn user_flair(&self, forum: &str, user: &str) -> Result<Option<FlairEntry>, ForumError>;

    async fn set_flair(
        &self,
        forum: &str,
        user: &str,
        text: &str,
        css_class: &str,
    ) -> Result<(), ForumError>;

    async fn reply(&self, parent_fullname: &str, text: &str) -> Result<(), ForumError>;
}
