//! Error types for flair reconciliation.

use thiserror::Error;

use crate::forum::ForumError;

/// Errors raised while building, merging, planning or applying flair
#[derive(Debug, Error)]
pub enum FlairError {
    /// The valid-flair pattern does not compile or matches the empty string.
    #[error("Invalid valid-flair pattern '{pattern}': {reason}")]
    InvalidRule { pattern: String, reason: String },

    /// The label contains the valid-flair pattern more than once.
    #[error("Ambiguous label '{label}': valid flair pattern matched {matches} times")]
    AmbiguousLabel { label: String, matches: usize },

    /// A conflict needs an operator decision but nobody can answer.
    #[error("Flair conflict for {user} in /r/{forum} requires operator input")]
    OperatorInputRequired { user: String, forum: String },

    /// The operator prompt itself failed.
    #[error("Operator prompt failed: {0}")]
    Prompt(String),

    /// Flairs could not be fetched from a forum.
    #[error("Flair source unavailable for /r/{forum}: {source}")]
    SourceUnavailable {
        forum: String,
        #[source]
        source: ForumError,
    },

    /// A flair batch could not be delivered to a forum.
    #[error("Flair sink unavailable for /r/{forum}: {source}")]
    SinkUnavailable {
        forum: String,
        #[source]
        source: ForumError,
    },

    /// The forum accepted the batch but refused some rows.
    #[error("/r/{forum} rejected {} of {total} flair update(s)", .rejected.len())]
    PartialFailure {
        forum: String,
        total: usize,
        rejected: Vec<String>,
    },

    /// A single-shot cycle finished with failed forums.
    #[error("Sync cycle failed for: {}", .forums.join(", "))]
    CycleFailed { forums: Vec<String> },
}

impl FlairError {
    /// Classify an upload failure for `forum`.
    pub fn from_sink(forum: &str, total: usize, err: ForumError) -> Self {
        match err {
            ForumError::Rejected(rows) => FlairError::PartialFailure {
                forum: forum.to_string(),
                total,
                rejected: rows.into_iter().map(|row| row.user).collect(),
            },
            other => FlairError::SinkUnavailable {
                forum: forum.to_string(),
                source: other,
            },
        }
    }
}
