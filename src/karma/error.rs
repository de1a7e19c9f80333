use std::path::PathBuf;
use thiserror::Error;

use crate::forum::ForumError;

/// Errors raised by the karma bot
#[derive(Debug, Error)]
pub enum KarmaError {
    #[error(transparent)]
    Forum(#[from] ForumError),

    #[error("Karma already granted to {recipient} by {granter} in {submission_id}")]
    AlreadyAwarded {
        submission_id: String,
        recipient: String,
        granter: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid command list '{commands}': {reason}")]
    InvalidCommands { commands: String, reason: String },

    #[error("Failed to read template {}: {source}", .path.display())]
    TemplateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template '{template}' references unknown variable '{variable}'")]
    MissingVariable { template: String, variable: String },

    #[error("Template '{template}' has an invalid placeholder at byte {offset}")]
    InvalidPlaceholder { template: String, offset: usize },
}
