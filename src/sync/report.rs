//! Cycle summary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::flair::ConflictRecord;

/// Upload outcome for one forum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumReport {
    pub forum: String,
    pub planned: usize,
    pub applied: usize,
    pub error: Option<String>,
}

impl ForumReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub users_merged: usize,
    pub conflicts: Vec<ConflictRecord>,
    pub forums: Vec<ForumReport>,
    pub dry_run: bool,
}

impl CycleReport {
    pub fn new(started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            users_merged: 0,
            conflicts: Vec::new(),
            forums: Vec::new(),
            dry_run,
        }
    }

    pub fn is_success(&self) -> bool {
        self.forums.iter().all(ForumReport::is_success)
    }

    pub fn failed_forums(&self) -> Vec<String> {
        self.forums
            .iter()
            .filter(|f| !f.is_success())
            .map(|f| f.forum.clone())
            .collect()
    }

    pub fn total_planned(&self) -> usize {
        self.forums.iter().map(|f| f.planned).sum()
    }

    pub fn total_applied(&self) -> usize {
        self.forums.iter().map(|f| f.applied).sum()
    }

    pub fn log_summary(&self) {
        let elapsed = self.finished_at - self.started_at;

        for forum in &self.forums {
            match &forum.error {
                Some(err) => error!(
                    forum = %forum.forum,
                    planned = forum.planned,
                    applied = forum.applied,
                    error = %err,
                    "Forum sync failed"
                ),
                None => info!(
                    forum = %forum.forum,
                    planned = forum.planned,
                    applied = forum.applied,
                    "Forum synced"
                ),
            }
        }

        if self.is_success() {
            info!(
                users = self.users_merged,
                conflicts = self.conflicts.len(),
                planned = self.total_planned(),
                applied = self.total_applied(),
                dry_run = self.dry_run,
                elapsed_ms = elapsed.num_milliseconds(),
                "Sync cycle complete"
            );
        } else {
            warn!(
                users = self.users_merged,
                conflicts = self.conflicts.len(),
                planned = self.total_planned(),
                applied = self.total_applied(),
                failed = ?self.failed_forums(),
                elapsed_ms = elapsed.num_milliseconds(),
                "Sync cycle finished with failures"
            );
        }
    }
}
