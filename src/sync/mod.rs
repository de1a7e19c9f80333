//! Flair sync bot
//!
//! Runs reconciliation cycles against live forums and reports what happened.

mod cycle;
mod report;

pub use cycle::{SyncContext, run_cycle, run_sync_loop};
pub use report::{CycleReport, ForumReport};
