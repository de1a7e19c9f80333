//! Flair reconciliation
//!
//! Keeps a managed flair substring consistent across forums while leaving
//! every other part of a user's flair alone.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐     ┌──────────┐
//! │ ForumSnapshot│────►│ merge_       │────►│ plan_sync    │────►│ FlairSink│
//! │ (per forum)  │     │ snapshots    │     │ (per forum)  │     │ (upload) │
//! └──────────────┘     └──────────────┘     └──────────────┘     └──────────┘
//!        ▲                    │
//!        │                    ▼
//!   MatchRule          ConflictResolver
//!   (split/compose)    (automatic / interactive / fail-fast)
//! ```
//!
//! Everything here is rebuilt from scratch every cycle.

mod error;
mod label;
mod merge;
mod planner;
mod resolver;
mod snapshot;

pub use error::FlairError;
pub use label::{LabelSplit, MatchRule, compose};
pub use merge::{CanonicalMapping, ConflictRecord, MergeOutcome, canonical_valid, merge_snapshots};
pub use planner::{
    ForumPlan, PlannedUpdate, SuppressionLists, SyncPlan, plan_forum, plan_sync, users_to_sync,
};
pub use resolver::{
    AutomaticResolver, Choice, Conflict, ConflictResolver, FailFastResolver, InteractiveResolver,
    Operation, OperatorPrompt, Resolution, TerminalPrompt, is_interactive_terminal, resolver_for,
};
pub use snapshot::{ForumSnapshot, LabelRecord, build_snapshot, build_snapshots};
