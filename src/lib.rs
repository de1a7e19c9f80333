//! Flairsync
//!
//! Reddit moderation bots: keeps a managed flair substring consistent across
//! a family of subreddits, and grants karma flair from `+karma` replies.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - CLI entrypoint (sync / karma)
//! ├── config.rs      - Environment configuration
//! ├── flair/         - Flair reconciliation core
//! │   ├── label.rs     - MatchRule, label splitting & composition
//! │   ├── snapshot.rs  - Per-forum snapshots
//! │   ├── resolver.rs  - Conflict resolvers (automatic / interactive / fail-fast)
//! │   ├── merge.rs     - Canonical mapping
//! │   ├── planner.rs   - Per-forum update plans
//! │   └── error.rs     - FlairError
//! ├── sync/          - Sync bot
//! │   ├── cycle.rs     - One cycle and the run loop
//! │   └── report.rs    - Cycle summary
//! ├── karma/         - Karma bot
//! │   ├── command.rs   - Command parsing & grant rules
//! │   ├── ledger.rs    - Grant ledger trait, in-memory ledger
//! │   ├── template.rs  - Reply templates
//! │   └── bot.rs       - Polling loop
//! ├── forum/         - Forum traits and the Reddit OAuth client
//! └── database/      - PostgreSQL grant storage
//! ```

pub mod config;
pub mod database;
pub mod flair;
pub mod forum;
pub mod karma;
pub mod sync;

// Re-export main types for convenience
pub use config::{BotConfig, RunMode};
pub use database::{DatabasePool, GrantRepository};
pub use flair::{
    CanonicalMapping, ConflictResolver, FlairError, ForumSnapshot, LabelSplit, MatchRule,
    Operation, PlannedUpdate, SuppressionLists, SyncPlan,
};
pub use forum::{
    Comment, FlairEntry, FlairSink, FlairSource, ForumError, KarmaForum, RedditClient, Submission,
};
pub use karma::{GrantLedger, KarmaBot, KarmaError, KarmaGrant, MemoryGrantLedger};
pub use sync::{CycleReport, ForumReport, SyncContext, run_cycle, run_sync_loop};
