//! Integration tests for the flair sync and karma bots
//!
//! These tests drive full cycles against in-memory forums: snapshotting,
//! merging, planning, per-forum uploads, the run loops, and the karma
//! command flow from comment to reply.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flairsync::flair::{AutomaticResolver, FailFastResolver, PlannedUpdate};
use flairsync::forum::{RejectedRow, Submission};
use flairsync::karma::{
    CommandParser, GrantDecision, KarmaOutcome, KarmaSettings, ReplyTemplates,
};
use flairsync::{
    Comment, FlairEntry, FlairError, FlairSink, FlairSource, ForumError, GrantLedger, KarmaBot,
    KarmaError, KarmaForum, KarmaGrant, MatchRule, MemoryGrantLedger, RunMode, SuppressionLists,
    SyncContext, run_cycle, run_sync_loop,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// Forums held in memory. Uploads are applied to the stored flairs so a
/// second cycle sees the result of the first.
#[derive(Default)]
struct FakeForums {
    flairs: Mutex<BTreeMap<String, BTreeMap<String, FlairEntry>>>,
    uploads: Mutex<Vec<(String, Vec<PlannedUpdate>)>>,
    fetches: AtomicUsize,
    offline_sources: HashSet<String>,
    offline_sinks: HashSet<String>,
    refused_users: HashSet<String>,
}

impl FakeForums {
    fn new(forums: &[(&str, &[(&str, &str, &str)])]) -> Self {
        let flairs = forums
            .iter()
            .map(|(forum, rows)| {
                let entries = rows
                    .iter()
                    .map(|(user, text, css)| {
                        (user.to_string(), FlairEntry::new(user, Some(*text), Some(*css)))
                    })
                    .collect();
                (forum.to_string(), entries)
            })
            .collect();

        Self {
            flairs: Mutex::new(flairs),
            ..Self::default()
        }
    }

    fn css(&self, forum: &str, user: &str) -> Option<String> {
        self.flairs.lock().unwrap()[forum]
            .get(user)
            .and_then(|e| e.flair_css_class.clone())
    }

    fn uploads_for(&self, forum: &str) -> Vec<PlannedUpdate> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .filter(|(f, _)| f == forum)
            .flat_map(|(_, updates)| updates.clone())
            .collect()
    }

    fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl FlairSource for FakeForums {
    async fn fetch_flairs(&self, forum: &str) -> Result<Vec<FlairEntry>, ForumError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.offline_sources.contains(forum) {
            return Err(ForumError::Unavailable(format!("{} timed out", forum)));
        }
        Ok(self
            .flairs
            .lock()
            .unwrap()
            .get(forum)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl FlairSink for FakeForums {
    async fn apply_flairs(&self, forum: &str, updates: &[PlannedUpdate]) -> Result<(), ForumError> {
        if self.offline_sinks.contains(forum) {
            return Err(ForumError::Status {
                endpoint: format!("r/{}/api/flaircsv", forum),
                status: 503,
            });
        }

        self.uploads
            .lock()
            .unwrap()
            .push((forum.to_string(), updates.to_vec()));

        let mut flairs = self.flairs.lock().unwrap();
        let entries = flairs.entry(forum.to_string()).or_default();
        let mut rejected = Vec::new();

        for update in updates {
            if self.refused_users.contains(&update.user) {
                rejected.push(RejectedRow {
                    user: update.user.clone(),
                    reason: "unable to resolve user".to_string(),
                });
                continue;
            }
            entries.insert(
                update.user.clone(),
                FlairEntry::new(
                    &update.user,
                    Some(&update.flair_text),
                    Some(&update.flair_css_class),
                ),
            );
        }

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(ForumError::Rejected(rejected))
        }
    }
}

fn context(forums: &[&str], pattern: &str) -> SyncContext {
    SyncContext {
        forums: forums.iter().map(|f| f.to_string()).collect(),
        rule: MatchRule::new(pattern).unwrap(),
        suppression: SuppressionLists::default(),
        dry_run: false,
    }
}

fn update(user: &str, css: &str, text: &str) -> PlannedUpdate {
    PlannedUpdate {
        user: user.to_string(),
        flair_css_class: css.to_string(),
        flair_text: text.to_string(),
    }
}

// ============================================================================
// Sync Cycle Tests
// ============================================================================

#[tokio::test]
async fn test_missing_user_propagated_with_bare_flair() {
    let forums = FakeForums::new(&[("x", &[("u1", "", "cool T1 badge")]), ("y", &[])]);
    let ctx = context(&["x", "y"], "T[0-9]");

    let report = run_cycle(&ctx, &forums, &forums, &mut AutomaticResolver)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.users_merged, 1);
    assert_eq!(forums.uploads_for("y"), vec![update("u1", "T1", "")]);
    assert!(forums.uploads_for("x").is_empty());
    // Forum x keeps its own decoration
    assert_eq!(forums.css("x", "u1").as_deref(), Some("cool T1 badge"));
}

#[tokio::test]
async fn test_unmanaged_flair_preserved_when_propagating() {
    let forums = FakeForums::new(&[
        ("x", &[("u1", "", "T1")]),
        ("y", &[("u1", "Knight", "moderator")]),
    ]);
    let ctx = context(&["x", "y"], "T[0-9]");

    let report = run_cycle(&ctx, &forums, &forums, &mut AutomaticResolver)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(
        forums.uploads_for("y"),
        vec![update("u1", "moderator T1", "Knight")]
    );
    assert_eq!(forums.css("y", "u1").as_deref(), Some("moderator T1"));

    let second = run_cycle(&ctx, &forums, &forums, &mut AutomaticResolver)
        .await
        .unwrap();
    assert_eq!(second.total_planned(), 0);
}

#[tokio::test]
async fn test_second_cycle_is_idempotent() {
    let forums = FakeForums::new(&[
        ("x", &[("u1", "Knight", "cool T1 badge"), ("u2", "", "T2 staff")]),
        ("y", &[("u2", "Pyro", "T5")]),
    ]);
    let ctx = context(&["x", "y"], "T[0-9]");

    let first = run_cycle(&ctx, &forums, &forums, &mut AutomaticResolver)
        .await
        .unwrap();
    assert_eq!(first.total_planned(), 2);

    let second = run_cycle(&ctx, &forums, &forums, &mut AutomaticResolver)
        .await
        .unwrap();
    assert_eq!(second.total_planned(), 0);
    assert!(second.conflicts.is_empty());
    assert_eq!(forums.upload_count(), 1);
}

#[tokio::test]
async fn test_tie_keeps_first_forum_value() {
    let forums = FakeForums::new(&[("x", &[("u2", "", "T2 staff")]), ("y", &[("u2", "Pyro", "T5")])]);
    let ctx = context(&["x", "y"], "T[0-9]");

    let report = run_cycle(&ctx, &forums, &forums, &mut AutomaticResolver)
        .await
        .unwrap();

    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].result, "T2");
    assert_eq!(forums.uploads_for("y"), vec![update("u2", "T2", "Pyro")]);
}

#[tokio::test]
async fn test_longer_flair_wins_across_forums() {
    let forums = FakeForums::new(&[
        ("a", &[("u", "", "veteran bronze")]),
        ("b", &[("u", "", "gold")]),
    ]);
    let ctx = context(&["b", "a"], "bronze|gold");

    run_cycle(&ctx, &forums, &forums, &mut AutomaticResolver)
        .await
        .unwrap();

    assert_eq!(forums.uploads_for("b"), vec![update("u", "bronze", "")]);
    assert!(forums.uploads_for("a").is_empty());
}

#[tokio::test]
async fn test_kill_and_ignore_lists() {
    let forums = FakeForums::new(&[
        ("x", &[("troll", "Hollow", "Knight T3"), ("bot", "", "T9")]),
        ("y", &[("troll", "", "T3")]),
    ]);
    let mut ctx = context(&["x", "y"], "T[0-9]");
    ctx.suppression = SuppressionLists::new(["bot".to_string()], ["troll".to_string()]);

    let report = run_cycle(&ctx, &forums, &forums, &mut AutomaticResolver)
        .await
        .unwrap();
    assert!(report.is_success());

    assert_eq!(forums.uploads_for("x"), vec![update("troll", "Knight", "Hollow")]);
    assert_eq!(forums.uploads_for("y"), vec![update("troll", "", "")]);
    assert!(forums.css("y", "bot").is_none());

    // Cleared users no longer carry a valid flair, so nothing more to do
    let second = run_cycle(&ctx, &forums, &forums, &mut AutomaticResolver)
        .await
        .unwrap();
    assert_eq!(second.total_planned(), 0);
}

#[tokio::test]
async fn test_upload_failures_isolated_per_forum() {
    let mut forums = FakeForums::new(&[("a", &[("u", "", "T1")]), ("b", &[]), ("c", &[])]);
    forums.offline_sinks.insert("b".to_string());
    let ctx = context(&["a", "b", "c"], "T[0-9]");

    let report = run_cycle(&ctx, &forums, &forums, &mut AutomaticResolver)
        .await
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.failed_forums(), vec!["b".to_string()]);
    assert_eq!(forums.uploads_for("c"), vec![update("u", "T1", "")]);

    let b = report.forums.iter().find(|f| f.forum == "b").unwrap();
    assert_eq!(b.planned, 1);
    assert_eq!(b.applied, 0);
    assert!(b.error.as_deref().unwrap().contains("503"));
}

#[tokio::test]
async fn test_rejected_rows_reported_as_partial_failure() {
    let mut forums = FakeForums::new(&[("a", &[("u1", "", "T1"), ("ghost", "", "T2")]), ("b", &[])]);
    forums.refused_users.insert("ghost".to_string());
    let ctx = context(&["a", "b"], "T[0-9]");

    let report = run_cycle(&ctx, &forums, &forums, &mut AutomaticResolver)
        .await
        .unwrap();

    let b = &report.forums[1];
    assert_eq!(b.planned, 2);
    assert_eq!(b.applied, 1);
    assert!(b.error.as_deref().unwrap().contains("rejected 1 of 2"));
    assert_eq!(forums.css("b", "u1").as_deref(), Some("T1"));
}

#[tokio::test]
async fn test_source_failure_aborts_cycle_before_upload() {
    let mut forums = FakeForums::new(&[("a", &[("u", "", "T1")]), ("b", &[])]);
    forums.offline_sources.insert("b".to_string());
    let ctx = context(&["a", "b"], "T[0-9]");

    let err = run_cycle(&ctx, &forums, &forums, &mut AutomaticResolver)
        .await
        .unwrap_err();

    assert!(matches!(err, FlairError::SourceUnavailable { ref forum, .. } if forum == "b"));
    assert_eq!(forums.upload_count(), 0);
}

#[tokio::test]
async fn test_conflict_without_operator_aborts_cycle() {
    let forums = FakeForums::new(&[("x", &[("u", "", "T1")]), ("y", &[("u", "", "T2")])]);
    let ctx = context(&["x", "y"], "T[0-9]");

    let err = run_cycle(&ctx, &forums, &forums, &mut FailFastResolver)
        .await
        .unwrap_err();

    assert!(matches!(err, FlairError::OperatorInputRequired { .. }));
    assert_eq!(forums.upload_count(), 0);
}

#[tokio::test]
async fn test_dry_run_uploads_nothing() {
    let forums = FakeForums::new(&[("x", &[("u1", "", "T1")]), ("y", &[])]);
    let mut ctx = context(&["x", "y"], "T[0-9]");
    ctx.dry_run = true;

    let report = run_cycle(&ctx, &forums, &forums, &mut AutomaticResolver)
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.total_planned(), 1);
    assert_eq!(report.total_applied(), 0);
    assert_eq!(forums.upload_count(), 0);
}

// ============================================================================
// Sync Loop Tests
// ============================================================================

#[tokio::test]
async fn test_once_mode_fails_on_forum_error() {
    let mut forums = FakeForums::new(&[("a", &[("u", "", "T1")]), ("b", &[])]);
    forums.offline_sinks.insert("b".to_string());
    let ctx = context(&["a", "b"], "T[0-9]");

    let err = run_sync_loop(
        &ctx,
        &forums,
        &forums,
        &mut AutomaticResolver,
        RunMode::Once,
        Duration::from_secs(300),
        std::future::pending::<()>(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, FlairError::CycleFailed { ref forums } if forums == &["b".to_string()]));
}

#[tokio::test]
async fn test_once_mode_succeeds() {
    let forums = FakeForums::new(&[("a", &[("u", "", "T1")]), ("b", &[])]);
    let ctx = context(&["a", "b"], "T[0-9]");

    run_sync_loop(
        &ctx,
        &forums,
        &forums,
        &mut AutomaticResolver,
        RunMode::Once,
        Duration::from_secs(300),
        std::future::pending::<()>(),
    )
    .await
    .unwrap();

    assert_eq!(forums.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_mode_repeats_until_shutdown() {
    let mut forums = FakeForums::new(&[("a", &[("u", "", "T1")])]);
    // Failing cycles are retried after the interval
    forums.offline_sources.insert("a".to_string());
    let ctx = context(&["a"], "T[0-9]");

    run_sync_loop(
        &ctx,
        &forums,
        &forums,
        &mut AutomaticResolver,
        RunMode::Continuous,
        Duration::from_secs(100),
        tokio::time::sleep(Duration::from_secs(250)),
    )
    .await
    .unwrap();

    assert_eq!(forums.fetches.load(Ordering::SeqCst), 3);
}

// ============================================================================
// Karma Bot Tests
// ============================================================================

#[derive(Default)]
struct FakeKarmaForum {
    comments: Vec<Comment>,
    submissions: BTreeMap<String, Submission>,
    flairs: Mutex<BTreeMap<String, FlairEntry>>,
    replies: Mutex<Vec<(String, String)>>,
    flair_updates: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl KarmaForum for FakeKarmaForum {
    async fn new_comments(&self, _forum: &str, limit: usize) -> Result<Vec<Comment>, ForumError> {
        Ok(self.comments.iter().take(limit).cloned().collect())
    }

    async fn comment(&self, fullname: &str) -> Result<Option<Comment>, ForumError> {
        Ok(self.comments.iter().find(|c| c.name == fullname).cloned())
    }

    async fn submission(&self, fullname: &str) -> Result<Option<Submission>, ForumError> {
        Ok(self.submissions.get(fullname).cloned())
    }

    async fn user_flair(&self, _forum: &str, user: &str) -> Result<Option<FlairEntry>, ForumError> {
        Ok(self.flairs.lock().unwrap().get(user).cloned())
    }

    async fn set_flair(
        &self,
        _forum: &str,
        user: &str,
        text: &str,
        css_class: &str,
    ) -> Result<(), ForumError> {
        self.flair_updates.lock().unwrap().push((
            user.to_string(),
            text.to_string(),
            css_class.to_string(),
        ));
        self.flairs
            .lock()
            .unwrap()
            .insert(user.to_string(), FlairEntry::new(user, Some(text), Some(css_class)));
        Ok(())
    }

    async fn reply(&self, parent_fullname: &str, text: &str) -> Result<(), ForumError> {
        self.replies
            .lock()
            .unwrap()
            .push((parent_fullname.to_string(), text.trim().to_string()));
        Ok(())
    }
}

/// Memory ledger that remembers being closed
#[derive(Default)]
struct TrackingLedger {
    inner: MemoryGrantLedger,
    closed: AtomicBool,
}

#[async_trait]
impl GrantLedger for TrackingLedger {
    async fn record_grant(&self, grant: &KarmaGrant) -> Result<(), KarmaError> {
        self.inner.record_grant(grant).await
    }

    async fn karma_for(&self, recipient: &str) -> Result<i64, KarmaError> {
        self.inner.karma_for(recipient).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn comment(name: &str, author: &str, body: &str, parent_id: &str) -> Comment {
    Comment {
        name: name.to_string(),
        author: author.to_string(),
        body: body.to_string(),
        link_id: "t3_s1".to_string(),
        parent_id: parent_id.to_string(),
        link_author: Some("host".to_string()),
        created_utc: 0.0,
    }
}

/// Summon thread by `host`; `helper` answered. Newest comment first.
fn summon_thread(flair: &str) -> FakeKarmaForum {
    let submission = Submission {
        name: "t3_s1".to_string(),
        author: "host".to_string(),
        link_flair_text: Some(flair.to_string()),
    };

    FakeKarmaForum {
        comments: vec![
            comment("t1_d", "lurker", "+karma", "t1_a"),
            comment("t1_c", "host", " +Karma ", "t1_a"),
            comment("t1_b", "host", "+karma", "t1_a"),
            comment("t1_a", "helper", "glad to help", "t3_s1"),
        ],
        submissions: BTreeMap::from([("t3_s1".to_string(), submission)]),
        flairs: Mutex::new(BTreeMap::from([(
            "helper".to_string(),
            FlairEntry::new("helper", Some("Sunbro"), Some("knight")),
        )])),
        ..FakeKarmaForum::default()
    }
}

fn shipped_templates() -> ReplyTemplates {
    ReplyTemplates::new(concat!(env!("CARGO_MANIFEST_DIR"), "/tmpl/karmaflair"))
}

fn karma_bot(
    forum: Arc<FakeKarmaForum>,
    ledger: Arc<dyn GrantLedger>,
    templates: ReplyTemplates,
) -> KarmaBot {
    KarmaBot::new(
        forum,
        ledger,
        CommandParser::new("karma").unwrap(),
        templates,
        KarmaSettings {
            forum: "summonsign".to_string(),
            valid_link_flair_text: "Summon".to_string(),
            comment_limit: 100,
        },
    )
}

#[tokio::test]
async fn test_karma_pass_grants_once_and_replies() {
    let forum = Arc::new(summon_thread("Summon"));
    let ledger = Arc::new(MemoryGrantLedger::new());
    let mut bot = karma_bot(forum.clone(), ledger.clone(), shipped_templates());

    let stats = bot.poll_once().await.unwrap();
    assert_eq!(stats.fetched, 4);
    assert_eq!(stats.new, 4);
    assert_eq!(stats.commands, 3);
    assert_eq!(stats.failed, 0);

    let replies = forum.replies.lock().unwrap().clone();
    assert_eq!(
        replies,
        vec![
            (
                "t1_b".to_string(),
                "Thanks host! Karma granted to helper.".to_string()
            ),
            (
                "t1_c".to_string(),
                "host has already granted karma to helper in this thread.".to_string()
            ),
            (
                "t1_d".to_string(),
                "Sorry lurker, karma can only be granted between the submitter and the people who helped them."
                    .to_string()
            ),
        ]
    );

    assert_eq!(ledger.karma_for("helper").await.unwrap(), 1);
    assert_eq!(
        forum.flair_updates.lock().unwrap().clone(),
        vec![(
            "helper".to_string(),
            "1 Karma".to_string(),
            "knight".to_string()
        )]
    );

    // Already-seen comments are skipped on the next pass
    let again = bot.poll_once().await.unwrap();
    assert_eq!(again.new, 0);
    assert_eq!(forum.replies.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_karma_requires_link_flair() {
    let forum = Arc::new(summon_thread("Discussion"));
    let ledger = Arc::new(MemoryGrantLedger::new());
    let bot = karma_bot(forum.clone(), ledger.clone(), shipped_templates());

    let outcome = bot
        .process_comment(&forum.comments[2])
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Some(KarmaOutcome::Declined(GrantDecision::InvalidLinkFlair))
    );
    assert_eq!(ledger.karma_for("helper").await.unwrap(), 0);
    assert!(forum.flair_updates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_root_and_plain_comments_ignored() {
    let forum = Arc::new(summon_thread("Summon"));
    let bot = karma_bot(
        forum.clone(),
        Arc::new(MemoryGrantLedger::new()),
        shipped_templates(),
    );

    let root_command = comment("t1_r", "host", "+karma", "t3_s1");
    assert_eq!(bot.process_comment(&root_command).await.unwrap(), None);
    assert_eq!(bot.process_comment(&forum.comments[3]).await.unwrap(), None);

    let revoke = comment("t1_x", "host", "-karma", "t1_a");
    assert_eq!(bot.process_comment(&revoke).await.unwrap(), None);

    assert!(forum.replies.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_template_counts_as_failure() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("successful_award.tpl"), "ok $parent_name").unwrap();

    let forum = Arc::new(summon_thread("Summon"));
    let mut bot = karma_bot(
        forum.clone(),
        Arc::new(MemoryGrantLedger::new()),
        ReplyTemplates::new(dir.path()),
    );

    let stats = bot.poll_once().await.unwrap();
    assert_eq!(stats.commands, 3);
    // already_awarded and invalid_author templates are missing
    assert_eq!(stats.failed, 2);
    assert_eq!(
        forum.replies.lock().unwrap().clone(),
        vec![("t1_b".to_string(), "ok helper".to_string())]
    );
}

#[tokio::test]
async fn test_karma_run_once_closes_ledger() {
    let forum = Arc::new(summon_thread("Summon"));
    let ledger = Arc::new(TrackingLedger::default());
    let mut bot = karma_bot(forum.clone(), ledger.clone(), shipped_templates());

    bot.run(
        RunMode::Once,
        Duration::from_secs(60),
        std::future::pending::<()>(),
    )
    .await
    .unwrap();

    assert!(ledger.closed.load(Ordering::SeqCst));
    assert_eq!(forum.replies.lock().unwrap().len(), 3);
}
