//! Karma bot
//!
//! Watches a forum's newest comments for `+karma` replies, records grants in
//! the ledger, updates the recipient's flair text to their karma count and
//! answers every command with a templated reply.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::RunMode;
use crate::forum::{Comment, KarmaForum};
use crate::karma::{
    CommandParser, GrantDecision, GrantLedger, KarmaError, KarmaGrant, ReplyTemplates,
    evaluate_grant,
};

/// Remembered comment ids
const SEEN_CAPACITY: usize = 2000;

#[derive(Debug, Clone)]
pub struct KarmaSettings {
    pub forum: String,
    pub valid_link_flair_text: String,
    pub comment_limit: usize,
}

/// What the bot did with one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KarmaOutcome {
    Declined(GrantDecision),
    AlreadyAwarded,
    Awarded { recipient: String, karma: i64 },
}

impl KarmaOutcome {
    pub fn template_name(&self) -> &'static str {
        match self {
            KarmaOutcome::Declined(decision) => decision.template_name(),
            KarmaOutcome::AlreadyAwarded => "already_awarded",
            KarmaOutcome::Awarded { .. } => "successful_award",
        }
    }
}

/// Counts for one polling pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub fetched: usize,
    pub new: usize,
    pub commands: usize,
    pub failed: usize,
}

/// Bounded set of comment ids already handled by this process
#[derive(Debug)]
struct SeenComments {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenComments {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns false if `id` was already present
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.ids.remove(&oldest);
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }
}

pub struct KarmaBot {
    forum: Arc<dyn KarmaForum>,
    ledger: Arc<dyn GrantLedger>,
    parser: CommandParser,
    templates: ReplyTemplates,
    settings: KarmaSettings,
    seen: SeenComments,
}

impl KarmaBot {
    pub fn new(
        forum: Arc<dyn KarmaForum>,
        ledger: Arc<dyn GrantLedger>,
        parser: CommandParser,
        templates: ReplyTemplates,
        settings: KarmaSettings,
    ) -> Self {
        Self {
            forum,
            ledger,
            parser,
            templates,
            settings,
            seen: SeenComments::new(SEEN_CAPACITY),
        }
    }

    /// Fetch the newest comments and handle the unseen ones, oldest first.
    ///
    /// Failures on individual comments are logged and counted; only a failed
    /// fetch fails the pass.
    pub async fn poll_once(&mut self) -> Result<PassStats, KarmaError> {
        let comments = self
            .forum
            .new_comments(&self.settings.forum, self.settings.comment_limit)
            .await?;

        let mut stats = PassStats {
            fetched: comments.len(),
            ..PassStats::default()
        };

        for comment in comments.iter().rev() {
            if !self.seen.insert(&comment.name) {
                continue;
            }
            stats.new += 1;

            match self.process_comment(comment).await {
                Ok(Some(_)) => stats.commands += 1,
                Ok(None) => {}
                Err(err) => {
                    stats.commands += 1;
                    stats.failed += 1;
                    error!(comment = %comment.name, error = %err, "Failed to process karma command");
                }
            }
        }

        debug!(
            forum = %self.settings.forum,
            fetched = stats.fetched,
            new = stats.new,
            commands = stats.commands,
            failed = stats.failed,
            "Karma pass complete"
        );

        Ok(stats)
    }

    /// Handle one comment. Returns `None` when it is not a karma command.
    pub async fn process_comment(
        &self,
        comment: &Comment,
    ) -> Result<Option<KarmaOutcome>, KarmaError> {
        if comment.is_root() || !comment.has_author() {
            return Ok(None);
        }

        let Some(command) = self.parser.parse(&comment.body) else {
            return Ok(None);
        };

        if !command.is_karma_grant() {
            debug!(comment = %comment.name, command = ?command, "Ignoring command");
            return Ok(None);
        }

        debug!(comment = %comment.name, author = %comment.author, "Checking karma command");

        let Some(submission) = self.forum.submission(&comment.link_id).await? else {
            warn!(comment = %comment.name, link = %comment.link_id, "Submission not found");
            return Ok(None);
        };

        let Some(parent) = self.forum.comment(&comment.parent_id).await? else {
            warn!(comment = %comment.name, parent = %comment.parent_id, "Parent comment not found");
            return Ok(None);
        };

        if !parent.has_author() {
            debug!(comment = %comment.name, "Parent comment was deleted");
            return Ok(None);
        }

        let decision = evaluate_grant(
            comment,
            &parent,
            &submission,
            &self.parser,
            &self.settings.valid_link_flair_text,
        );

        let outcome = match decision {
            GrantDecision::Grant => {
                let grant = KarmaGrant::new(submission.short_id(), &parent.author, &comment.author);
                self.record(grant).await?
            }
            declined => {
                info!(
                    comment = %comment.name,
                    granter = %comment.author,
                    recipient = %parent.author,
                    decision = ?declined,
                    "Karma grant declined"
                );
                KarmaOutcome::Declined(declined)
            }
        };

        let vars = BTreeMap::from([
            ("name", comment.author.as_str()),
            ("parent_name", parent.author.as_str()),
        ]);
        let text = self.templates.render(outcome.template_name(), &vars).await?;
        self.forum.reply(&comment.name, &text).await?;

        Ok(Some(outcome))
    }

    async fn record(&self, grant: KarmaGrant) -> Result<KarmaOutcome, KarmaError> {
        match self.ledger.record_grant(&grant).await {
            Ok(()) => {}
            Err(KarmaError::AlreadyAwarded { .. }) => {
                info!(
                    recipient = %grant.recipient,
                    granter = %grant.granter,
                    submission = %grant.submission_id,
                    "Karma already granted"
                );
                return Ok(KarmaOutcome::AlreadyAwarded);
            }
            Err(err) => return Err(err),
        }

        info!(
            recipient = %grant.recipient,
            granter = %grant.granter,
            submission = %grant.submission_id,
            "Karma granted"
        );

        let karma = self.ledger.karma_for(&grant.recipient).await?;
        if let Err(err) = self.update_flair(&grant.recipient, karma).await {
            warn!(recipient = %grant.recipient, error = %err, "Failed to update karma flair");
        }

        Ok(KarmaOutcome::Awarded {
            recipient: grant.recipient,
            karma,
        })
    }

    /// Set flair text to the karma count, keeping the current CSS class
    async fn update_flair(&self, user: &str, karma: i64) -> Result<(), KarmaError> {
        if karma <= 0 {
            return Ok(());
        }

        let current = self.forum.user_flair(&self.settings.forum, user).await?;
        let css_class = current
            .and_then(|entry| entry.flair_css_class)
            .unwrap_or_default();
        let text = format!("{} Karma", karma);

        self.forum
            .set_flair(&self.settings.forum, user, &text, &css_class)
            .await?;

        info!(user = %user, flair = %text, "Karma flair updated");
        Ok(())
    }

    /// Poll until `shutdown` resolves, or once. The ledger is closed on exit.
    pub async fn run<S>(
        &mut self,
        mode: RunMode,
        interval: Duration,
        shutdown: S,
    ) -> Result<(), KarmaError>
    where
        S: Future<Output = ()>,
    {
        info!(forum = %self.settings.forum, mode = ?mode, "Starting karma bot");
        let result = self.poll_loop(mode, interval, shutdown).await;
        self.ledger.close().await;
        info!("Stopping karma bot");
        result
    }

    async fn poll_loop<S>(
        &mut self,
        mode: RunMode,
        interval: Duration,
        shutdown: S,
    ) -> Result<(), KarmaError>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let result = tokio::select! {
                result = self.poll_once() => result,
                _ = &mut shutdown => return Ok(()),
            };

            if mode == RunMode::Once {
                return result.map(|_| ());
            }

            if let Err(err) = result {
                warn!(error = %err, retry_in_secs = interval.as_secs(), "Karma pass failed");
            }

            debug!(forum = %self.settings.forum, "Pausing karma bot");
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut shutdown => return Ok(()),
            }
        }
    }
}
