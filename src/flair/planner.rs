//! Sync Planner
//!
//! Turns the canonical mapping into per-forum flair updates.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::flair::{CanonicalMapping, ForumSnapshot, MatchRule, canonical_valid, compose};

/// Users the sync must never write (`ignore`) or must clear (`kill`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionLists {
    pub ignore: BTreeSet<String>,
    pub kill: BTreeSet<String>,
}

impl SuppressionLists {
    pub fn new<I, K>(ignore: I, kill: K) -> Self
    where
        I: IntoIterator<Item = String>,
        K: IntoIterator<Item = String>,
    {
        Self {
            ignore: ignore.into_iter().collect(),
            kill: kill.into_iter().collect(),
        }
    }

    pub fn is_ignored(&self, user: &str) -> bool {
        self.ignore.contains(user)
    }

    pub fn is_killed(&self, user: &str) -> bool {
        self.kill.contains(user)
    }
}

/// One flair write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedUpdate {
    pub user: String,
    pub flair_css_class: String,
    pub flair_text: String,
}

/// Updates for one forum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumPlan {
    pub forum: String,
    pub updates: Vec<PlannedUpdate>,
}

/// Updates for every forum, in configured order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub forums: Vec<ForumPlan>,
}

impl SyncPlan {
    pub fn total_updates(&self) -> usize {
        self.forums.iter().map(|f| f.updates.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_updates() == 0
    }

    pub fn updates_for(&self, forum: &str) -> &[PlannedUpdate] {
        self.forums
            .iter()
            .find(|f| f.forum == forum)
            .map(|f| f.updates.as_slice())
            .unwrap_or(&[])
    }
}

/// Users whose flair in `snapshot` must change, ascending.
pub fn users_to_sync(
    snapshot: &ForumSnapshot,
    canonical: &CanonicalMapping,
    rule: &MatchRule,
    suppression: &SuppressionLists,
) -> BTreeSet<String> {
    let mut to_sync = BTreeSet::new();

    for (user, value) in canonical.iter() {
        match snapshot.get(user) {
            None => {
                to_sync.insert(user.to_string());
            }
            Some(record) if record.valid_part != canonical_valid(value, rule) => {
                to_sync.insert(user.to_string());
            }
            Some(_) => {}
        }
    }

    // Killed users keep getting cleared while they still carry flair
    for user in &suppression.kill {
        if snapshot.contains(user) {
            to_sync.insert(user.clone());
        }
    }

    to_sync
}

/// Plan the writes needed to bring one forum in line with `canonical`.
pub fn plan_forum(
    snapshot: &ForumSnapshot,
    canonical: &CanonicalMapping,
    rule: &MatchRule,
    suppression: &SuppressionLists,
) -> Vec<PlannedUpdate> {
    let mut updates = Vec::new();

    for user in users_to_sync(snapshot, canonical, rule, suppression) {
        let value = canonical.get(&user).unwrap_or_default();

        if value.is_empty()
            || suppression.is_ignored(&user)
            || canonical.is_held(&user)
            || snapshot.is_ambiguous(&user)
        {
            continue;
        }

        // Users without a valid part still have flair worth keeping
        let existing = snapshot.get(&user).or_else(|| snapshot.unmanaged(&user));

        let flair_css_class = if suppression.is_killed(&user) {
            match snapshot.get(&user) {
                Some(record) => compose(&record.other_part, ""),
                None => continue,
            }
        } else {
            let other = existing.map(|r| r.other_part.as_str()).unwrap_or_default();
            compose(other, value)
        };

        let flair_text = existing
            .map(|r| r.display_text.clone())
            .unwrap_or_default();

        debug!(
            forum = %snapshot.forum,
            user = %user,
            flair = %flair_css_class,
            "Planned flair update"
        );

        updates.push(PlannedUpdate {
            user,
            flair_css_class,
            flair_text,
        });
    }

    updates
}

/// Plan every forum in `order`.
pub fn plan_sync(
    order: &[String],
    snapshots: &BTreeMap<String, ForumSnapshot>,
    canonical: &CanonicalMapping,
    rule: &MatchRule,
    suppression: &SuppressionLists,
) -> SyncPlan {
    let forums = order
        .iter()
        .filter_map(|forum| snapshots.get(forum))
        .map(|snapshot| ForumPlan {
            forum: snapshot.forum.clone(),
            updates: plan_forum(snapshot, canonical, rule, suppression),
        })
        .collect();

    SyncPlan { forums }
}
