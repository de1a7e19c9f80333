//! Merge Engine
//!
//! Folds forum snapshots into one canonical flair per user. Forums are folded
//! strictly in configured order: the first forum a user appears in sets the
//! baseline that later forums are compared against.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::flair::{
    Conflict, ConflictResolver, FlairError, ForumSnapshot, LabelRecord, MatchRule, Resolution,
};

/// Agreed flair per user for the current cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalMapping {
    values: BTreeMap<String, String>,
    /// Users an operator chose to leave alone this cycle
    held: BTreeSet<String>,
}

impl CanonicalMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user: &str) -> Option<&str> {
        self.values.get(user).map(String::as_str)
    }

    pub fn contains(&self, user: &str) -> bool {
        self.values.contains_key(user)
    }

    pub fn is_held(&self, user: &str) -> bool {
        self.held.contains(user)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(u, v)| (u.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn set(&mut self, user: &str, value: &str) {
        self.values.insert(user.to_string(), value.to_string());
    }

    fn hold(&mut self, user: &str) {
        self.held.insert(user.to_string());
    }
}

impl FromIterator<(String, String)> for CanonicalMapping {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
            held: BTreeSet::new(),
        }
    }
}

/// Valid flair a canonical value stands for.
///
/// Canonical values may be operator overrides that carry extra text; only
/// the part matching the rule is compared against forums.
pub fn canonical_valid(value: &str, rule: &MatchRule) -> String {
    let valid = rule.extract_valid(value);
    if valid.is_empty() {
        value.trim().to_string()
    } else {
        valid
    }
}

/// A conflict and how it was settled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub user: String,
    pub forum: String,
    pub canonical: String,
    pub forum_value: String,
    pub resolution: Resolution,
    /// Canonical value after the resolution
    pub result: String,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub canonical: CanonicalMapping,
    pub conflicts: Vec<ConflictRecord>,
}

/// Fold `snapshots` in `order` into a canonical mapping.
pub fn merge_snapshots(
    order: &[String],
    snapshots: &BTreeMap<String, ForumSnapshot>,
    rule: &MatchRule,
    resolver: &mut dyn ConflictResolver,
) -> Result<MergeOutcome, FlairError> {
    let mut outcome = MergeOutcome::default();

    for forum in order {
        let Some(snapshot) = snapshots.get(forum) else {
            warn!(forum = %forum, "No snapshot for forum, skipping merge");
            continue;
        };

        // Partition against the mapping as it stood before this forum
        let (existing, new): (Vec<(&String, &LabelRecord)>, Vec<(&String, &LabelRecord)>) =
            snapshot
                .records
                .iter()
                .filter(|(_, record)| !record.valid_part.is_empty())
                .partition(|(user, _)| outcome.canonical.contains(user));

        for (user, record) in &new {
            outcome.canonical.set(user, &record.valid_part);
        }

        for (user, record) in existing {
            let Some(canonical) = outcome.canonical.get(user).map(str::to_string) else {
                continue;
            };
            let valid = canonical_valid(&canonical, rule);

            if valid == record.valid_part {
                continue;
            }

            let conflict = Conflict {
                user: user.clone(),
                forum: forum.clone(),
                canonical: canonical.clone(),
                canonical_valid: valid,
                forum_value: record.valid_part.clone(),
            };

            let resolution = resolver.resolve(&conflict, rule)?;
            match &resolution {
                Resolution::KeepCanonical => {}
                Resolution::TakeForum => outcome.canonical.set(user, &record.valid_part),
                Resolution::Custom(value) => outcome.canonical.set(user, value),
                Resolution::NoOp => outcome.canonical.hold(user),
            }

            let result = outcome.canonical.get(user).unwrap_or_default().to_string();

            info!(
                user = %user,
                forum = %forum,
                canonical = %conflict.canonical,
                found = %conflict.forum_value,
                resolution = ?resolution,
                "Mismatched flair"
            );

            outcome.conflicts.push(ConflictRecord {
                user: user.clone(),
                forum: forum.clone(),
                canonical: conflict.canonical,
                forum_value: conflict.forum_value,
                resolution,
                result,
            });
        }

        debug!(
            forum = %forum,
            new_users = new.len(),
            canonical_users = outcome.canonical.len(),
            "Merged forum"
        );
    }

    Ok(outcome)
}
