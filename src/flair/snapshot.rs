//! Per-forum flair snapshots
//!
//! A snapshot tracks users who currently carry a recognized flair. Users with
//! only unmanaged flair are kept apart so a write-back can preserve it, and
//! ambiguous labels are remembered so nothing ever writes over them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::flair::{FlairError, MatchRule};
use crate::forum::{FlairEntry, FlairSource};

/// One user's split label in one forum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub valid_part: String,
    pub other_part: String,
    /// Flair text shown next to the name; carried through unchanged
    pub display_text: String,
}

/// All recognized flairs of one forum for the current cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForumSnapshot {
    pub forum: String,
    pub records: BTreeMap<String, LabelRecord>,
    /// Users whose flair carries no valid part; `valid_part` is always empty
    pub unmanaged: BTreeMap<String, LabelRecord>,
    /// Users whose label matched the valid flair pattern more than once
    pub ambiguous: BTreeSet<String>,
}

impl ForumSnapshot {
    pub fn new(forum: &str) -> Self {
        Self {
            forum: forum.to_string(),
            ..Default::default()
        }
    }

    /// Split every entry with `rule`, keeping users with a valid flair.
    pub fn from_entries<I>(forum: &str, entries: I, rule: &MatchRule) -> Self
    where
        I: IntoIterator<Item = FlairEntry>,
    {
        let mut snapshot = Self::new(forum);

        for entry in entries {
            let label = entry.flair_css_class.unwrap_or_default();
            let split = rule.split(&label);

            if split.is_ambiguous() {
                warn!(
                    forum = %forum,
                    user = %entry.user,
                    label = %label,
                    "Ambiguous flair label, leaving it untouched"
                );
                snapshot.ambiguous.insert(entry.user);
                continue;
            }

            // other() only fails for ambiguous labels, handled above
            let other_part = split.other().unwrap_or_default();
            let display_text = entry.flair_text.unwrap_or_default();

            let valid_part = split.valid();
            if valid_part.is_empty() {
                if !other_part.is_empty() || !display_text.is_empty() {
                    snapshot.unmanaged.insert(
                        entry.user,
                        LabelRecord {
                            valid_part: String::new(),
                            other_part,
                            display_text,
                        },
                    );
                }
                continue;
            }

            debug!(
                forum = %forum,
                user = %entry.user,
                flair = %valid_part,
                "Recognized flair"
            );

            snapshot.records.insert(
                entry.user,
                LabelRecord {
                    valid_part: valid_part.to_string(),
                    other_part,
                    display_text,
                },
            );
        }

        snapshot
    }

    pub fn get(&self, user: &str) -> Option<&LabelRecord> {
        self.records.get(user)
    }

    /// Flair of a user without a valid part
    pub fn unmanaged(&self, user: &str) -> Option<&LabelRecord> {
        self.unmanaged.get(user)
    }

    pub fn contains(&self, user: &str) -> bool {
        self.records.contains_key(user)
    }

    pub fn is_ambiguous(&self, user: &str) -> bool {
        self.ambiguous.contains(user)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Fetch and split one forum's flairs.
pub async fn build_snapshot(
    source: &dyn FlairSource,
    forum: &str,
    rule: &MatchRule,
) -> Result<ForumSnapshot, FlairError> {
    let entries = source
        .fetch_flairs(forum)
        .await
        .map_err(|source| FlairError::SourceUnavailable {
            forum: forum.to_string(),
            source,
        })?;

    let fetched = entries.len();
    let snapshot = ForumSnapshot::from_entries(forum, entries, rule);

    info!(
        forum = %forum,
        fetched = fetched,
        recognized = snapshot.len(),
        ambiguous = snapshot.ambiguous.len(),
        "Loaded flairs"
    );

    Ok(snapshot)
}

/// Snapshot every forum in order. Any failure discards all snapshots.
pub async fn build_snapshots(
    source: &dyn FlairSource,
    forums: &[String],
    rule: &MatchRule,
) -> Result<BTreeMap<String, ForumSnapshot>, FlairError> {
    let mut snapshots = BTreeMap::new();

    for forum in forums {
        let snapshot = build_snapshot(source, forum, rule).await?;
        snapshots.insert(forum.clone(), snapshot);
    }

    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forum::ForumError;
    use async_trait::async_trait;

    struct StaticSource(Vec<FlairEntry>);

    #[async_trait]
    impl FlairSource for StaticSource {
        async fn fetch_flairs(&self, forum: &str) -> Result<Vec<FlairEntry>, ForumError> {
            if forum == "offline" {
                return Err(ForumError::Unavailable("timed out".to_string()));
            }
            Ok(self.0.clone())
        }
    }

    fn rule() -> MatchRule {
        MatchRule::new("T[0-9]").unwrap()
    }

    #[test]
    fn test_from_entries_separates_unmanaged_flair() {
        let entries = vec![
            FlairEntry::new("alice", Some("Knight"), Some("cool T1 badge")),
            FlairEntry::new("bob", None, Some("moderator")),
            FlairEntry::new("carol", None, None),
            FlairEntry::new("dave", None, Some("T1 T2")),
        ];

        let snapshot = ForumSnapshot::from_entries("darksouls", entries, &rule());

        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.get("alice"),
            Some(&LabelRecord {
                valid_part: "T1".to_string(),
                other_part: "cool badge".to_string(),
                display_text: "Knight".to_string(),
            })
        );
        assert!(!snapshot.contains("bob"));
        assert!(!snapshot.contains("carol"));
        assert_eq!(
            snapshot.unmanaged("bob"),
            Some(&LabelRecord {
                valid_part: String::new(),
                other_part: "moderator".to_string(),
                display_text: String::new(),
            })
        );
        assert!(snapshot.unmanaged("carol").is_none());
        assert!(snapshot.unmanaged("alice").is_none());
        assert!(snapshot.is_ambiguous("dave"));
        assert!(!snapshot.contains("dave"));
    }

    #[tokio::test]
    async fn test_build_snapshot_fetches_from_source() {
        let source = StaticSource(vec![FlairEntry::new("alice", None, Some("T3"))]);
        let snapshot = build_snapshot(&source, "darksouls", &rule()).await.unwrap();
        assert_eq!(snapshot.forum, "darksouls");
        assert_eq!(snapshot.get("alice").unwrap().valid_part, "T3");
    }

    #[tokio::test]
    async fn test_unreachable_source_aborts_all_snapshots() {
        let source = StaticSource(vec![FlairEntry::new("alice", None, Some("T3"))]);
        let forums = vec!["darksouls".to_string(), "offline".to_string()];

        let err = build_snapshots(&source, &forums, &rule()).await.unwrap_err();
        match err {
            FlairError::SourceUnavailable { forum, .. } => assert_eq!(forum, "offline"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
