//! Attribute-level diffing of topic snapshots
//!
//! [`TopicDiff`] is the basis of the three-way reconciliation: the
//! operator diffs the private state against the cluster state and
//! against the resource state, checks the two diffs for conflicts,
//! merges them and applies the merge back onto the private state.
//!
//! A diff is an associative map from attribute path to change, not an
//! ordered log. Applying it to a base snapshot does not depend on any
//! internal iteration order.

use crate::topic::Topic;
use std::collections::BTreeMap;
use std::fmt;

/// Path of a single diffable topic attribute
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum AttributePath {
    /// The partition count
    Partitions,
    /// The replication factor
    ReplicationFactor,
    /// One config entry, by key
    Config(String),
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributePath::Partitions => f.write_str("partitions"),
            AttributePath::ReplicationFactor => f.write_str("replication factor"),
            AttributePath::Config(key) => write!(f, "config:{key}"),
        }
    }
}

/// A (before, after) pair for one attribute path
#[derive(Debug, Clone, PartialEq, Eq)]
enum Change {
    Partitions { from: u32, to: u32 },
    ReplicationFactor { from: u16, to: u16 },
    /// Config entry added (`from: None`) or changed
    ConfigSet { from: Option<String>, to: String },
    /// Config entry removed
    ConfigRemove { from: String },
}

impl Change {
    /// The target value, for conflict descriptions
    fn target(&self) -> String {
        match self {
            Change::Partitions { to, .. } => to.to_string(),
            Change::ReplicationFactor { to, .. } => to.to_string(),
            Change::ConfigSet { to, .. } => format!("'{to}'"),
            Change::ConfigRemove { .. } => "<removed>".to_string(),
        }
    }
}

/// The set of attribute changes turning one topic snapshot into another
///
/// Only meaningful between snapshots of the same topic name. The
/// resource name is identity, not an attribute, and is never part of
/// a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicDiff {
    changes: BTreeMap<AttributePath, Change>,
}

impl TopicDiff {
    /// Compute the minimal set of attribute changes turning `base`
    /// into `target`.
    pub fn diff(base: &Topic, target: &Topic) -> TopicDiff {
        debug_assert_eq!(
            base.name, target.name,
            "diffed snapshots must describe the same topic"
        );
        let mut changes = BTreeMap::new();

        if base.partitions != target.partitions {
            changes.insert(
                AttributePath::Partitions,
                Change::Partitions {
                    from: base.partitions,
                    to: target.partitions,
                },
            );
        }
        if base.replication_factor != target.replication_factor {
            changes.insert(
                AttributePath::ReplicationFactor,
                Change::ReplicationFactor {
                    from: base.replication_factor,
                    to: target.replication_factor,
                },
            );
        }
        for (key, value) in &target.config {
            if base.config.get(key) != Some(value) {
                changes.insert(
                    AttributePath::Config(key.clone()),
                    Change::ConfigSet {
                        from: base.config.get(key).cloned(),
                        to: value.clone(),
                    },
                );
            }
        }
        for (key, value) in &base.config {
            if !target.config.contains_key(key) {
                changes.insert(
                    AttributePath::Config(key.clone()),
                    Change::ConfigRemove { from: value.clone() },
                );
            }
        }

        TopicDiff { changes }
    }

    /// True iff the two diffed snapshots were attribute-equal
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Describe the attribute paths both diffs change to different
    /// target values, or `None` when merging is safe.
    ///
    /// Must be checked before [`TopicDiff::merge`]; a non-`None`
    /// result means the divergence cannot be resolved mechanically.
    pub fn conflict(&self, other: &TopicDiff) -> Option<String> {
        let mut conflicts = Vec::new();
        for (path, change) in &self.changes {
            if let Some(other_change) = other.changes.get(path) {
                if other_change != change {
                    conflicts.push(format!(
                        "{path} ({} vs {})",
                        change.target(),
                        other_change.target()
                    ));
                }
            }
        }
        if conflicts.is_empty() {
            None
        } else {
            Some(conflicts.join(", "))
        }
    }

    /// Union two diffs computed from the same base snapshot.
    ///
    /// Paths present in only one input pass through unchanged; paths
    /// present in both with the same target collapse to one. The
    /// caller must have verified [`TopicDiff::conflict`] is `None`;
    /// this operation is commutative and associative for such inputs.
    pub fn merge(&self, other: &TopicDiff) -> TopicDiff {
        debug_assert!(
            self.conflict(other).is_none(),
            "merge called on conflicting diffs"
        );
        let mut changes = self.changes.clone();
        for (path, change) in &other.changes {
            changes.insert(path.clone(), change.clone());
        }
        TopicDiff { changes }
    }

    /// Produce a new topic with every changed attribute replaced by
    /// its target value; attributes absent from the diff are copied
    /// from `base` unchanged.
    pub fn apply(&self, base: &Topic) -> Topic {
        let mut result = base.clone();
        for (path, change) in &self.changes {
            match (path, change) {
                (AttributePath::Partitions, Change::Partitions { to, .. }) => {
                    result.partitions = *to;
                }
                (AttributePath::ReplicationFactor, Change::ReplicationFactor { to, .. }) => {
                    result.replication_factor = *to;
                }
                (AttributePath::Config(key), Change::ConfigSet { to, .. }) => {
                    result.config.insert(key.clone(), to.clone());
                }
                (AttributePath::Config(key), Change::ConfigRemove { .. }) => {
                    result.config.remove(key);
                }
                _ => unreachable!("change kind does not match its attribute path"),
            }
        }
        result
    }

    /// True iff the diff touches the replication factor
    pub fn changes_replication_factor(&self) -> bool {
        self.changes.contains_key(&AttributePath::ReplicationFactor)
    }

    /// True iff the diff touches the partition count
    pub fn changes_num_partitions(&self) -> bool {
        self.changes.contains_key(&AttributePath::Partitions)
    }

    /// True iff the diff lowers the partition count
    pub fn decreases_num_partitions(&self) -> bool {
        matches!(
            self.changes.get(&AttributePath::Partitions),
            Some(Change::Partitions { from, to }) if to < from
        )
    }

    /// True iff the diff touches at least one config entry
    pub fn changes_config(&self) -> bool {
        self.changes
            .keys()
            .any(|path| matches!(path, AttributePath::Config(_)))
    }
}

impl fmt::Display for TopicDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.changes.is_empty() {
            return f.write_str("no changes");
        }
        let mut first = true;
        for (path, change) in &self.changes {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{path} -> {}", change.target())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Topic {
        Topic::new("orders", 3, 2)
            .with_config("retention.ms", "604800000")
            .with_config("cleanup.policy", "delete")
    }

    #[test]
    fn test_diff_of_identical_topics_is_empty() {
        let a = base();
        assert!(TopicDiff::diff(&a, &a).is_empty());
    }

    #[test]
    fn test_apply_round_trips() {
        let a = base();
        let b = {
            let mut b = base();
            b.partitions = 6;
            b.config.insert("retention.ms".into(), "100".into());
            b.config.remove("cleanup.policy");
            b.config.insert("compression.type".into(), "lz4".into());
            b
        };
        assert_eq!(TopicDiff::diff(&a, &b).apply(&a), b);
        assert_eq!(TopicDiff::diff(&b, &a).apply(&b), a);
    }

    #[test]
    fn test_apply_copies_untouched_attributes() {
        let a = base();
        let mut b = base();
        b.config.insert("compression.type".into(), "zstd".into());

        let applied = TopicDiff::diff(&a, &b).apply(&a);
        assert_eq!(applied.partitions, a.partitions);
        assert_eq!(applied.replication_factor, a.replication_factor);
        assert_eq!(applied.resource_name, a.resource_name);
        assert_eq!(
            applied.config.get("retention.ms"),
            a.config.get("retention.ms")
        );
    }

    #[test]
    fn test_disjoint_diffs_merge_cleanly() {
        let p = base();
        let mut with_config = base();
        with_config
            .config
            .insert("retention.ms".into(), "100".into());
        let mut with_partitions = base();
        with_partitions.partitions = 12;

        let d1 = TopicDiff::diff(&p, &with_config);
        let d2 = TopicDiff::diff(&p, &with_partitions);

        assert!(d1.conflict(&d2).is_none());
        assert!(d2.conflict(&d1).is_none());

        let merged = d1.merge(&d2);
        let result = merged.apply(&p);
        assert_eq!(result.partitions, 12);
        assert_eq!(result.config.get("retention.ms"), Some(&"100".to_string()));

        // merging is commutative for non-conflicting inputs
        assert_eq!(merged, d2.merge(&d1));
    }

    #[test]
    fn test_same_target_collapses() {
        let p = base();
        let mut changed = base();
        changed.partitions = 9;

        let d1 = TopicDiff::diff(&p, &changed);
        let d2 = TopicDiff::diff(&p, &changed);

        assert!(d1.conflict(&d2).is_none());
        assert_eq!(d1.merge(&d2), d1);
    }

    #[test]
    fn test_conflicting_targets_are_detected() {
        let p = base();
        let mut left = base();
        left.config.insert("retention.ms".into(), "100".into());
        let mut right = base();
        right.config.insert("retention.ms".into(), "200".into());

        let d1 = TopicDiff::diff(&p, &left);
        let d2 = TopicDiff::diff(&p, &right);

        let conflict = d1.conflict(&d2).expect("conflict expected");
        assert!(conflict.contains("config:retention.ms"));
        assert!(conflict.contains("100"));
        assert!(conflict.contains("200"));
    }

    #[test]
    fn test_set_vs_remove_conflicts() {
        let p = base();
        let mut set = base();
        set.config.insert("cleanup.policy".into(), "compact".into());
        let mut removed = base();
        removed.config.remove("cleanup.policy");

        let d1 = TopicDiff::diff(&p, &set);
        let d2 = TopicDiff::diff(&p, &removed);
        assert!(d1.conflict(&d2).is_some());
    }

    #[test]
    fn test_policy_predicates() {
        let p = base();

        let mut shrunk = base();
        shrunk.partitions = 1;
        let d = TopicDiff::diff(&p, &shrunk);
        assert!(d.changes_num_partitions());
        assert!(d.decreases_num_partitions());
        assert!(!d.changes_config());
        assert!(!d.changes_replication_factor());

        let mut grown = base();
        grown.partitions = 30;
        let d = TopicDiff::diff(&p, &grown);
        assert!(d.changes_num_partitions());
        assert!(!d.decreases_num_partitions());

        let mut replicated = base();
        replicated.replication_factor = 3;
        let d = TopicDiff::diff(&p, &replicated);
        assert!(d.changes_replication_factor());
        assert!(!d.changes_num_partitions());

        let mut reconfigured = base();
        reconfigured.config.remove("retention.ms");
        let d = TopicDiff::diff(&p, &reconfigured);
        assert!(d.changes_config());
    }
}
