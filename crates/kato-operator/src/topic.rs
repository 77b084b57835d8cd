//! Topic value types
//!
//! A [`Topic`] is a snapshot of a topic's definition. It carries no
//! identity beyond its name; every mutation in the pipeline produces
//! a new value, so snapshots taken from the cluster, from a resource
//! and from the private store can be compared attribute by attribute.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of a topic in the Kafka cluster
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicName(String);

impl TopicName {
    /// Create a topic name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The raw topic name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the name of the resource representing this topic.
    ///
    /// Kafka topic names allow characters that Kubernetes object
    /// names do not, so the mapping lowercases and replaces `_` with
    /// `-`. Resources whose topic name does not survive the mapping
    /// carry the Kafka name explicitly in their spec.
    pub fn as_resource_name(&self) -> ResourceName {
        ResourceName(self.0.to_ascii_lowercase().replace('_', "-"))
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TopicName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for TopicName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Name of the resource representing a topic in the declarative store
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceName(String);

impl ResourceName {
    /// Create a resource name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The raw resource name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A snapshot of a topic's definition
///
/// Two topics are equal iff all attributes compare equal. The
/// replication factor is fixed at creation and the partition count
/// may only grow; both rules are enforced by the reconciliation, not
/// by this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    /// Topic name, globally unique across the cluster
    pub name: TopicName,
    /// Number of partitions
    pub partitions: u32,
    /// Replication factor
    pub replication_factor: u16,
    /// Per-topic configuration entries
    pub config: BTreeMap<String, String>,
    /// Name of the resource representing this topic
    pub resource_name: ResourceName,
}

impl Topic {
    /// Create a topic with an empty config and a derived resource name
    pub fn new(name: impl Into<TopicName>, partitions: u32, replication_factor: u16) -> Self {
        let name = name.into();
        let resource_name = name.as_resource_name();
        Self {
            name,
            partitions,
            replication_factor,
            config: BTreeMap::new(),
            resource_name,
        }
    }

    /// Add a config entry, consuming and returning the topic
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Override the resource name, consuming and returning the topic
    pub fn with_resource_name(mut self, resource_name: ResourceName) -> Self {
        self.resource_name = resource_name;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_name_derivation() {
        assert_eq!(
            TopicName::new("Orders_Events").as_resource_name(),
            ResourceName::new("orders-events")
        );
        assert_eq!(
            TopicName::new("plain.topic").as_resource_name(),
            ResourceName::new("plain.topic")
        );
    }

    #[test]
    fn test_equality_over_all_attributes() {
        let a = Topic::new("orders", 3, 2).with_config("retention.ms", "100");
        let b = Topic::new("orders", 3, 2).with_config("retention.ms", "100");
        assert_eq!(a, b);

        let c = b.clone().with_config("retention.ms", "200");
        assert_ne!(a, c);
    }

    #[test]
    fn test_mutation_produces_new_value() {
        let a = Topic::new("orders", 3, 2);
        let b = a.clone().with_config("cleanup.policy", "compact");
        assert!(a.config.is_empty());
        assert_eq!(b.config.len(), 1);
    }
}
