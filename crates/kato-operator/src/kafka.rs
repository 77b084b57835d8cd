//! Kafka cluster contract
//!
//! The operator never speaks the admin wire protocol itself; it
//! consumes an implementation of [`TopicAdmin`] and a stream of
//! [`ClusterNotification`]s produced by whatever watches the
//! cluster's coordination state.

use crate::error::Result;
use crate::topic::{Topic, TopicName};
use async_trait::async_trait;

/// Topic administration against the Kafka cluster
///
/// All calls resolve to a single result or failure. Connection
/// management, timeouts for acquiring clients, and retries below the
/// level of a whole call are the implementation's concern.
#[async_trait]
pub trait TopicAdmin: Send + Sync + 'static {
    /// Create a topic with the snapshot's partitions, replication
    /// factor and config
    async fn create_topic(&self, topic: &Topic) -> Result<()>;

    /// Delete a topic
    async fn delete_topic(&self, name: &TopicName) -> Result<()>;

    /// Replace the topic's config entries with the snapshot's
    async fn update_topic_config(&self, topic: &Topic) -> Result<()>;

    /// Grow the topic's partition count to the snapshot's
    async fn increase_partitions(&self, topic: &Topic) -> Result<()>;

    /// Fetch the current definition of a topic.
    ///
    /// Returns `Ok(None)` while the cluster's metadata API does not
    /// (yet) know the topic. Topic creation is eventually consistent,
    /// so `None` directly after a create notification means "not yet
    /// visible" and is retried with backoff by the caller; any other
    /// failure is returned as an error and is not retried.
    async fn topic_metadata(&self, name: &TopicName) -> Result<Option<Topic>>;

    /// Names of every topic the cluster knows
    async fn list_topic_names(&self) -> Result<Vec<TopicName>>;
}

/// A change observed on the cluster side
///
/// Produced by the external watcher of the cluster's coordination
/// service and consumed by the operator session. Notifications
/// include the operator's own mutations echoed back; deduplication
/// against the in-flight set happens in the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterNotification {
    /// A topic appeared on the cluster
    TopicCreated(TopicName),
    /// A topic's config changed on the cluster
    TopicConfigChanged(TopicName),
    /// A topic disappeared from the cluster
    TopicDeleted(TopicName),
}

impl ClusterNotification {
    /// The topic the notification concerns
    pub fn topic_name(&self) -> &TopicName {
        match self {
            ClusterNotification::TopicCreated(name)
            | ClusterNotification::TopicConfigChanged(name)
            | ClusterNotification::TopicDeleted(name) => name,
        }
    }
}
