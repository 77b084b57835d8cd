//! Error types for the topic operator

use crate::topic::TopicName;
use thiserror::Error;

/// Errors that can occur while reconciling topic state
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A resource could not be translated into a topic
    #[error("invalid resource: {0}")]
    InvalidResource(String),

    /// A cluster operation failed
    #[error("cluster operation failed: {0}")]
    Cluster(String),

    /// A topic store operation failed
    #[error("topic store operation failed: {0}")]
    Store(String),

    /// The topic store already holds a record for this topic
    #[error("topic '{0}' already exists in the topic store")]
    EntityExists(TopicName),

    /// The topic store holds no record for this topic
    #[error("no record of topic '{0}' in the topic store")]
    NoSuchEntity(TopicName),

    /// A backed-off retry loop ran out of attempts
    #[error("max attempts ({attempts}) exceeded")]
    MaxAttemptsExceeded {
        /// Number of attempts that were made
        attempts: u32,
    },

    /// Two sides changed the same attribute to different values
    #[error("conflicting changes: {0}")]
    ConflictingChange(String),

    /// The replication factor is fixed at topic creation
    #[error("replication factor of topic '{0}' cannot be changed")]
    ReplicationFactorChange(TopicName),

    /// The partition count of a topic may only grow
    #[error("number of partitions of topic '{0}' cannot be decreased")]
    PartitionDecrease(TopicName),

    /// The event queue is no longer accepting work
    #[error("the operator event queue has shut down")]
    QueueClosed,
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

impl OperatorError {
    /// True for failures that are never retried and never partially
    /// applied: the reconciliation refuses to act rather than acting
    /// and failing.
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            OperatorError::ConflictingChange(_)
                | OperatorError::ReplicationFactorChange(_)
                | OperatorError::PartitionDecrease(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OperatorError::NoSuchEntity(TopicName::new("orders"));
        assert!(err.to_string().contains("orders"));

        let err = OperatorError::MaxAttemptsExceeded { attempts: 6 };
        assert!(err.to_string().contains('6'));
    }

    #[test]
    fn test_policy_violations() {
        assert!(OperatorError::PartitionDecrease(TopicName::new("t")).is_policy_violation());
        assert!(OperatorError::ConflictingChange("config:x".into()).is_policy_violation());
        assert!(!OperatorError::Cluster("boom".into()).is_policy_violation());
        assert!(!OperatorError::QueueClosed.is_policy_violation());
    }
}
