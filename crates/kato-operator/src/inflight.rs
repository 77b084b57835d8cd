//! Deduplication of the operator's own change notifications
//!
//! Every mutation the operator performs against the cluster or the
//! resource store comes back to it as a watch notification, exactly
//! as if someone else had made the change. [`InFlight`] records which
//! mutation is outstanding for each (topic, system) pair so those
//! echoes can be recognized and dropped instead of being reprocessed.
//!
//! Entries are recorded on the event queue when a mutating event is
//! dispatched, before the external call is issued; the matching
//! `should_process_*` check runs on the watcher's own execution
//! context before anything reaches the queue. The entry set therefore
//! synchronizes itself rather than relying on the queue.

use crate::topic::TopicName;
use dashmap::DashMap;
use tracing::debug;

/// The external system a mutation is outstanding against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalSystem {
    /// The declarative resource store
    Resources,
    /// The Kafka cluster
    Cluster,
}

/// The kind of outstanding mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOperation {
    Create,
    Update,
    Delete,
}

/// Tracker of topics with an outstanding create, update or delete
///
/// At most one operation is tracked per (topic, system) pair; the
/// entry lives for the round-trip of one external call and is
/// consumed when the operator observes its own notification of that
/// mutation.
#[derive(Debug, Default)]
pub struct InFlight {
    entries: DashMap<(TopicName, ExternalSystem), PendingOperation>,
}

impl InFlight {
    /// An empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the operator is creating the resource for `name`
    pub fn start_creating_resource(&self, name: &TopicName) {
        self.start(name, ExternalSystem::Resources, PendingOperation::Create);
    }

    /// Record that the operator is updating the resource for `name`
    pub fn start_updating_resource(&self, name: &TopicName) {
        self.start(name, ExternalSystem::Resources, PendingOperation::Update);
    }

    /// Record that the operator is deleting the resource for `name`
    pub fn start_deleting_resource(&self, name: &TopicName) {
        self.start(name, ExternalSystem::Resources, PendingOperation::Delete);
    }

    /// Record that the operator is creating the cluster topic `name`
    pub fn start_creating_topic(&self, name: &TopicName) {
        self.start(name, ExternalSystem::Cluster, PendingOperation::Create);
    }

    /// Record that the operator is changing cluster state of `name`
    /// (config or partition count)
    pub fn start_updating_topic(&self, name: &TopicName) {
        self.start(name, ExternalSystem::Cluster, PendingOperation::Update);
    }

    /// Record that the operator is deleting the cluster topic `name`
    pub fn start_deleting_topic(&self, name: &TopicName) {
        self.start(name, ExternalSystem::Cluster, PendingOperation::Delete);
    }

    /// Whether a resource-added notification is a genuine external
    /// change. Consumes the pending entry when it is our own echo.
    pub fn should_process_resource_added(&self, name: &TopicName) -> bool {
        self.should_process(name, ExternalSystem::Resources, PendingOperation::Create)
    }

    /// Whether a resource-modified notification is a genuine external change
    pub fn should_process_resource_modified(&self, name: &TopicName) -> bool {
        self.should_process(name, ExternalSystem::Resources, PendingOperation::Update)
    }

    /// Whether a resource-deleted notification is a genuine external change
    pub fn should_process_resource_deleted(&self, name: &TopicName) -> bool {
        self.should_process(name, ExternalSystem::Resources, PendingOperation::Delete)
    }

    /// Whether a topic-created notification is a genuine external change
    pub fn should_process_topic_create(&self, name: &TopicName) -> bool {
        self.should_process(name, ExternalSystem::Cluster, PendingOperation::Create)
    }

    /// Whether a topic-config-changed notification is a genuine external change
    pub fn should_process_topic_config_change(&self, name: &TopicName) -> bool {
        self.should_process(name, ExternalSystem::Cluster, PendingOperation::Update)
    }

    /// Whether a topic-deleted notification is a genuine external change
    pub fn should_process_topic_delete(&self, name: &TopicName) -> bool {
        self.should_process(name, ExternalSystem::Cluster, PendingOperation::Delete)
    }

    /// True when no operation is outstanding against either system
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of outstanding operations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn start(&self, name: &TopicName, system: ExternalSystem, operation: PendingOperation) {
        if let Some(previous) = self
            .entries
            .insert((name.clone(), system), operation)
        {
            debug!(
                topic = %name,
                ?system,
                ?previous,
                ?operation,
                "replacing in-flight entry"
            );
        }
    }

    fn should_process(
        &self,
        name: &TopicName,
        system: ExternalSystem,
        operation: PendingOperation,
    ) -> bool {
        let consumed = self
            .entries
            .remove_if(&(name.clone(), system), |_, pending| *pending == operation);
        match consumed {
            Some(_) => {
                debug!(topic = %name, ?system, ?operation, "ignoring own mutation echo");
                false
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_in_flight_is_processed() {
        let in_flight = InFlight::new();
        assert!(in_flight.should_process_topic_create(&TopicName::new("orders")));
        assert!(in_flight.should_process_resource_deleted(&TopicName::new("orders")));
    }

    #[test]
    fn test_own_echo_is_suppressed_once() {
        let in_flight = InFlight::new();
        let name = TopicName::new("orders");

        in_flight.start_creating_topic(&name);
        assert!(!in_flight.should_process_topic_create(&name));
        // the entry was consumed; a later notification is external
        assert!(in_flight.should_process_topic_create(&name));
    }

    #[test]
    fn test_unrelated_operation_is_processed() {
        let in_flight = InFlight::new();
        let name = TopicName::new("orders");

        in_flight.start_deleting_topic(&name);
        assert!(in_flight.should_process_topic_create(&name));
        // the delete entry is still pending
        assert!(!in_flight.should_process_topic_delete(&name));
    }

    #[test]
    fn test_systems_are_independent() {
        let in_flight = InFlight::new();
        let name = TopicName::new("orders");

        in_flight.start_creating_resource(&name);
        assert!(in_flight.should_process_topic_create(&name));
        assert!(!in_flight.should_process_resource_added(&name));
    }

    #[test]
    fn test_len_tracks_outstanding_operations() {
        let in_flight = InFlight::new();
        assert!(in_flight.is_empty());

        in_flight.start_updating_resource(&TopicName::new("a"));
        in_flight.start_updating_topic(&TopicName::new("a"));
        in_flight.start_deleting_topic(&TopicName::new("b"));
        assert_eq!(in_flight.len(), 3);

        assert!(!in_flight.should_process_resource_modified(&TopicName::new("a")));
        assert_eq!(in_flight.len(), 2);
    }
}
