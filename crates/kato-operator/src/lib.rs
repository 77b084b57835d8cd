//! # kato-operator
//!
//! A Kubernetes operator that keeps a Kafka topic's definition
//! consistent across three independent sources of truth: the Kafka
//! cluster itself, a declarative `KafkaTopic` custom resource, and a
//! private durable record of the last reconciled state. None of the
//! three is authoritative; divergence is resolved by three-way
//! diff-and-merge with explicit conflict detection.
//!
//! ## Architecture
//!
//! 1. **Watch**: resource changes arrive from the Kubernetes API,
//!    cluster changes as a typed notification stream
//! 2. **Deduplicate**: the in-flight tracker drops notifications that
//!    are echoes of the operator's own writes
//! 3. **Reconcile**: genuine changes become chains of single-operation
//!    events on one FIFO queue; divergence between the three states is
//!    diffed against the private record, checked for conflicts, merged
//!    and applied
//! 4. **Surface**: policy violations and failed chains are reported as
//!    Kubernetes warning Events naming the involved resource
//!
//! Replication factor changes and partition-count decreases are never
//! applied; partition increases and config changes are.
//!
//! ## Example
//!
//! ```rust,ignore
//! use kato_operator::prelude::*;
//! use kube::Client;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::try_default().await?;
//!     let kafka: Arc<dyn TopicAdmin> = my_admin_client();
//!     let store: Arc<dyn TopicStore> = Arc::new(InMemoryTopicStore::new());
//!     let notifications = my_cluster_watch();
//!
//!     Session::new(client, kafka, store, Config::default())
//!         .run(notifications, shutdown_signal())
//!         .await
//! }
//! ```
//!
//! ## Resources
//!
//! ```yaml
//! apiVersion: kato.dev/v1alpha1
//! kind: KafkaTopic
//! metadata:
//!   name: orders-events
//!   labels:
//!     app: kato
//!     kato.dev/kind: topic
//! spec:
//!   partitions: 12
//!   replicationFactor: 3
//!   config:
//!     retention.ms: "604800000"
//! ```
//!
//! ## Modules
//!
//! - [`operator`] - the reconciliation engine and its event queue
//! - [`diff`] - attribute-level diff, merge and conflict detection
//! - [`inflight`] - deduplication of the operator's own echoes
//! - [`backoff`] - retry policy for eventually-consistent metadata
//! - [`crd`] - the `KafkaTopic` custom resource definition
//! - [`resources`] - topic/resource translation and ownership filter
//! - [`kafka`] - cluster admin and notification contracts
//! - [`k8s`] - declarative store client and event sink
//! - [`store`] - private topic store contract and in-memory impl
//! - [`session`] - wiring, watches, periodic scans and shutdown

pub mod backoff;
pub mod config;
pub mod crd;
pub mod diff;
pub mod error;
pub mod inflight;
pub mod k8s;
pub mod kafka;
pub mod operator;
pub mod resources;
pub mod session;
pub mod store;
pub mod topic;

#[cfg(test)]
pub(crate) mod testutil;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::backoff::BackOff;
    pub use crate::config::Config;
    pub use crate::crd::{KafkaTopic, KafkaTopicSpec};
    pub use crate::diff::TopicDiff;
    pub use crate::error::{OperatorError, Result};
    pub use crate::inflight::InFlight;
    pub use crate::k8s::{K8s, KubeK8s};
    pub use crate::kafka::{ClusterNotification, TopicAdmin};
    pub use crate::operator::Operator;
    pub use crate::resources::LabelPredicate;
    pub use crate::session::Session;
    pub use crate::store::{InMemoryTopicStore, TopicStore};
    pub use crate::topic::{ResourceName, Topic, TopicName};
}
