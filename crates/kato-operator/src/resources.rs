//! Translation between topics and their resource representation
//!
//! The mapping is total in both directions for managed resources:
//! any resource passing the ownership filter translates into a
//! [`Topic`] (serde defaults fill omitted fields, validation rejects
//! nonsense), and any topic translates into a resource that carries
//! the filter labels plus the topic's attributes.

use crate::crd::{KafkaTopic, KafkaTopicSpec};
use crate::error::{OperatorError, Result};
use crate::topic::{ResourceName, Topic, TopicName};
use std::collections::BTreeMap;
use validator::Validate;

/// Ownership filter for resources managed by this operator
///
/// A resource is managed iff its labels contain every pair of the
/// predicate; extra labels are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelPredicate {
    labels: BTreeMap<String, String>,
}

impl LabelPredicate {
    /// Build a predicate from label key/value pairs
    pub fn new<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// The labels stamped onto resources this operator creates
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Label selector string for list and watch calls
    pub fn selector(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Test whether a resource passes the filter
    pub fn matches(&self, resource: &KafkaTopic) -> bool {
        let Some(labels) = resource.metadata.labels.as_ref() else {
            return self.labels.is_empty();
        };
        self.labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

/// Translate a resource into a topic snapshot.
///
/// Succeeds for any resource passing the ownership filter; the spec
/// is validated first so malformed resources are rejected with a
/// description instead of flowing into the reconciliation.
pub fn topic_from_resource(resource: &KafkaTopic) -> Result<Topic> {
    let resource_name = resource
        .metadata
        .name
        .clone()
        .ok_or_else(|| OperatorError::InvalidResource("resource has no name".to_string()))?;

    resource.spec.validate().map_err(|errors| {
        let details: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errs)| {
                errs.iter()
                    .map(move |e| format!("{}: {:?}", field, e.message))
            })
            .collect();
        OperatorError::InvalidResource(details.join("; "))
    })?;

    let name = TopicName::new(
        resource
            .spec
            .topic_name
            .clone()
            .unwrap_or_else(|| resource_name.clone()),
    );

    Ok(Topic {
        name,
        partitions: resource.spec.partitions,
        replication_factor: resource.spec.replication_factor,
        config: resource.spec.config.clone(),
        resource_name: ResourceName::new(resource_name),
    })
}

/// Render a topic as the resource representing it.
///
/// The resource reproduces the predicate's labels, so it passes the
/// same filter on the way back in. The Kafka name is written out only
/// when it differs from the resource name.
pub fn resource_from_topic(
    topic: &Topic,
    predicate: &LabelPredicate,
    namespace: &str,
) -> KafkaTopic {
    let topic_name = (topic.name.as_str() != topic.resource_name.as_str())
        .then(|| topic.name.as_str().to_string());

    let mut resource = KafkaTopic::new(
        topic.resource_name.as_str(),
        KafkaTopicSpec {
            topic_name,
            partitions: topic.partitions,
            replication_factor: topic.replication_factor,
            config: topic.config.clone(),
        },
    );
    resource.metadata.namespace = Some(namespace.to_string());
    resource.metadata.labels = Some(predicate.labels().clone());
    resource
}
