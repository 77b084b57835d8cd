//! KafkaTopic Custom Resource Definition
//!
//! The declarative representation of a topic. Users create
//! `KafkaTopic` resources and the operator keeps the Kafka cluster in
//! sync with them (and vice versa, for topics created directly on the
//! cluster).
//!
//! # Example
//!
//! ```yaml
//! apiVersion: kato.dev/v1alpha1
//! kind: KafkaTopic
//! metadata:
//!   name: orders-events
//!   labels:
//!     app: kato
//! spec:
//!   partitions: 12
//!   replicationFactor: 3
//!   config:
//!     retention.ms: "604800000"
//!     cleanup.policy: delete
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::{Validate, ValidationError};

/// Longest legal Kafka topic name
const MAX_TOPIC_NAME_LEN: usize = 249;

/// Declarative definition of a Kafka topic
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "kato.dev",
    version = "v1alpha1",
    kind = "KafkaTopic",
    plural = "kafkatopics",
    shortname = "kt",
    namespaced,
    printcolumn = r#"{"name":"Partitions","type":"integer","jsonPath":".spec.partitions"}"#,
    printcolumn = r#"{"name":"Replication","type":"integer","jsonPath":".spec.replicationFactor"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KafkaTopicSpec {
    /// Kafka topic name. Defaults to the resource name; set it when
    /// the topic name is not a legal Kubernetes object name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_topic_name"))]
    pub topic_name: Option<String>,

    /// Number of partitions. Can be increased but never decreased.
    #[serde(default = "default_partitions")]
    #[validate(range(min = 1, max = 200000, message = "partitions must be between 1 and 200000"))]
    pub partitions: u32,

    /// Replication factor. Fixed at topic creation.
    #[serde(default = "default_replication_factor")]
    #[validate(range(
        min = 1,
        max = 100,
        message = "replication factor must be between 1 and 100"
    ))]
    pub replication_factor: u16,

    /// Per-topic configuration entries, verbatim Kafka config keys
    #[serde(default)]
    #[validate(custom(function = "validate_config"))]
    pub config: BTreeMap<String, String>,
}

fn default_partitions() -> u32 {
    1
}

fn default_replication_factor() -> u16 {
    1
}

fn validate_topic_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > MAX_TOPIC_NAME_LEN {
        return Err(ValidationError::new("invalid_topic_name")
            .with_message(format!("topic name must be 1-{MAX_TOPIC_NAME_LEN} characters").into()));
    }
    if name == "." || name == ".." {
        return Err(ValidationError::new("invalid_topic_name")
            .with_message("topic name must not be '.' or '..'".into()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(ValidationError::new("invalid_topic_name").with_message(
            "topic name may only contain alphanumerics, '.', '_' and '-'".into(),
        ));
    }
    Ok(())
}

fn validate_config(config: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    if config.len() > 100 {
        return Err(ValidationError::new("too_many_config_entries")
            .with_message("maximum 100 config entries allowed".into()));
    }
    for (key, value) in config {
        if key.is_empty() || key.len() > 128 || value.len() > 4096 {
            return Err(ValidationError::new("config_entry_too_long")
                .with_message("config key max 128 chars, value max 4096 chars".into()));
        }
    }
    Ok(())
}
