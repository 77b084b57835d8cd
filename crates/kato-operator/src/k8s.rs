//! Kubernetes-side collaborators
//!
//! [`K8s`] is the operator's contract with the declarative store:
//! CRUD on `KafkaTopic` resources plus Event creation for
//! human-visible error surfacing. [`KubeK8s`] implements it against a
//! real API server; tests substitute their own implementation.

use crate::crd::KafkaTopic;
use crate::error::{OperatorError, Result};
use crate::resources::LabelPredicate;
use crate::topic::ResourceName;
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

/// Field manager and Event source component name
const OPERATOR_NAME: &str = "kato-operator";

/// Declarative store client and error/event sink
#[async_trait]
pub trait K8s: Send + Sync + 'static {
    /// Create a resource
    async fn create_resource(&self, resource: &KafkaTopic) -> Result<()>;

    /// Update a resource to the given definition
    async fn update_resource(&self, resource: &KafkaTopic) -> Result<()>;

    /// Delete a resource by name
    async fn delete_resource(&self, name: &ResourceName) -> Result<()>;

    /// Fetch a managed resource, `Ok(None)` when absent
    async fn get_resource(&self, name: &ResourceName) -> Result<Option<KafkaTopic>>;

    /// List all managed resources
    async fn list_resources(&self) -> Result<Vec<KafkaTopic>>;

    /// Surface a warning event, optionally naming the involved
    /// resource. Fire-and-forget from the caller's point of view;
    /// failures are reported but trigger no retry.
    async fn create_event(
        &self,
        involved: Option<ObjectReference>,
        message: String,
    ) -> Result<()>;
}

/// Reference to a resource for use as an Event's involved object
pub fn object_reference(resource: &KafkaTopic) -> ObjectReference {
    ObjectReference {
        api_version: Some("kato.dev/v1alpha1".to_string()),
        kind: Some("KafkaTopic".to_string()),
        name: resource.metadata.name.clone(),
        namespace: resource.metadata.namespace.clone(),
        uid: resource.metadata.uid.clone(),
        ..ObjectReference::default()
    }
}

/// [`K8s`] implementation over the Kubernetes API
pub struct KubeK8s {
    topics: Api<KafkaTopic>,
    events: Api<Event>,
    predicate: LabelPredicate,
    namespace: String,
}

impl KubeK8s {
    /// Client scoped to one namespace and one ownership filter
    pub fn new(client: Client, namespace: &str, predicate: LabelPredicate) -> Self {
        Self {
            topics: Api::namespaced(client.clone(), namespace),
            events: Api::namespaced(client, namespace),
            predicate,
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl K8s for KubeK8s {
    async fn create_resource(&self, resource: &KafkaTopic) -> Result<()> {
        debug!(resource = %resource.name_any(), "creating resource");
        self.topics
            .create(&PostParams::default(), resource)
            .await?;
        Ok(())
    }

    async fn update_resource(&self, resource: &KafkaTopic) -> Result<()> {
        let name = resource.metadata.name.as_deref().ok_or_else(|| {
            OperatorError::InvalidResource("resource has no name".to_string())
        })?;
        debug!(resource = %name, "updating resource");

        // Server-side apply; the operator owns every field it writes.
        let params = PatchParams::apply(OPERATOR_NAME).force();
        self.topics
            .patch(name, &params, &Patch::Apply(resource))
            .await?;
        Ok(())
    }

    async fn delete_resource(&self, name: &ResourceName) -> Result<()> {
        debug!(resource = %name, "deleting resource");
        self.topics
            .delete(name.as_str(), &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_resource(&self, name: &ResourceName) -> Result<Option<KafkaTopic>> {
        let resource = self.topics.get_opt(name.as_str()).await?;
        Ok(resource.filter(|r| self.predicate.matches(r)))
    }

    async fn list_resources(&self) -> Result<Vec<KafkaTopic>> {
        let params = ListParams::default().labels(&self.predicate.selector());
        Ok(self.topics.list(&params).await?.items)
    }

    async fn create_event(
        &self,
        involved: Option<ObjectReference>,
        message: String,
    ) -> Result<()> {
        let now = Time(Utc::now());
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{OPERATOR_NAME}-")),
                namespace: Some(self.namespace.clone()),
                ..ObjectMeta::default()
            },
            involved_object: involved.unwrap_or_default(),
            message: Some(message),
            reason: Some("OperatorError".to_string()),
            type_: Some("Warning".to_string()),
            source: Some(EventSource {
                component: Some(OPERATOR_NAME.to_string()),
                ..EventSource::default()
            }),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now),
            count: Some(1),
            ..Event::default()
        };
        self.events.create(&PostParams::default(), &event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::KafkaTopicSpec;

    #[test]
    fn test_object_reference_carries_identity() {
        let spec: KafkaTopicSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        let mut resource = KafkaTopic::new("orders", spec);
        resource.metadata.namespace = Some("streaming".to_string());
        resource.metadata.uid = Some("uid-1".to_string());

        let reference = object_reference(&resource);
        assert_eq!(reference.api_version.as_deref(), Some("kato.dev/v1alpha1"));
        assert_eq!(reference.kind.as_deref(), Some("KafkaTopic"));
        assert_eq!(reference.name.as_deref(), Some("orders"));
        assert_eq!(reference.namespace.as_deref(), Some("streaming"));
        assert_eq!(reference.uid.as_deref(), Some("uid-1"));
    }
}
