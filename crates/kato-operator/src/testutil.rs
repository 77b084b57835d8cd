//! Shared test doubles for the operator's collaborators

use crate::config::Config;
use crate::crd::KafkaTopic;
use crate::error::{OperatorError, Result};
use crate::k8s::K8s;
use crate::kafka::TopicAdmin;
use crate::operator::Operator;
use crate::resources::resource_from_topic;
use crate::store::{InMemoryTopicStore, TopicStore};
use crate::topic::{ResourceName, Topic, TopicName};
use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::ResourceExt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Order-preserving log of mutating calls across all doubles
#[derive(Debug, Default)]
pub(crate) struct Calls(Mutex<Vec<String>>);

impl Calls {
    pub(crate) fn record(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub(crate) fn take(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_empty()
    }
}

/// Cluster admin double; reads are not logged, mutations are
pub(crate) struct MockAdmin {
    pub(crate) calls: Arc<Calls>,
    pub(crate) topics: DashMap<TopicName, Topic>,
    /// Metadata fetches answered with `None` before real answers start
    pub(crate) metadata_misses: AtomicU32,
    pub(crate) fail: AtomicBool,
}

impl MockAdmin {
    pub(crate) fn new(calls: Arc<Calls>) -> Self {
        Self {
            calls,
            topics: DashMap::new(),
            metadata_misses: AtomicU32::new(0),
            fail: AtomicBool::new(false),
        }
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(OperatorError::Cluster("injected cluster failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TopicAdmin for MockAdmin {
    async fn create_topic(&self, topic: &Topic) -> Result<()> {
        self.calls.record(format!("kafka.create:{}", topic.name));
        self.check()?;
        self.topics.insert(topic.name.clone(), topic.clone());
        Ok(())
    }

    async fn delete_topic(&self, name: &TopicName) -> Result<()> {
        self.calls.record(format!("kafka.delete:{name}"));
        self.check()?;
        self.topics.remove(name);
        Ok(())
    }

    async fn update_topic_config(&self, topic: &Topic) -> Result<()> {
        self.calls
            .record(format!("kafka.update_config:{}", topic.name));
        self.check()?;
        if let Some(mut entry) = self.topics.get_mut(&topic.name) {
            entry.config = topic.config.clone();
        }
        Ok(())
    }

    async fn increase_partitions(&self, topic: &Topic) -> Result<()> {
        self.calls
            .record(format!("kafka.increase_partitions:{}", topic.name));
        self.check()?;
        if let Some(mut entry) = self.topics.get_mut(&topic.name) {
            entry.partitions = topic.partitions;
        }
        Ok(())
    }

    async fn topic_metadata(&self, name: &TopicName) -> Result<Option<Topic>> {
        self.check()?;
        let misses = self.metadata_misses.load(Ordering::SeqCst);
        if misses > 0 {
            self.metadata_misses.store(misses - 1, Ordering::SeqCst);
            return Ok(None);
        }
        Ok(self.topics.get(name).map(|entry| entry.value().clone()))
    }

    async fn list_topic_names(&self) -> Result<Vec<TopicName>> {
        self.check()?;
        Ok(self.topics.iter().map(|entry| entry.key().clone()).collect())
    }
}

/// Declarative store double; the event sink never fails
pub(crate) struct MockK8s {
    pub(crate) calls: Arc<Calls>,
    pub(crate) resources: DashMap<ResourceName, KafkaTopic>,
    events: Mutex<Vec<String>>,
    pub(crate) fail: AtomicBool,
}

impl MockK8s {
    pub(crate) fn new(calls: Arc<Calls>) -> Self {
        Self {
            calls,
            resources: DashMap::new(),
            events: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(OperatorError::Cluster("injected k8s failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl K8s for MockK8s {
    async fn create_resource(&self, resource: &KafkaTopic) -> Result<()> {
        self.calls
            .record(format!("k8s.create:{}", resource.name_any()));
        self.check()?;
        self.resources
            .insert(ResourceName::new(resource.name_any()), resource.clone());
        Ok(())
    }

    async fn update_resource(&self, resource: &KafkaTopic) -> Result<()> {
        self.calls
            .record(format!("k8s.update:{}", resource.name_any()));
        self.check()?;
        self.resources
            .insert(ResourceName::new(resource.name_any()), resource.clone());
        Ok(())
    }

    async fn delete_resource(&self, name: &ResourceName) -> Result<()> {
        self.calls.record(format!("k8s.delete:{name}"));
        self.check()?;
        self.resources.remove(name);
        Ok(())
    }

    async fn get_resource(&self, name: &ResourceName) -> Result<Option<KafkaTopic>> {
        self.check()?;
        Ok(self.resources.get(name).map(|entry| entry.value().clone()))
    }

    async fn list_resources(&self) -> Result<Vec<KafkaTopic>> {
        self.check()?;
        Ok(self
            .resources
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn create_event(
        &self,
        _involved: Option<ObjectReference>,
        message: String,
    ) -> Result<()> {
        self.events.lock().unwrap().push(message);
        Ok(())
    }
}

/// Topic store double: a real in-memory store plus call recording
pub(crate) struct MockStore {
    pub(crate) calls: Arc<Calls>,
    pub(crate) inner: InMemoryTopicStore,
}

impl MockStore {
    pub(crate) fn new(calls: Arc<Calls>) -> Self {
        Self {
            calls,
            inner: InMemoryTopicStore::new(),
        }
    }
}

#[async_trait]
impl TopicStore for MockStore {
    async fn read(&self, name: &TopicName) -> Result<Option<Topic>> {
        self.inner.read(name).await
    }

    async fn create(&self, topic: &Topic) -> Result<()> {
        self.calls.record(format!("store.create:{}", topic.name));
        self.inner.create(topic).await
    }

    async fn update(&self, topic: &Topic) -> Result<()> {
        self.calls.record(format!("store.update:{}", topic.name));
        self.inner.update(topic).await
    }

    async fn delete(&self, name: &TopicName) -> Result<()> {
        self.calls.record(format!("store.delete:{name}"));
        self.inner.delete(name).await
    }

    async fn list_topic_names(&self) -> Result<Vec<TopicName>> {
        self.inner.list_topic_names().await
    }
}

/// An operator wired to doubles, plus handles to inspect them
pub(crate) struct Fixture {
    pub(crate) operator: Operator,
    pub(crate) admin: Arc<MockAdmin>,
    pub(crate) k8s: Arc<MockK8s>,
    pub(crate) store: Arc<MockStore>,
    pub(crate) calls: Arc<Calls>,
}

/// Build an operator over fresh doubles with fast backoff
pub(crate) fn fixture() -> Fixture {
    fixture_with_config(Config {
        metadata_backoff_delay: Duration::from_millis(1),
        metadata_max_attempts: 3,
        ..Config::default()
    })
}

pub(crate) fn fixture_with_config(config: Config) -> Fixture {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let calls = Arc::new(Calls::default());
    let admin = Arc::new(MockAdmin::new(Arc::clone(&calls)));
    let k8s = Arc::new(MockK8s::new(Arc::clone(&calls)));
    let store = Arc::new(MockStore::new(Arc::clone(&calls)));
    let operator = Operator::new(
        admin.clone(),
        k8s.clone(),
        store.clone(),
        config,
    );
    Fixture {
        operator,
        admin,
        k8s,
        store,
        calls,
    }
}

/// Render a topic as a resource carrying the default ownership labels
pub(crate) fn managed_resource(topic: &Topic) -> KafkaTopic {
    let config = Config::default();
    resource_from_topic(topic, &config.predicate(), &config.namespace)
}
