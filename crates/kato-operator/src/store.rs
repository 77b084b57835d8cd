//! Private topic store
//!
//! The store keeps the last state the operator itself reconciled to,
//! one record per topic name, last write wins. It is the base of
//! every three-way merge: divergence is measured against it, never
//! against either external system directly. The durable backend is
//! pluggable; an in-memory implementation is provided.

use crate::error::{OperatorError, Result};
use crate::topic::{Topic, TopicName};
use async_trait::async_trait;
use dashmap::DashMap;

/// Durable record of the last reconciled topic states
#[async_trait]
pub trait TopicStore: Send + Sync + 'static {
    /// Read the record for a topic, if any
    async fn read(&self, name: &TopicName) -> Result<Option<Topic>>;

    /// Create a record; fails with [`OperatorError::EntityExists`]
    /// when one is already present
    async fn create(&self, topic: &Topic) -> Result<()>;

    /// Replace an existing record; fails with
    /// [`OperatorError::NoSuchEntity`] when none is present
    async fn update(&self, topic: &Topic) -> Result<()>;

    /// Remove a record; fails with [`OperatorError::NoSuchEntity`]
    /// when none is present
    async fn delete(&self, name: &TopicName) -> Result<()>;

    /// Names of every recorded topic
    async fn list_topic_names(&self) -> Result<Vec<TopicName>>;
}

/// Topic store held in process memory
#[derive(Debug, Default)]
pub struct InMemoryTopicStore {
    topics: DashMap<TopicName, Topic>,
}

impl InMemoryTopicStore {
    /// An empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TopicStore for InMemoryTopicStore {
    async fn read(&self, name: &TopicName) -> Result<Option<Topic>> {
        Ok(self.topics.get(name).map(|entry| entry.value().clone()))
    }

    async fn create(&self, topic: &Topic) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.topics.entry(topic.name.clone()) {
            Entry::Occupied(_) => Err(OperatorError::EntityExists(topic.name.clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(topic.clone());
                Ok(())
            }
        }
    }

    async fn update(&self, topic: &Topic) -> Result<()> {
        match self.topics.get_mut(&topic.name) {
            Some(mut entry) => {
                *entry = topic.clone();
                Ok(())
            }
            None => Err(OperatorError::NoSuchEntity(topic.name.clone())),
        }
    }

    async fn delete(&self, name: &TopicName) -> Result<()> {
        match self.topics.remove(name) {
            Some(_) => Ok(()),
            None => Err(OperatorError::NoSuchEntity(name.clone())),
        }
    }

    async fn list_topic_names(&self) -> Result<Vec<TopicName>> {
        Ok(self.topics.iter().map(|entry| entry.key().clone()).collect())
    }
}
