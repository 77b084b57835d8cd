//! The reconciliation engine
//!
//! The operator receives typed triggers from the resource watcher and
//! the cluster watcher, deduplicates its own echoes through the
//! in-flight tracker, and turns every genuine change into a chain of
//! events on a single FIFO queue. Each event performs exactly one
//! external or store operation; its successor is enqueued only when
//! that operation succeeded, so a chain encodes a multi-step protocol
//! such as "update the resource, then the cluster config, then the
//! partition count, then the private record".
//!
//! One queue task dispatches events in order. The operation itself
//! runs on a worker task so slow external calls never block the
//! queue; unrelated topics' chains interleave between queue turns
//! while a single topic's chain stays in its enqueued order.

use crate::backoff::BackOff;
use crate::config::Config;
use crate::crd::KafkaTopic;
use crate::diff::TopicDiff;
use crate::error::{OperatorError, Result};
use crate::inflight::InFlight;
use crate::k8s::{object_reference, K8s};
use crate::kafka::TopicAdmin;
use crate::resources::{resource_from_topic, topic_from_resource, LabelPredicate};
use crate::store::TopicStore;
use crate::topic::{ResourceName, Topic, TopicName};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::ResourceExt;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

/// Metrics for the reconciliation engine
pub struct OperatorMetrics {
    /// Counter for reconciliation attempts
    pub reconciliations: metrics::Counter,
    /// Counter for failed events
    pub event_errors: metrics::Counter,
    /// Histogram for reconciliation duration
    pub duration: metrics::Histogram,
}

impl OperatorMetrics {
    /// Create new operator metrics
    pub fn new() -> Self {
        Self {
            reconciliations: metrics::counter!("kato_reconciliations_total"),
            event_errors: metrics::counter!("kato_event_errors_total"),
            duration: metrics::histogram!("kato_reconciliation_duration_seconds"),
        }
    }
}

impl Default for OperatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Completion handle of an event chain
type Done = Option<oneshot::Sender<Result<()>>>;

/// The single operation an event performs
enum Op {
    CreateResource(Topic),
    UpdateResource(Topic),
    DeleteResource { topic: TopicName, resource: ResourceName },
    CreateClusterTopic(Topic),
    UpdateClusterConfig(Topic),
    IncreaseClusterPartitions(Topic),
    DeleteClusterTopic(TopicName),
    CreateInStore(Topic),
    UpdateInStore(Topic),
    DeleteFromStore(TopicName),
    SurfaceError(String),
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::CreateResource(t) => write!(f, "CreateResource(topic={})", t.name),
            Op::UpdateResource(t) => write!(f, "UpdateResource(topic={})", t.name),
            Op::DeleteResource { topic, .. } => write!(f, "DeleteResource(topic={topic})"),
            Op::CreateClusterTopic(t) => write!(f, "CreateClusterTopic(topic={})", t.name),
            Op::UpdateClusterConfig(t) => write!(f, "UpdateClusterConfig(topic={})", t.name),
            Op::IncreaseClusterPartitions(t) => {
                write!(f, "IncreaseClusterPartitions(topic={})", t.name)
            }
            Op::DeleteClusterTopic(name) => write!(f, "DeleteClusterTopic(topic={name})"),
            Op::CreateInStore(t) => write!(f, "CreateInStore(topic={})", t.name),
            Op::UpdateInStore(t) => write!(f, "UpdateInStore(topic={})", t.name),
            Op::DeleteFromStore(name) => write!(f, "DeleteFromStore(topic={name})"),
            Op::SurfaceError(_) => f.write_str("SurfaceError"),
        }
    }
}

/// One unit of work on the event queue.
///
/// Plain data: the operation, the resource to blame in error events,
/// the successor to enqueue on success, and the completion handle of
/// the whole chain. The handle travels along the chain and is
/// resolved by the last event, or by the first one that fails.
struct Event {
    op: Op,
    involved: Option<ObjectReference>,
    next: Option<Box<Event>>,
    done: Done,
}

/// Build a chain of events back to front
fn chain(steps: Vec<(Op, Option<ObjectReference>)>, done: Done) -> Event {
    let mut head: Option<Event> = None;
    for (op, involved) in steps.into_iter().rev() {
        head = Some(Event {
            op,
            involved,
            next: head.map(Box::new),
            done: None,
        });
    }
    let mut event = head.expect("a chain needs at least one step");
    event.done = done;
    event
}

/// Resolve a chain's completion handle
fn complete(done: Done, result: Result<()>) {
    match done {
        Some(sender) => {
            if sender.send(result).is_err() {
                // nowhere left to route the outcome
                warn!("chain completion had no receiver");
            }
        }
        None => {
            if let Err(error) = result {
                debug!(error = %error, "unobserved chain ended in failure");
            }
        }
    }
}

struct Inner {
    kafka: Arc<dyn TopicAdmin>,
    k8s: Arc<dyn K8s>,
    store: Arc<dyn TopicStore>,
    in_flight: InFlight,
    predicate: LabelPredicate,
    config: Config,
    metrics: OperatorMetrics,
    /// Weak so the queue task ends once every operator handle is gone
    tx: mpsc::WeakUnboundedSender<Event>,
}

/// The reconciliation engine
///
/// Cheap to clone; every clone feeds the same queue. Requires a tokio
/// runtime, since construction spawns the queue task.
#[derive(Clone)]
pub struct Operator {
    inner: Arc<Inner>,
    tx: mpsc::UnboundedSender<Event>,
}

impl Operator {
    /// Create the engine and start its queue task
    pub fn new(
        kafka: Arc<dyn TopicAdmin>,
        k8s: Arc<dyn K8s>,
        store: Arc<dyn TopicStore>,
        config: Config,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let predicate = config.predicate();
        let inner = Arc::new(Inner {
            kafka,
            k8s,
            store,
            in_flight: InFlight::new(),
            predicate,
            config,
            metrics: OperatorMetrics::new(),
            tx: tx.downgrade(),
        });
        tokio::spawn(run_queue(Arc::clone(&inner), rx));
        Operator { inner, tx }
    }

    /// The tracker of operations this operator has outstanding
    pub fn in_flight(&self) -> &InFlight {
        &self.inner.in_flight
    }

    /// Called when a resource appeared in the declarative store
    pub async fn on_resource_added(&self, resource: &KafkaTopic) -> Result<()> {
        if !self.inner.predicate.matches(resource) {
            return Ok(());
        }
        let topic = topic_from_resource(resource)?;
        if !self.inner.in_flight.should_process_resource_added(&topic.name) {
            debug!(topic = %topic.name, "ignoring own resource creation");
            return Ok(());
        }
        let involved = Some(object_reference(resource));
        self.execute(vec![
            (Op::CreateClusterTopic(topic.clone()), involved.clone()),
            (Op::CreateInStore(topic), involved),
        ])
        .await
    }

    /// Called when a resource changed in the declarative store.
    ///
    /// A modification can touch partitions, config, or anything else,
    /// so this runs the full three-way reconcile instead of guessing.
    pub async fn on_resource_modified(&self, resource: &KafkaTopic) -> Result<()> {
        if !self.inner.predicate.matches(resource) {
            return Ok(());
        }
        let topic = topic_from_resource(resource)?;
        if !self
            .inner
            .in_flight
            .should_process_resource_modified(&topic.name)
        {
            debug!(topic = %topic.name, "ignoring own resource update");
            return Ok(());
        }
        self.reconcile_topic(Some(resource), &topic.name).await
    }

    /// Called when a resource disappeared from the declarative store
    pub async fn on_resource_deleted(&self, resource: &KafkaTopic) -> Result<()> {
        if !self.inner.predicate.matches(resource) {
            return Ok(());
        }
        let topic = topic_from_resource(resource)?;
        if !self
            .inner
            .in_flight
            .should_process_resource_deleted(&topic.name)
        {
            debug!(topic = %topic.name, "ignoring own resource deletion");
            return Ok(());
        }
        let involved = Some(object_reference(resource));
        self.execute(vec![
            (Op::DeleteClusterTopic(topic.name.clone()), involved.clone()),
            (Op::DeleteFromStore(topic.name), involved),
        ])
        .await
    }

    /// Called when a topic appeared on the cluster.
    ///
    /// The cluster's metadata API lags behind its coordination state,
    /// so the metadata read is retried with backoff while it reports
    /// the topic as unknown. Exhaustion is fatal for this chain; any
    /// other failure propagates immediately.
    pub async fn on_topic_created(&self, name: &TopicName) -> Result<()> {
        if !self.inner.in_flight.should_process_topic_create(name) {
            debug!(topic = %name, "ignoring own topic creation");
            return Ok(());
        }
        let topic = match self.await_metadata(name).await {
            Ok(topic) => topic,
            Err(error) => {
                self.surface(
                    None,
                    format!("fetching metadata for new topic '{name}' failed: {error}"),
                )
                .await;
                return Err(error);
            }
        };
        self.execute(vec![
            (Op::CreateResource(topic.clone()), None),
            (Op::CreateInStore(topic), None),
        ])
        .await
    }

    /// Called when a topic's config changed on the cluster
    pub async fn on_topic_config_changed(&self, name: &TopicName) -> Result<()> {
        if !self.inner.in_flight.should_process_topic_config_change(name) {
            debug!(topic = %name, "ignoring own config change");
            return Ok(());
        }
        let mut topic = match self.inner.kafka.topic_metadata(name).await {
            Ok(Some(topic)) => topic,
            Ok(None) => {
                let error = OperatorError::Cluster(format!(
                    "topic '{name}' vanished before its changed config could be read"
                ));
                self.surface(None, error.to_string()).await;
                return Err(error);
            }
            Err(error) => {
                self.surface(
                    None,
                    format!("fetching metadata for topic '{name}' failed: {error}"),
                )
                .await;
                return Err(error);
            }
        };
        // keep the resource name the topic was originally filed under
        if let Some(private) = self.inner.store.read(name).await? {
            topic.resource_name = private.resource_name;
        }
        self.execute(vec![
            (Op::UpdateResource(topic.clone()), None),
            (Op::UpdateInStore(topic), None),
        ])
        .await
    }

    /// Called when a topic disappeared from the cluster
    pub async fn on_topic_deleted(&self, name: &TopicName) -> Result<()> {
        if !self.inner.in_flight.should_process_topic_delete(name) {
            debug!(topic = %name, "ignoring own topic deletion");
            return Ok(());
        }
        let resource_name = match self.inner.store.read(name).await? {
            Some(private) => private.resource_name,
            None => name.as_resource_name(),
        };
        self.execute(vec![
            (
                Op::DeleteResource {
                    topic: name.clone(),
                    resource: resource_name,
                },
                None,
            ),
            (Op::DeleteFromStore(name.clone()), None),
        ])
        .await
    }

    /// Reconcile one topic from whatever states currently exist.
    ///
    /// Gathers the cluster and private states for `name` and runs the
    /// three-way reconcile against the given resource (if any).
    pub async fn reconcile_topic(
        &self,
        resource: Option<&KafkaTopic>,
        name: &TopicName,
    ) -> Result<()> {
        let k8s_topic = resource.map(topic_from_resource).transpose()?;
        let involved = resource.map(object_reference);
        let (kafka_topic, private_topic) = tokio::try_join!(
            self.inner.kafka.topic_metadata(name),
            self.inner.store.read(name)
        )?;
        self.reconcile(involved, k8s_topic, kafka_topic, private_topic)
            .await
    }

    /// Three-way reconciliation of resource state, cluster state and
    /// private state, any of which may be absent.
    ///
    /// With no private state the sides cannot be merged, only adopted
    /// wholesale; once private state exists, divergence on either
    /// side is diffed against it, checked for conflicts, merged and
    /// pushed back out. Replication factor changes and partition
    /// decreases are rejected before any mutation is attempted.
    #[instrument(skip_all)]
    pub async fn reconcile(
        &self,
        involved: Option<ObjectReference>,
        k8s_topic: Option<Topic>,
        kafka_topic: Option<Topic>,
        private_topic: Option<Topic>,
    ) -> Result<()> {
        self.inner.metrics.reconciliations.increment(1);
        let start = Instant::now();
        debug!(
            resource = k8s_topic.is_some(),
            cluster = kafka_topic.is_some(),
            private = private_topic.is_some(),
            "reconciling topic states"
        );
        let result = self
            .reconcile_states(involved, k8s_topic, kafka_topic, private_topic)
            .await;
        self.inner.metrics.duration.record(start.elapsed().as_secs_f64());
        result
    }

    async fn reconcile_states(
        &self,
        involved: Option<ObjectReference>,
        k8s_topic: Option<Topic>,
        kafka_topic: Option<Topic>,
        private_topic: Option<Topic>,
    ) -> Result<()> {
        let Some(private) = private_topic else {
            return match (k8s_topic, kafka_topic) {
                (None, None) => {
                    error!(
                        "all three topic states absent during reconciliation; \
                         this should be impossible"
                    );
                    Ok(())
                }
                (None, Some(kafka)) => {
                    // created directly on the cluster
                    self.execute(vec![
                        (Op::CreateResource(kafka.clone()), involved.clone()),
                        (Op::CreateInStore(kafka), involved),
                    ])
                    .await
                }
                (Some(k8s), None) => {
                    // created via the resource
                    self.execute(vec![
                        (Op::CreateClusterTopic(k8s.clone()), involved.clone()),
                        (Op::CreateInStore(k8s), involved),
                    ])
                    .await
                }
                (Some(k8s), Some(kafka)) => {
                    if TopicDiff::diff(&kafka, &k8s).is_empty() {
                        debug!(topic = %kafka.name, "resource and cluster already agree");
                        self.execute(vec![(Op::CreateInStore(kafka), involved)]).await
                    } else {
                        let message = format!(
                            "topic '{}' exists in both the cluster and the resource store \
                             with different definitions and no private record to merge from",
                            k8s.name
                        );
                        self.surface(involved, message.clone()).await;
                        Err(OperatorError::ConflictingChange(message))
                    }
                }
            };
        };

        match (k8s_topic, kafka_topic) {
            (None, None) => {
                // both sides gone; the record is stale
                self.execute(vec![(Op::DeleteFromStore(private.name.clone()), involved)])
                    .await
            }
            (None, Some(kafka)) => {
                // resource was deleted externally
                self.execute(vec![
                    (Op::DeleteClusterTopic(kafka.name.clone()), involved.clone()),
                    (Op::DeleteFromStore(kafka.name), involved),
                ])
                .await
            }
            (Some(k8s), None) => {
                // cluster topic was deleted externally
                self.execute(vec![
                    (
                        Op::DeleteResource {
                            topic: k8s.name.clone(),
                            resource: k8s.resource_name.clone(),
                        },
                        involved.clone(),
                    ),
                    (Op::DeleteFromStore(k8s.name), involved),
                ])
                .await
            }
            (Some(k8s), Some(kafka)) => {
                let ours_kafka = TopicDiff::diff(&private, &kafka);
                let ours_k8s = TopicDiff::diff(&private, &k8s);

                if let Some(conflict) = ours_kafka.conflict(&ours_k8s) {
                    let message = format!(
                        "resource and cluster changed topic '{}' in conflicting ways: {conflict}",
                        private.name
                    );
                    self.surface(involved, message.clone()).await;
                    return Err(OperatorError::ConflictingChange(message));
                }

                let merged = ours_kafka.merge(&ours_k8s);
                if merged.is_empty() {
                    debug!(topic = %private.name, "all three states agree");
                    return Ok(());
                }
                if merged.changes_replication_factor() {
                    let error = OperatorError::ReplicationFactorChange(private.name.clone());
                    self.surface(involved, error.to_string()).await;
                    return Err(error);
                }
                if merged.decreases_num_partitions() {
                    let error = OperatorError::PartitionDecrease(private.name.clone());
                    self.surface(involved, error.to_string()).await;
                    return Err(error);
                }

                let result = merged.apply(&private);
                debug!(topic = %result.name, changes = %merged, "applying merged changes");

                let mut steps = vec![(Op::UpdateResource(result.clone()), involved.clone())];
                if merged.changes_config() {
                    steps.push((Op::UpdateClusterConfig(result.clone()), involved.clone()));
                }
                if merged.changes_num_partitions() {
                    steps.push((Op::IncreaseClusterPartitions(result.clone()), involved.clone()));
                }
                steps.push((Op::UpdateInStore(result), involved));
                self.execute(steps).await
            }
        }
    }

    /// Periodic and startup full scan: reconcile every topic the
    /// cluster knows, every managed resource not covered by that, and
    /// every private record not covered by either. Per-topic failures
    /// are reported and do not stop the scan.
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self) -> Result<()> {
        info!("starting full reconciliation");
        let cluster_topics = self.inner.kafka.list_topic_names().await?;

        let mut resources_by_topic: HashMap<TopicName, KafkaTopic> = HashMap::new();
        for resource in self.inner.k8s.list_resources().await? {
            if !self.inner.predicate.matches(&resource) {
                continue;
            }
            match topic_from_resource(&resource) {
                Ok(topic) => {
                    resources_by_topic.insert(topic.name, resource);
                }
                Err(error) => {
                    warn!(
                        resource = %resource.name_any(),
                        error = %error,
                        "skipping malformed resource during full reconciliation"
                    );
                }
            }
        }

        let mut covered: HashSet<TopicName> = HashSet::new();
        let mut failures = 0usize;

        for name in cluster_topics {
            let resource = resources_by_topic.get(&name);
            if let Err(error) = self.reconcile_topic(resource, &name).await {
                failures += 1;
                warn!(topic = %name, error = %error, "reconciliation failed");
            }
            covered.insert(name);
        }

        for (name, resource) in &resources_by_topic {
            if covered.contains(name) {
                continue;
            }
            if let Err(error) = self.reconcile_topic(Some(resource), name).await {
                failures += 1;
                warn!(topic = %name, error = %error, "reconciliation failed");
            }
        }

        for name in self.inner.store.list_topic_names().await? {
            if covered.contains(&name) || resources_by_topic.contains_key(&name) {
                continue;
            }
            if let Err(error) = self.reconcile_topic(None, &name).await {
                failures += 1;
                warn!(topic = %name, error = %error, "reconciliation failed");
            }
        }

        info!(failures, "full reconciliation finished");
        Ok(())
    }

    /// Retry the metadata read until the topic becomes visible
    async fn await_metadata(&self, name: &TopicName) -> Result<Topic> {
        let mut backoff = BackOff::with_parameters(
            self.inner.config.metadata_backoff_delay,
            self.inner.config.metadata_max_attempts,
        );
        loop {
            match self.inner.kafka.topic_metadata(name).await? {
                Some(topic) => return Ok(topic),
                None => {
                    let delay = backoff.delay()?;
                    debug!(
                        topic = %name,
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "topic not yet visible in cluster metadata"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    /// Surface an error event and wait until the sink accepted it
    async fn surface(&self, involved: Option<ObjectReference>, message: String) {
        if let Err(error) = self
            .execute(vec![(Op::SurfaceError(message), involved)])
            .await
        {
            error!(error = %error, "failed to surface error event");
        }
    }

    /// Enqueue a chain and wait for its completion
    async fn execute(&self, steps: Vec<(Op, Option<ObjectReference>)>) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue(chain(steps, Some(done_tx)));
        match done_rx.await {
            Ok(result) => result,
            Err(_) => Err(OperatorError::QueueClosed),
        }
    }

    fn enqueue(&self, event: Event) {
        debug!(event = %event.op, "enqueuing event");
        if self.tx.send(event).is_err() {
            warn!("event queue closed; dropping event");
        }
    }
}

/// The queue task: dispatch events strictly in arrival order
async fn run_queue(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = rx.recv().await {
        debug!(event = %event.op, "processing event");
        dispatch(&inner, event);
    }
    debug!("event queue closed");
}

/// Mark in-flight state for the event, then run its operation on a
/// worker task. The in-flight entry is recorded before the external
/// call is issued so the watcher's echo of the mutation always finds
/// it.
fn dispatch(inner: &Arc<Inner>, event: Event) {
    match &event.op {
        Op::CreateResource(t) => inner.in_flight.start_creating_resource(&t.name),
        Op::UpdateResource(t) => inner.in_flight.start_updating_resource(&t.name),
        Op::DeleteResource { topic, .. } => inner.in_flight.start_deleting_resource(topic),
        Op::CreateClusterTopic(t) => inner.in_flight.start_creating_topic(&t.name),
        Op::UpdateClusterConfig(t) | Op::IncreaseClusterPartitions(t) => {
            inner.in_flight.start_updating_topic(&t.name)
        }
        Op::DeleteClusterTopic(name) => inner.in_flight.start_deleting_topic(name),
        Op::CreateInStore(_)
        | Op::UpdateInStore(_)
        | Op::DeleteFromStore(_)
        | Op::SurfaceError(_) => {}
    }

    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let Event {
            op,
            involved,
            next,
            done,
        } = event;
        match inner.perform(&op, involved.as_ref()).await {
            Ok(()) => {
                if let Some(mut successor) = next {
                    successor.done = done;
                    inner.enqueue(*successor);
                } else {
                    complete(done, Ok(()));
                }
            }
            Err(error) => {
                inner.metrics.event_errors.increment(1);
                if matches!(op, Op::SurfaceError(_)) {
                    // the sink itself failed; there is nowhere else
                    // to route this, so log and move on
                    error!(error = %error, "failed to create error event");
                } else {
                    warn!(event = %op, error = %error, "event failed, aborting chain");
                    inner.enqueue(Event {
                        op: Op::SurfaceError(format!("{op} failed: {error}")),
                        involved,
                        next: None,
                        done: None,
                    });
                }
                complete(done, Err(error));
            }
        }
    });
}

impl Inner {
    /// Perform an event's single operation
    async fn perform(&self, op: &Op, involved: Option<&ObjectReference>) -> Result<()> {
        match op {
            Op::CreateResource(topic) => {
                let resource =
                    resource_from_topic(topic, &self.predicate, &self.config.namespace);
                self.k8s.create_resource(&resource).await
            }
            Op::UpdateResource(topic) => {
                let resource =
                    resource_from_topic(topic, &self.predicate, &self.config.namespace);
                self.k8s.update_resource(&resource).await
            }
            Op::DeleteResource { resource, .. } => self.k8s.delete_resource(resource).await,
            Op::CreateClusterTopic(topic) => self.kafka.create_topic(topic).await,
            Op::UpdateClusterConfig(topic) => self.kafka.update_topic_config(topic).await,
            Op::IncreaseClusterPartitions(topic) => self.kafka.increase_partitions(topic).await,
            Op::DeleteClusterTopic(name) => self.kafka.delete_topic(name).await,
            Op::CreateInStore(topic) => self.store.create(topic).await,
            Op::UpdateInStore(topic) => self.store.update(topic).await,
            Op::DeleteFromStore(name) => self.store.delete(name).await,
            Op::SurfaceError(message) => {
                self.k8s
                    .create_event(involved.cloned(), message.clone())
                    .await
            }
        }
    }

    fn enqueue(&self, event: Event) {
        let Some(tx) = self.tx.upgrade() else {
            warn!("event queue gone; dropping event");
            return;
        };
        if tx.send(event).is_err() {
            warn!("event queue closed; dropping event");
        }
    }
}
