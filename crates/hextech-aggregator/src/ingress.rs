//! Event ingress: binds handlers to topics and runs the consumer workers.
//!
//! 1. Each subscribed partition is drained by exactly one task, in order.
//! 2. Partitions run concurrently; no ordering is imposed across them.
//! 3. A message is committed after dispatch, whatever the handler outcome.
//! 4. Shutdown stops pulling, waits for in-flight dispatches up to a
//!    deadline, aborts the rest, then runs the handlers' shutdown hooks.

use crate::broker::{Broker, BrokerMessage, PartitionConsumer};
use crate::error::AggregatorError;
use crate::events::{
    DomainEvent, EventKind, ProjectCreated, RegionalScenarioCreated,
    RegionalScenarioIndicatorsUpdated, ScenarioIndicatorsUpdated,
};
use crate::handlers::{HandleOutcome, HandlerLifecycle, MessageHandler};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

// ============================================================================
// Message context
// ============================================================================

/// Where a dispatched event came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
}

impl MessageContext {
    /// Context for events handled outside a broker (direct calls, tests).
    pub fn detached() -> Self {
        Self {
            topic: String::new(),
            partition: 0,
            offset: 0,
            key: None,
        }
    }
}

impl From<&BrokerMessage> for MessageContext {
    fn from(message: &BrokerMessage) -> Self {
        Self {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            key: message.key.clone(),
        }
    }
}

// ============================================================================
// Dispatch table
// ============================================================================

type Slot<E> = Option<Arc<dyn MessageHandler<E>>>;

/// Event payloads that have a slot in the [`HandlerTable`].
pub trait RoutedEvent: Sized + Send + 'static {
    const KIND: EventKind;

    fn slot(table: &HandlerTable) -> &Slot<Self>;

    fn slot_mut(table: &mut HandlerTable) -> &mut Slot<Self>;
}

macro_rules! routed_event {
    ($event:ty, $kind:expr, $field:ident) => {
        impl RoutedEvent for $event {
            const KIND: EventKind = $kind;

            fn slot(table: &HandlerTable) -> &Slot<Self> {
                &table.$field
            }

            fn slot_mut(table: &mut HandlerTable) -> &mut Slot<Self> {
                &mut table.$field
            }
        }
    };
}

routed_event!(ProjectCreated, EventKind::ProjectCreated, project_created);
routed_event!(
    RegionalScenarioCreated,
    EventKind::RegionalScenarioCreated,
    regional_scenario_created
);
routed_event!(
    ScenarioIndicatorsUpdated,
    EventKind::ScenarioIndicatorsUpdated,
    scenario_indicators
);
routed_event!(
    RegionalScenarioIndicatorsUpdated,
    EventKind::RegionalScenarioIndicatorsUpdated,
    regional_indicators
);

/// One handler per event kind, resolved by matching on [`DomainEvent`].
#[derive(Clone, Default)]
pub struct HandlerTable {
    project_created: Slot<ProjectCreated>,
    regional_scenario_created: Slot<RegionalScenarioCreated>,
    scenario_indicators: Slot<ScenarioIndicatorsUpdated>,
    regional_indicators: Slot<RegionalScenarioIndicatorsUpdated>,
    lifecycle: Vec<Arc<dyn HandlerLifecycle>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to the event kind `E`. A kind takes at most one handler.
    pub fn register<E, H>(&mut self, handler: Arc<H>) -> Result<(), AggregatorError>
    where
        E: RoutedEvent,
        H: MessageHandler<E> + 'static,
    {
        let slot = E::slot_mut(self);
        if slot.is_some() {
            return Err(AggregatorError::Config(format!(
                "a handler for {} is already registered",
                E::KIND
            )));
        }
        let routed: Arc<dyn MessageHandler<E>> = handler.clone();
        *slot = Some(routed);

        let hooks: Arc<dyn HandlerLifecycle> = handler;
        self.lifecycle.push(hooks);
        Ok(())
    }

    pub fn is_registered(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::ProjectCreated => self.project_created.is_some(),
            EventKind::RegionalScenarioCreated => self.regional_scenario_created.is_some(),
            EventKind::ScenarioIndicatorsUpdated => self.scenario_indicators.is_some(),
            EventKind::RegionalScenarioIndicatorsUpdated => self.regional_indicators.is_some(),
        }
    }

    pub fn lifecycle(&self) -> &[Arc<dyn HandlerLifecycle>] {
        &self.lifecycle
    }

    /// Route an event to the handler registered for its kind.
    pub async fn dispatch(
        &self,
        event: DomainEvent,
        ctx: &MessageContext,
    ) -> Result<HandleOutcome, AggregatorError> {
        match event {
            DomainEvent::ProjectCreated(e) => self.route(e, ctx).await,
            DomainEvent::RegionalScenarioCreated(e) => self.route(e, ctx).await,
            DomainEvent::ScenarioIndicatorsUpdated(e) => self.route(e, ctx).await,
            DomainEvent::RegionalScenarioIndicatorsUpdated(e) => self.route(e, ctx).await,
        }
    }

    async fn route<E: RoutedEvent>(
        &self,
        event: E,
        ctx: &MessageContext,
    ) -> Result<HandleOutcome, AggregatorError> {
        let handler = E::slot(self)
            .as_ref()
            .ok_or_else(|| AggregatorError::DispatchFailure {
                topic: ctx.topic.clone(),
                partition: ctx.partition,
                offset: ctx.offset,
                reason: format!("no handler registered for {}", E::KIND),
            })?;
        Ok(handler.handle(event, ctx).await)
    }
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Debug, Default)]
pub struct IngressStats {
    dispatched: AtomicU64,
    dispatch_failures: AtomicU64,
    committed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngressSnapshot {
    pub dispatched: u64,
    pub dispatch_failures: u64,
    pub committed: u64,
}

impl IngressStats {
    pub fn snapshot(&self) -> IngressSnapshot {
        IngressSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Ingress
// ============================================================================

#[derive(Debug, Clone)]
pub struct IngressConfig {
    /// How long in-flight dispatches may run after shutdown is requested.
    pub shutdown_timeout: Duration,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    tasks: JoinSet<()>,
    handlers: Arc<HandlerTable>,
}

pub struct EventIngress {
    config: IngressConfig,
    handlers: HandlerTable,
    workers: Vec<Vec<String>>,
    stats: Arc<IngressStats>,
    running: Option<Running>,
}

impl EventIngress {
    pub fn new(config: IngressConfig) -> Self {
        Self {
            config,
            handlers: HandlerTable::new(),
            workers: Vec::new(),
            stats: Arc::new(IngressStats::default()),
            running: None,
        }
    }

    pub fn register<E, H>(&mut self, handler: Arc<H>) -> Result<(), AggregatorError>
    where
        E: RoutedEvent,
        H: MessageHandler<E> + 'static,
    {
        if self.running.is_some() {
            return Err(AggregatorError::Config(
                "handlers cannot be registered while the ingress is running".into(),
            ));
        }
        self.handlers.register::<E, H>(handler)
    }

    /// Bind a worker to `topics`. Each of their partitions gets its own task.
    pub fn add_worker<I, S>(&mut self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.workers.push(topics.into_iter().map(Into::into).collect());
    }

    pub fn stats(&self) -> Arc<IngressStats> {
        self.stats.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Subscribe every worker, run startup hooks and start consuming.
    ///
    /// On failure nothing stays claimed: dropped consumers hand their
    /// partitions back, and handlers that already started are shut down again.
    pub async fn start(&mut self, broker: Arc<dyn Broker>) -> Result<(), AggregatorError> {
        if self.running.is_some() {
            return Err(AggregatorError::Config("ingress already started".into()));
        }
        if self.workers.is_empty() {
            return Err(AggregatorError::Config("no workers configured".into()));
        }

        let mut consumers = Vec::new();
        for topics in &self.workers {
            consumers.extend(broker.subscribe(topics).await?);
        }

        let hooks = self.handlers.lifecycle();
        for (started, hook) in hooks.iter().enumerate() {
            if let Err(err) = hook.on_startup().await {
                let err = match err {
                    startup @ AggregatorError::Startup { .. } => startup,
                    other => AggregatorError::Startup {
                        handler: hook.name(),
                        reason: other.to_string(),
                    },
                };
                for earlier in &hooks[..started] {
                    earlier.on_shutdown().await;
                }
                return Err(err);
            }
            tracing::debug!(handler = hook.name(), "handler started");
        }

        let handlers = Arc::new(self.handlers.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        for consumer in consumers {
            tracing::info!(
                topic = consumer.topic(),
                partition = consumer.partition(),
                "partition worker started"
            );
            tasks.spawn(run_partition(
                consumer,
                handlers.clone(),
                self.stats.clone(),
                shutdown_rx.clone(),
            ));
        }

        self.running = Some(Running {
            shutdown_tx,
            tasks,
            handlers,
        });
        Ok(())
    }

    /// Stop consuming, drain in-flight dispatches and run shutdown hooks.
    pub async fn shutdown(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown_tx.send(true);

        let drained =
            tokio::time::timeout(self.config.shutdown_timeout, drain(&mut running.tasks)).await;
        if drained.is_err() {
            tracing::warn!(
                remaining = running.tasks.len(),
                "drain deadline reached, cancelling partition workers"
            );
            running.tasks.shutdown().await;
        }

        for hooks in running.handlers.lifecycle() {
            hooks.on_shutdown().await;
            tracing::debug!(handler = hooks.name(), "handler stopped");
        }
        tracing::info!(stats = ?self.stats.snapshot(), "ingress stopped");
    }
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            if err.is_panic() {
                tracing::error!(error = %err, "partition worker panicked");
            }
        }
    }
}

/// Aborts the wrapped task when dropped, so cancelling a worker also
/// cancels its in-flight dispatch.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn run_partition(
    mut consumer: Box<dyn PartitionConsumer>,
    handlers: Arc<HandlerTable>,
    stats: Arc<IngressStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let message = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            message = consumer.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        dispatch_message(&handlers, &stats, &message).await;

        match consumer.commit(message.offset).await {
            Ok(()) => {
                stats.committed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => tracing::warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %err,
                "commit failed"
            ),
        }
    }
    tracing::debug!(
        topic = consumer.topic(),
        partition = consumer.partition(),
        "partition worker stopped"
    );
}

async fn dispatch_message(
    handlers: &Arc<HandlerTable>,
    stats: &IngressStats,
    message: &BrokerMessage,
) {
    let ctx = MessageContext::from(message);
    let event = match DomainEvent::decode(&message.payload) {
        Ok(event) => event,
        Err(err) => {
            stats.dispatch_failures.fetch_add(1, Ordering::Relaxed);
            let err = AggregatorError::DispatchFailure {
                topic: ctx.topic,
                partition: ctx.partition,
                offset: ctx.offset,
                reason: format!("undecodable payload: {err}"),
            };
            tracing::warn!(error = %err, "skipping message");
            return;
        }
    };
    let kind = event.kind();

    // Run the handler in its own task so a panic is reported as a dispatch
    // failure instead of taking the partition worker down.
    let mut task = {
        let handlers = handlers.clone();
        let ctx = ctx.clone();
        AbortOnDrop(tokio::spawn(async move {
            handlers.dispatch(event, &ctx).await
        }))
    };
    let result = (&mut task.0).await;

    match result {
        Ok(Ok(outcome)) => {
            stats.dispatched.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                event_type = %kind,
                topic = %ctx.topic,
                partition = ctx.partition,
                offset = ctx.offset,
                ?outcome,
                "event dispatched"
            );
        }
        Ok(Err(err)) => {
            stats.dispatch_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %err, "skipping message");
        }
        Err(join_err) => {
            stats.dispatch_failures.fetch_add(1, Ordering::Relaxed);
            let err = AggregatorError::DispatchFailure {
                topic: ctx.topic,
                partition: ctx.partition,
                offset: ctx.offset,
                reason: format!("{kind} handler aborted: {join_err}"),
            };
            tracing::error!(error = %err, "skipping message");
        }
    }
}
