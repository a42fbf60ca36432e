use crate::config::CoordinatorConfig;
use crate::planner::{DefaultPlanner, Planner};
use crate::registry::{AgentRecord, AgentRegistry};
use crate::task_graph::TaskGraph;
use crate::types::{
    Feature, FeatureRequest, FeatureState, ProgressEvent, ProgressEventKind, SubmitResponse,
};
use chrono::{DateTime, Utc};
use foundry_bus::{Deduplicator, MessageBus, Subscription};
use foundry_core::topics::{agent_topic, feature_topic, COORDINATOR_ENDPOINT};
use foundry_core::{
    AgentInfo, AgentStatus, CoordinationPayload, ErrorPayload, ExecutionResult, FoundryError,
    FoundryResult, Message, MessageKind, Priority, TaskAssignment, TaskPhase, TaskResultPayload,
    TaskSpecification, TaskStatus,
};
use foundry_knowledge::{KnowledgeEntry, KnowledgeStore, SourceType};
use foundry_validation::{ValidationConfig, ValidationEngine};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const COMMAND_BUFFER: usize = 256;
const DEDUP_CAPACITY: usize = 4096;

enum Command {
    Submit {
        feature_id: Uuid,
        request: FeatureRequest,
        reply: oneshot::Sender<SubmitResponse>,
    },
    Cancel {
        feature_id: Uuid,
        reply: oneshot::Sender<FoundryResult<()>>,
    },
    Feature {
        feature_id: Uuid,
        reply: oneshot::Sender<Option<Feature>>,
    },
    Features {
        reply: oneshot::Sender<Vec<Feature>>,
    },
    Tasks {
        feature_id: Uuid,
        reply: oneshot::Sender<Vec<TaskSpecification>>,
    },
    Agents {
        reply: oneshot::Sender<Vec<AgentRecord>>,
    },
    Planned {
        feature_id: Uuid,
        result: FoundryResult<Vec<TaskSpecification>>,
    },
    Wake,
}

/// Entry point for building and spawning the coordinator actor.
pub struct Coordinator;

impl Coordinator {
    /// Starts configuring a coordinator attached to `bus`.
    pub fn builder(bus: MessageBus) -> CoordinatorBuilder {
        CoordinatorBuilder {
            bus,
            config: CoordinatorConfig::default(),
            planner: Arc::new(DefaultPlanner),
            validation: None,
            knowledge: None,
        }
    }
}

/// Builder for the coordinator actor.
pub struct CoordinatorBuilder {
    bus: MessageBus,
    config: CoordinatorConfig,
    planner: Arc<dyn Planner>,
    validation: Option<ValidationEngine>,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
}

impl CoordinatorBuilder {
    /// Replaces the default configuration.
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Planner used to decompose features. Defaults to [`DefaultPlanner`].
    pub fn planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = planner;
        self
    }

    /// Validation engine for task results. Defaults to the built-in gates.
    pub fn validation(mut self, engine: ValidationEngine) -> Self {
        self.validation = Some(engine);
        self
    }

    /// Store that receives a summary entry when a feature completes or fails.
    pub fn knowledge(mut self, store: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge = Some(store);
        self
    }

    /// Subscribes to the coordinator endpoint and spawns the actor. Must be
    /// called within a tokio runtime.
    pub fn spawn(self) -> FoundryResult<CoordinatorHandle> {
        let validation = match self.validation {
            Some(engine) => engine,
            None => ValidationEngine::from_config(&ValidationConfig::default())?,
        };
        let inbox = self.bus.subscribe(agent_topic(COORDINATOR_ENDPOINT));
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (revision_tx, revision_rx) = watch::channel(0u64);
        let token = CancellationToken::new();

        let actor = CoordinatorActor {
            bus: self.bus.clone(),
            planner: self.planner,
            validation,
            knowledge: self.knowledge,
            registry: AgentRegistry::new(self.config.outcome_window),
            features: HashMap::new(),
            inflight: HashMap::new(),
            dedup: Deduplicator::new(DEDUP_CAPACITY),
            commands: tx.downgrade(),
            revision: revision_tx,
            config: self.config,
        };
        let task = tokio::spawn(actor.run(rx, inbox, token.clone()));

        Ok(CoordinatorHandle {
            bus: self.bus,
            commands: tx,
            revision: revision_rx,
            token,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }
}

/// Cloneable handle to a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    bus: MessageBus,
    commands: mpsc::Sender<Command>,
    revision: watch::Receiver<u64>,
    token: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

fn stopped() -> FoundryError {
    FoundryError::Orchestrator("coordinator is not running".into())
}

impl CoordinatorHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> FoundryResult<T> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(make(reply)).await.map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Submits a feature. It starts in `Planning`.
    pub async fn submit(&self, request: FeatureRequest) -> FoundryResult<SubmitResponse> {
        let feature_id = Uuid::new_v4();
        self.request(|reply| Command::Submit {
            feature_id,
            request,
            reply,
        })
        .await
    }

    /// Submits a feature and returns a subscription to its progress stream.
    /// The subscription exists before the coordinator sees the feature, so no
    /// event is missed.
    pub async fn submit_watched(
        &self,
        request: FeatureRequest,
    ) -> FoundryResult<(SubmitResponse, Subscription)> {
        let feature_id = Uuid::new_v4();
        let events = self.bus.subscribe(feature_topic(&feature_id));
        let response = self
            .request(|reply| Command::Submit {
                feature_id,
                request,
                reply,
            })
            .await?;
        Ok((response, events))
    }

    /// Cancels a feature in `Planning` or `Implementation`.
    pub async fn cancel(&self, feature_id: Uuid) -> FoundryResult<()> {
        self.request(|reply| Command::Cancel { feature_id, reply })
            .await?
    }

    /// Snapshot of one feature.
    pub async fn feature(&self, feature_id: Uuid) -> FoundryResult<Option<Feature>> {
        self.request(|reply| Command::Feature { feature_id, reply })
            .await
    }

    /// Every feature, oldest first.
    pub async fn features(&self) -> FoundryResult<Vec<Feature>> {
        self.request(|reply| Command::Features { reply }).await
    }

    /// The feature's tasks in decomposition order. Empty while planning.
    pub async fn tasks(&self, feature_id: Uuid) -> FoundryResult<Vec<TaskSpecification>> {
        self.request(|reply| Command::Tasks { feature_id, reply })
            .await
    }

    /// Registered agents sorted by endpoint.
    pub async fn agents(&self) -> FoundryResult<Vec<AgentRecord>> {
        self.request(|reply| Command::Agents { reply }).await
    }

    /// Waits until at least `count` live agents are registered.
    pub async fn wait_for_agents(
        &self,
        count: usize,
        timeout: Duration,
    ) -> FoundryResult<Vec<AgentRecord>> {
        let mut revision = self.revision.clone();
        let wait = async {
            loop {
                revision.borrow_and_update();
                let agents = self.agents().await?;
                let live = agents
                    .iter()
                    .filter(|a| a.info.status != AgentStatus::Offline)
                    .count();
                if live >= count {
                    return Ok::<_, FoundryError>(agents);
                }
                revision.changed().await.map_err(|_| stopped())?;
            }
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            FoundryError::Orchestrator(format!("timed out waiting for {count} agents"))
        })?
    }

    /// Waits until the feature reaches a terminal state and returns it.
    pub async fn wait_until_settled(
        &self,
        feature_id: Uuid,
        timeout: Duration,
    ) -> FoundryResult<Feature> {
        let mut revision = self.revision.clone();
        let wait = async {
            loop {
                revision.borrow_and_update();
                let feature = self.feature(feature_id).await?.ok_or_else(|| {
                    FoundryError::Orchestrator(format!("unknown feature {feature_id}"))
                })?;
                if feature.state.is_terminal() {
                    return Ok::<_, FoundryError>(feature);
                }
                revision.changed().await.map_err(|_| stopped())?;
            }
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            FoundryError::Orchestrator(format!("timed out waiting for feature {feature_id}"))
        })?
    }

    /// Stops the actor and waits for it to exit.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Coordinator task ended abnormally");
            }
        }
    }
}

struct Inflight {
    feature_id: Uuid,
    task_id: Uuid,
    endpoint: String,
}

#[derive(Debug, Default)]
struct TaskAttempts {
    /// Failed attempts so far. Reassignments after a heartbeat timeout do not count.
    failures: u32,
    /// Agents that failed this task. Once the budget is spent, only agents
    /// outside this set are tried, one attempt each.
    tried: BTreeSet<String>,
    /// Agent to skip on the next dispatch.
    excluded: Option<String>,
    /// Backoff deadline for the next dispatch.
    not_before: Option<Instant>,
    last_error: Option<String>,
    result: Option<ExecutionResult>,
}

struct FeatureRun {
    feature: Feature,
    graph: Option<TaskGraph>,
    attempts: HashMap<Uuid, TaskAttempts>,
}

enum FailureOutcome {
    Retry(Duration),
    Exhausted { errors: Vec<String>, failures: u32 },
}

struct CoordinatorActor {
    bus: MessageBus,
    config: CoordinatorConfig,
    planner: Arc<dyn Planner>,
    validation: ValidationEngine,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    registry: AgentRegistry,
    features: HashMap<Uuid, FeatureRun>,
    /// Dispatched assignments keyed by correlation id.
    inflight: HashMap<Uuid, Inflight>,
    dedup: Deduplicator,
    commands: mpsc::WeakSender<Command>,
    revision: watch::Sender<u64>,
}

impl CoordinatorActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inbox: Subscription,
        token: CancellationToken,
    ) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            heartbeat_timeout_ms = self.config.heartbeat_timeout().as_millis() as u64,
            max_task_attempts = self.config.max_task_attempts,
            "Coordinator started"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                msg = inbox.recv() => match msg {
                    Some(msg) => self.handle_message(msg),
                    None => break,
                },
                _ = sweep.tick() => self.sweep(),
            }
            self.revision.send_modify(|r| *r = r.wrapping_add(1));
        }
        info!(features = self.features.len(), "Coordinator stopped");
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit {
                feature_id,
                request,
                reply,
            } => {
                let response = self.submit(feature_id, request);
                let _ = reply.send(response);
            }
            Command::Cancel { feature_id, reply } => {
                let _ = reply.send(self.cancel(feature_id));
            }
            Command::Feature { feature_id, reply } => {
                let _ = reply.send(self.features.get(&feature_id).map(|r| r.feature.clone()));
            }
            Command::Features { reply } => {
                let mut all: Vec<Feature> =
                    self.features.values().map(|r| r.feature.clone()).collect();
                all.sort_by_key(|f| f.created_at);
                let _ = reply.send(all);
            }
            Command::Tasks { feature_id, reply } => {
                let tasks = self
                    .features
                    .get(&feature_id)
                    .and_then(|r| r.graph.as_ref())
                    .map(|g| g.tasks().cloned().collect())
                    .unwrap_or_default();
                let _ = reply.send(tasks);
            }
            Command::Agents { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            Command::Planned { feature_id, result } => self.on_planned(feature_id, result),
            Command::Wake => self.dispatch_all(),
        }
    }

    fn submit(&mut self, feature_id: Uuid, request: FeatureRequest) -> SubmitResponse {
        let mut feature = Feature::from_request(request);
        feature.id = feature_id;
        info!(feature_id = %feature_id, title = %feature.title, "Feature submitted");

        let planner = Arc::clone(&self.planner);
        let snapshot = feature.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let planned = tokio::spawn(async move { planner.decompose(&snapshot).await }).await;
            let result = planned.unwrap_or_else(|e| {
                Err(FoundryError::Orchestrator(format!("planner panicked: {e}")))
            });
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::Planned { feature_id, result }).await;
            }
        });

        self.features.insert(
            feature_id,
            FeatureRun {
                feature,
                graph: None,
                attempts: HashMap::new(),
            },
        );
        SubmitResponse {
            feature_id,
            status: FeatureState::Planning,
        }
    }

    fn cancel(&mut self, feature_id: Uuid) -> FoundryResult<()> {
        let state = match self.features.get(&feature_id) {
            Some(run) => run.feature.state,
            None => {
                return Err(FoundryError::Orchestrator(format!(
                    "unknown feature {feature_id}"
                )))
            }
        };
        if !state.is_cancellable() {
            return Err(FoundryError::Orchestrator(format!(
                "feature {feature_id} cannot be cancelled in state {state}"
            )));
        }
        self.abort_inflight(feature_id);
        if let Some(run) = self.features.get_mut(&feature_id) {
            run.feature.transition(FeatureState::Cancelled);
            publish(&self.bus, ProgressEvent::of(ProgressEventKind::FeatureCancelled, &run.feature));
        }
        info!(feature_id = %feature_id, "Feature cancelled");
        Ok(())
    }

    fn on_planned(&mut self, feature_id: Uuid, result: FoundryResult<Vec<TaskSpecification>>) {
        let Some(run) = self.features.get(&feature_id) else {
            return;
        };
        if run.feature.state != FeatureState::Planning {
            debug!(feature_id = %feature_id, state = %run.feature.state, "Ignoring late decomposition");
            return;
        }

        let registry = &self.registry;
        let graph = result
            .and_then(|mut tasks| {
                for task in &mut tasks {
                    task.feature_id = feature_id;
                }
                TaskGraph::build(tasks)
            })
            .and_then(|graph| {
                let uncovered = graph
                    .tasks()
                    .find_map(|t| registry.uncovered_capability(&t.required_capabilities));
                match uncovered {
                    Some(cap) => Err(FoundryError::UnsatisfiableCapability(cap)),
                    None => Ok(graph),
                }
            });

        match graph {
            Err(e) => {
                warn!(feature_id = %feature_id, error = %e, "Decomposition rejected");
                self.fail_feature(feature_id, vec![e.to_string()], 0);
            }
            Ok(graph) => {
                if let Some(run) = self.features.get_mut(&feature_id) {
                    info!(
                        feature_id = %feature_id,
                        tasks = graph.total_count(),
                        "Feature decomposed"
                    );
                    run.feature.tasks = graph.order().to_vec();
                    run.graph = Some(graph);
                    run.feature.transition(FeatureState::Implementation);
                    publish(&self.bus, ProgressEvent::of(ProgressEventKind::StateChanged, &run.feature));
                }
                self.dispatch_all();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inbound messages
    // -----------------------------------------------------------------------

    fn handle_message(&mut self, msg: Message) {
        if !self.dedup.first_seen(msg.id) {
            debug!(message_id = %msg.id, "Duplicate message dropped");
            return;
        }
        match msg.kind {
            MessageKind::Status | MessageKind::Heartbeat => self.on_status(&msg),
            MessageKind::TaskResult => self.on_result(&msg),
            MessageKind::Error => self.on_error(&msg),
            other => debug!(kind = %other, sender = %msg.sender, "Ignoring message"),
        }
    }

    fn on_status(&mut self, msg: &Message) {
        let info: AgentInfo = match msg.payload_as() {
            Ok(info) => info,
            Err(e) => {
                warn!(sender = %msg.sender, error = %e, "Malformed agent status");
                return;
            }
        };
        let endpoint = info.endpoint_id.clone();
        let offline = info.status == AgentStatus::Offline;
        if self.registry.observe(info, Instant::now()) {
            info!(endpoint = %endpoint, "Agent registered");
        }
        if offline {
            info!(endpoint = %endpoint, "Agent reported offline");
            if let Some(task_id) = self.registry.mark_offline(&endpoint) {
                self.requeue_lost(&endpoint, task_id);
            }
            self.check_capability_loss();
        }
        self.dispatch_all();
    }

    fn on_result(&mut self, msg: &Message) {
        let payload: TaskResultPayload = match msg.payload_as() {
            Ok(p) => p,
            Err(e) => {
                warn!(sender = %msg.sender, error = %e, "Malformed task result");
                return;
            }
        };
        let matches = msg
            .correlation_id
            .and_then(|c| self.inflight.get(&c).map(|i| (c, i.task_id == payload.task_id)));
        let inflight = match matches {
            Some((correlation, true)) => self.inflight.remove(&correlation),
            _ => None,
        };
        let Some(inflight) = inflight else {
            // Late result after reassignment or cancellation.
            self.registry.release(&payload.endpoint_id, payload.task_id);
            debug!(
                task_id = %payload.task_id,
                endpoint = %payload.endpoint_id,
                "Ignoring stale task result"
            );
            return;
        };
        self.registry.release(&inflight.endpoint, inflight.task_id);

        let result = payload.result;
        if result.success {
            let verdict = self
                .features
                .get_mut(&inflight.feature_id)
                .and_then(|run| run.graph.as_mut())
                .and_then(|graph| {
                    graph.mark_review(inflight.task_id);
                    graph.get(inflight.task_id)
                })
                .map(|task| self.validation.validate(task, &result));
            match verdict {
                Some(report) if report.passed => {
                    self.registry.record_outcome(&inflight.endpoint, true);
                    self.complete_task(&inflight, result);
                }
                Some(report) => {
                    self.registry.record_outcome(&inflight.endpoint, false);
                    let error = format!("validation failed: {}", report.failure_summary());
                    self.task_failed(&inflight, error);
                }
                None => return,
            }
        } else {
            self.registry.record_outcome(&inflight.endpoint, false);
            let error = if result.errors.is_empty() {
                "task reported failure".to_string()
            } else {
                result.errors.join("; ")
            };
            self.task_failed(&inflight, error);
        }
        self.dispatch_all();
    }

    fn on_error(&mut self, msg: &Message) {
        let payload: ErrorPayload = match msg.payload_as() {
            Ok(p) => p,
            Err(e) => {
                warn!(sender = %msg.sender, error = %e, "Malformed error reply");
                return;
            }
        };
        let Some(inflight) = msg.correlation_id.and_then(|c| self.inflight.remove(&c)) else {
            debug!(sender = %msg.sender, error = %payload.error, "Ignoring uncorrelated error");
            return;
        };
        self.registry.release(&inflight.endpoint, inflight.task_id);
        self.registry.record_outcome(&inflight.endpoint, false);
        self.task_failed(&inflight, payload.error);
        self.dispatch_all();
    }

    // -----------------------------------------------------------------------
    // Task outcomes
    // -----------------------------------------------------------------------

    fn complete_task(&mut self, inflight: &Inflight, result: ExecutionResult) {
        let Some(run) = self.features.get_mut(&inflight.feature_id) else {
            return;
        };
        let Some(graph) = run.graph.as_mut() else {
            return;
        };
        graph.mark_completed(inflight.task_id);
        run.attempts.entry(inflight.task_id).or_default().result = Some(result);
        run.feature.progress = graph.progress();
        run.feature.updated_at = Utc::now();
        info!(
            feature_id = %inflight.feature_id,
            task_id = %inflight.task_id,
            endpoint = %inflight.endpoint,
            progress = run.feature.progress,
            "Task completed"
        );
        publish(
            &self.bus,
            ProgressEvent::of(ProgressEventKind::TaskCompleted, &run.feature).for_task(inflight.task_id),
        );
        publish(&self.bus, ProgressEvent::of(ProgressEventKind::ProgressUpdate, &run.feature));
        self.advance(inflight.feature_id);
    }

    fn task_failed(&mut self, inflight: &Inflight, error: String) {
        let max_attempts = self.config.max_task_attempts;
        let Some(run) = self.features.get_mut(&inflight.feature_id) else {
            return;
        };
        if run.feature.state.is_terminal() {
            return;
        }
        let Some(graph) = run.graph.as_mut() else {
            return;
        };
        let Some(required) = graph
            .get(inflight.task_id)
            .map(|t| t.required_capabilities.clone())
        else {
            return;
        };

        let attempts = run.attempts.entry(inflight.task_id).or_default();
        attempts.failures += 1;
        attempts.tried.insert(inflight.endpoint.clone());
        attempts.last_error = Some(error.clone());
        let within_budget = attempts.failures < max_attempts;
        let untried_left = self.registry.has_alternative(&required, &attempts.tried);

        let outcome = if within_budget || untried_left {
            graph.reset(inflight.task_id);
            let delay = self.config.retry.delay_for(attempts.failures - 1);
            attempts.not_before = Some(Instant::now() + delay);
            let alone = BTreeSet::from([inflight.endpoint.clone()]);
            attempts.excluded = (within_budget && self.registry.has_alternative(&required, &alone))
                .then(|| inflight.endpoint.clone());
            warn!(
                feature_id = %inflight.feature_id,
                task_id = %inflight.task_id,
                endpoint = %inflight.endpoint,
                attempt = attempts.failures,
                max_attempts,
                untried_agent = !within_budget,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Task failed, will retry"
            );
            FailureOutcome::Retry(delay)
        } else {
            let failures = attempts.failures;
            graph.mark_failed(inflight.task_id);
            error!(
                feature_id = %inflight.feature_id,
                task_id = %inflight.task_id,
                attempts = failures,
                error = %error,
                "Task exhausted its attempts"
            );
            FailureOutcome::Exhausted {
                errors: unresolved_errors(graph, &run.attempts),
                failures,
            }
        };

        match outcome {
            FailureOutcome::Retry(delay) => {
                publish(&self.bus, ProgressEvent::of(ProgressEventKind::ProgressUpdate, &run.feature));
                self.schedule_wake(delay);
            }
            FailureOutcome::Exhausted { errors, failures } => {
                self.fail_feature(inflight.feature_id, errors, failures);
            }
        }
    }

    /// Returns a task held by an agent that went away to `Todo` without
    /// consuming an attempt.
    fn requeue_lost(&mut self, endpoint: &str, task_id: Uuid) {
        let key = self
            .inflight
            .iter()
            .find(|(_, i)| i.task_id == task_id && i.endpoint == endpoint)
            .map(|(k, _)| *k);
        let Some(inflight) = key.and_then(|k| self.inflight.remove(&k)) else {
            return;
        };
        if let Some(run) = self.features.get_mut(&inflight.feature_id) {
            if let Some(graph) = run.graph.as_mut() {
                graph.reset(task_id);
                warn!(
                    feature_id = %inflight.feature_id,
                    task_id = %task_id,
                    endpoint = %endpoint,
                    "Reassigning task from offline agent"
                );
            }
        }
    }

    // -----------------------------------------------------------------------
    // Feature lifecycle
    // -----------------------------------------------------------------------

    fn advance(&mut self, feature_id: Uuid) {
        loop {
            let Some(run) = self.features.get_mut(&feature_id) else {
                return;
            };
            let Some(graph) = run.graph.as_ref() else {
                return;
            };
            match run.feature.state {
                FeatureState::Implementation if graph.phase_complete(TaskPhase::Implementation) => {
                    run.feature.transition(FeatureState::Review);
                    info!(feature_id = %feature_id, "Feature entered review");
                    publish(&self.bus, ProgressEvent::of(ProgressEventKind::StateChanged, &run.feature));
                }
                FeatureState::Review => {
                    let pairs: Vec<(&TaskSpecification, &ExecutionResult)> = graph
                        .tasks()
                        .filter(|t| t.phase == TaskPhase::Implementation)
                        .filter_map(|t| {
                            run.attempts
                                .get(&t.id)
                                .and_then(|a| a.result.as_ref())
                                .map(|r| (t, r))
                        })
                        .collect();
                    let verdict = self.validation.validate_all(pairs);
                    if !verdict.passed {
                        let errors = verdict
                            .reports
                            .iter()
                            .filter(|r| !r.passed)
                            .map(|r| format!("{}: {}", r.task_id, r.failure_summary()))
                            .collect();
                        self.fail_feature(feature_id, errors, 0);
                        return;
                    }
                    run.feature.transition(FeatureState::Deployment);
                    info!(feature_id = %feature_id, score = verdict.score, "Review passed");
                    publish(&self.bus, ProgressEvent::of(ProgressEventKind::StateChanged, &run.feature));
                }
                FeatureState::Deployment if graph.phase_complete(TaskPhase::Deployment) => {
                    run.feature.transition(FeatureState::Completed);
                    run.feature.progress = 100;
                    info!(feature_id = %feature_id, title = %run.feature.title, "Feature completed");
                    publish(&self.bus, ProgressEvent::of(ProgressEventKind::FeatureCompleted, &run.feature));
                    let summary = completion_entry(&run.feature, graph);
                    self.store_outcome(summary);
                    return;
                }
                _ => return,
            }
        }
    }

    fn fail_feature(&mut self, feature_id: Uuid, errors: Vec<String>, exhausted_retries: u32) {
        let Some(run) = self.features.get_mut(&feature_id) else {
            return;
        };
        if !run.feature.transition(FeatureState::Failed) {
            return;
        }
        run.feature.errors = errors;
        run.feature.exhausted_retries = exhausted_retries;
        error!(
            feature_id = %feature_id,
            errors = ?run.feature.errors,
            exhausted_retries,
            "Feature failed"
        );
        publish(&self.bus, ProgressEvent::of(ProgressEventKind::FeatureFailed, &run.feature));
        let entry = failure_entry(&run.feature);
        self.abort_inflight(feature_id);
        self.store_outcome(entry);
    }

    /// Sends `cancel_task` for every dispatched task of the feature and
    /// forgets their correlations, so late results are ignored.
    fn abort_inflight(&mut self, feature_id: Uuid) {
        let keys: Vec<Uuid> = self
            .inflight
            .iter()
            .filter(|(_, i)| i.feature_id == feature_id)
            .map(|(k, _)| *k)
            .collect();
        for key in keys {
            let Some(inflight) = self.inflight.remove(&key) else {
                continue;
            };
            let payload = CoordinationPayload::CancelTask {
                feature_id,
                task_id: inflight.task_id,
            };
            let sent = Message::with_payload(
                MessageKind::Coordination,
                COORDINATOR_ENDPOINT,
                &inflight.endpoint,
                &payload,
            )
            .and_then(|msg| self.bus.send(msg));
            match sent {
                Ok(_) => debug!(task_id = %inflight.task_id, endpoint = %inflight.endpoint, "Sent cancel_task"),
                Err(e) => debug!(
                    task_id = %inflight.task_id,
                    endpoint = %inflight.endpoint,
                    error = %e,
                    "Could not deliver cancel_task"
                ),
            }
        }
    }

    /// Fails every live feature with an outstanding task that no single live
    /// agent can cover.
    fn check_capability_loss(&mut self) {
        let registry = &self.registry;
        let lost: Vec<(Uuid, String)> = self
            .features
            .values()
            .filter(|r| !r.feature.state.is_terminal())
            .filter_map(|r| {
                let cap = r
                    .graph
                    .as_ref()?
                    .outstanding()
                    .find_map(|t| registry.uncovered_capability(&t.required_capabilities))?;
                Some((r.feature.id, cap))
            })
            .collect();
        for (feature_id, cap) in lost {
            let error = FoundryError::UnsatisfiableCapability(cap).to_string();
            self.fail_feature(feature_id, vec![error], 0);
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    fn dispatch_all(&mut self) {
        let mut order: Vec<(Priority, DateTime<Utc>, Uuid)> = self
            .features
            .values()
            .filter(|r| {
                matches!(
                    r.feature.state,
                    FeatureState::Implementation | FeatureState::Deployment
                )
            })
            .map(|r| (r.feature.priority, r.feature.created_at, r.feature.id))
            .collect();
        order.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let now = Instant::now();
        let mut unreachable = false;
        for (_, _, feature_id) in order {
            unreachable |= self.dispatch_feature(feature_id, now);
        }
        if unreachable {
            self.check_capability_loss();
        }
    }

    /// Dispatches the feature's ready tasks. Returns `true` if an agent turned
    /// out to be unreachable.
    fn dispatch_feature(&mut self, feature_id: Uuid, now: Instant) -> bool {
        let max_attempts = self.config.max_task_attempts;
        let Some(FeatureRun {
            feature,
            graph: Some(graph),
            attempts,
        }) = self.features.get_mut(&feature_id)
        else {
            return false;
        };
        let phase = match feature.state {
            FeatureState::Implementation => TaskPhase::Implementation,
            FeatureState::Deployment => TaskPhase::Deployment,
            _ => return false,
        };

        let mut unreachable = false;
        let mut stranded = None;
        let ready: Vec<TaskSpecification> = graph.ready(phase).into_iter().cloned().collect();
        for task in ready {
            let state = attempts.entry(task.id).or_default();
            if state.not_before.is_some_and(|t| t > now) {
                continue;
            }
            let skip = if state.failures >= max_attempts {
                if !self.registry.has_alternative(&task.required_capabilities, &state.tried) {
                    stranded = Some((task.id, state.failures));
                    break;
                }
                state.tried.clone()
            } else {
                let mut skip: BTreeSet<String> = state.excluded.iter().cloned().collect();
                if !self.registry.has_alternative(&task.required_capabilities, &skip) {
                    state.excluded = None;
                    skip.clear();
                }
                skip
            };
            let Some(endpoint) =
                self.registry
                    .select(&task.required_capabilities, &skip, self.config.selection)
            else {
                continue;
            };

            let correlation = Uuid::new_v4();
            let attempt = state.failures + 1;
            let mut assigned = task.clone();
            assigned.status = TaskStatus::InProgress;
            assigned.assigned_endpoint = Some(endpoint.clone());
            let sent = Message::with_payload(
                MessageKind::TaskAssignment,
                COORDINATOR_ENDPOINT,
                &endpoint,
                &TaskAssignment {
                    task: assigned,
                    attempt,
                },
            )
            .map(|msg| msg.correlated(correlation).with_priority(feature.priority))
            .and_then(|msg| self.bus.send(msg));

            match sent {
                Ok(_) => {
                    graph.mark_in_progress(task.id, &endpoint);
                    self.registry.reserve(&endpoint, task.id);
                    state.excluded = None;
                    state.not_before = None;
                    info!(
                        feature_id = %feature_id,
                        task_id = %task.id,
                        title = %task.title,
                        endpoint = %endpoint,
                        attempt,
                        "Task dispatched"
                    );
                    self.inflight.insert(
                        correlation,
                        Inflight {
                            feature_id,
                            task_id: task.id,
                            endpoint,
                        },
                    );
                }
                Err(e @ FoundryError::RecipientUnavailable(_)) => {
                    warn!(endpoint = %endpoint, error = %e, "Agent unreachable, marking offline");
                    self.registry.mark_offline(&endpoint);
                    unreachable = true;
                }
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "Failed to send assignment");
                }
            }
        }

        // Budget spent and every capable agent left has already failed it.
        if let Some((task_id, failures)) = stranded {
            graph.mark_failed(task_id);
            error!(
                feature_id = %feature_id,
                task_id = %task_id,
                attempts = failures,
                "Task exhausted its attempts"
            );
            let errors = unresolved_errors(graph, attempts);
            self.fail_feature(feature_id, errors, failures);
        }
        unreachable
    }

    fn sweep(&mut self) {
        let expired = self
            .registry
            .expire(Instant::now(), self.config.heartbeat_timeout());
        if !expired.is_empty() {
            for (endpoint, task) in &expired {
                let reason = FoundryError::HeartbeatTimeout(endpoint.clone());
                warn!(endpoint = %endpoint, error = %reason, "Agent missed heartbeats, marking offline");
                if let Some(task_id) = task {
                    self.requeue_lost(endpoint, *task_id);
                }
            }
            self.check_capability_loss();
        }
        self.dispatch_all();
    }

    fn schedule_wake(&self, delay: Duration) {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::Wake).await;
            }
        });
    }

    fn store_outcome(&self, entry: KnowledgeEntry) {
        if !self.config.store_outcomes {
            return;
        }
        let Some(store) = self.knowledge.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = store.store(entry).await {
                warn!(error = %e, "Could not record feature outcome");
            }
        });
    }
}

fn publish(bus: &MessageBus, event: ProgressEvent) {
    let topic = feature_topic(&event.feature_id);
    match Message::with_payload(MessageKind::Status, COORDINATOR_ENDPOINT, &topic, &event) {
        Ok(msg) => {
            bus.publish(&topic, msg);
        }
        Err(e) => error!(feature_id = %event.feature_id, error = %e, "Failed to encode progress event"),
    }
}

/// `"{title}: {last error}"` for every unfinished task that has failed.
fn unresolved_errors(graph: &TaskGraph, attempts: &HashMap<Uuid, TaskAttempts>) -> Vec<String> {
    graph
        .outstanding()
        .filter_map(|t| {
            attempts
                .get(&t.id)
                .and_then(|a| a.last_error.as_ref())
                .map(|e| format!("{}: {e}", t.title))
        })
        .collect()
}

fn completion_entry(feature: &Feature, graph: &TaskGraph) -> KnowledgeEntry {
    let mut content = format!("Feature '{}' completed.\n{}\n", feature.title, feature.description);
    for task in graph.tasks() {
        content.push_str(&format!("- {}\n", task.title));
    }
    KnowledgeEntry::new(content, SourceType::Pattern)
        .with_tags(["feature", "completed"])
        .with_metadata("feature_id", serde_json::json!(feature.id))
        .with_metadata("tasks", serde_json::json!(graph.total_count()))
}

fn failure_entry(feature: &Feature) -> KnowledgeEntry {
    let content = format!(
        "Feature '{}' failed.\n{}\n{}",
        feature.title,
        feature.description,
        feature.errors.join("\n")
    );
    KnowledgeEntry::new(content, SourceType::Failure)
        .with_tags(["feature", "failed"])
        .with_metadata("feature_id", serde_json::json!(feature.id))
        .with_metadata("state", serde_json::json!(feature.state))
}
