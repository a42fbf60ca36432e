use crate::config::{ContextConfig, RuntimeConfig};
use crate::context::ContextInjector;
use crate::executor::TaskExecutor;
use chrono::Utc;
use foundry_bus::{Deduplicator, MessageBus, Subscription};
use foundry_core::topics::{agent_topic, COORDINATION, COORDINATOR_ENDPOINT};
use foundry_core::{
    AgentInfo, AgentStatus, CoordinationPayload, ErrorPayload, ExecutionResult, FoundryResult,
    Message, MessageKind, TaskAssignment, TaskResultPayload, TaskSpecification,
};
use foundry_knowledge::{KnowledgeEntry, KnowledgeStore, SourceType};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

struct CurrentTask {
    task_id: Uuid,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

struct Running {
    token: CancellationToken,
    event_loop: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

struct Shared {
    bus: MessageBus,
    info: RwLock<AgentInfo>,
    executor: Arc<dyn TaskExecutor>,
    injector: ContextInjector,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    config: RuntimeConfig,
    dedup: Mutex<Deduplicator>,
    current: Mutex<Option<CurrentTask>>,
}

/// Hosts one agent endpoint on the message bus.
///
/// The runtime owns the agent's state machine (`Idle -> Busy -> Idle`, any
/// state to `Offline` on stop), a heartbeat loop, and an event loop that
/// executes TASK_ASSIGNMENT messages through its [`TaskExecutor`].
pub struct AgentRuntime {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

/// Assembles an [`AgentRuntime`].
pub struct AgentRuntimeBuilder {
    info: AgentInfo,
    bus: MessageBus,
    executor: Arc<dyn TaskExecutor>,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    context: ContextConfig,
    config: RuntimeConfig,
}

impl AgentRuntimeBuilder {
    /// Enriches tasks from `store` and records outcomes into it.
    pub fn knowledge(mut self, store: Arc<dyn KnowledgeStore>, context: ContextConfig) -> Self {
        self.knowledge = Some(store);
        self.context = context;
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds a stopped runtime.
    pub fn build(self) -> AgentRuntime {
        let mut info = self.info;
        info.status = AgentStatus::Offline;
        info.current_task_id = None;
        let injector = match &self.knowledge {
            Some(store) => ContextInjector::new(store.clone(), self.context),
            None => ContextInjector::disabled(),
        };
        let dedup = Deduplicator::new(self.bus.config().dedup_capacity);
        AgentRuntime {
            shared: Arc::new(Shared {
                bus: self.bus,
                info: RwLock::new(info),
                executor: self.executor,
                injector,
                knowledge: self.knowledge,
                config: self.config,
                dedup: Mutex::new(dedup),
                current: Mutex::new(None),
            }),
            running: Mutex::new(None),
        }
    }
}

impl AgentRuntime {
    /// Starts assembling a runtime for `info` on `bus`.
    pub fn builder(
        info: AgentInfo,
        bus: MessageBus,
        executor: Arc<dyn TaskExecutor>,
    ) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder {
            info,
            bus,
            executor,
            knowledge: None,
            context: ContextConfig::default(),
            config: RuntimeConfig::default(),
        }
    }

    pub fn endpoint_id(&self) -> String {
        self.shared.info.read().endpoint_id.clone()
    }

    pub fn status(&self) -> AgentStatus {
        self.shared.info.read().status
    }

    /// Snapshot of the agent's self-description.
    pub fn info(&self) -> AgentInfo {
        self.shared.info.read().clone()
    }

    /// Whether the loops are running.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.token.is_cancelled())
    }

    /// Subscribes to the agent's endpoint and the coordination topic,
    /// announces the agent, and starts the heartbeat and event loops.
    ///
    /// Calling `start` on a running agent is a no-op. An agent that went
    /// offline (explicitly or by self-detection) can be started again.
    pub fn start(&self) -> FoundryResult<()> {
        let mut running = self.running.lock();
        if let Some(r) = running.as_ref() {
            if !r.token.is_cancelled() {
                return Ok(());
            }
        }

        let endpoint = self.endpoint_id();
        let direct = self.shared.bus.subscribe(agent_topic(&endpoint));
        let coordination = self.shared.bus.subscribe(COORDINATION);

        {
            let mut info = self.shared.info.write();
            info.status = AgentStatus::Idle;
            info.current_task_id = None;
        }
        self.shared.publish_status(MessageKind::Status);

        let token = CancellationToken::new();
        let event_loop = tokio::spawn(event_loop(
            self.shared.clone(),
            direct,
            coordination,
            token.clone(),
        ));
        let heartbeat = tokio::spawn(heartbeat_loop(self.shared.clone(), token.clone()));
        *running = Some(Running {
            token,
            event_loop,
            heartbeat,
        });

        info!(endpoint = %endpoint, "Agent started");
        Ok(())
    }

    /// Cancels both loops and any in-flight task, waits for them to finish,
    /// and announces the agent as `Offline`.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };
        running.token.cancel();
        let _ = running.event_loop.await;
        let _ = running.heartbeat.await;

        let in_flight = self
            .shared
            .current
            .lock()
            .as_mut()
            .and_then(|c| {
                c.cancel.cancel();
                c.handle.take()
            });
        if let Some(handle) = in_flight {
            let _ = handle.await;
        }

        self.shared.go_offline();
        info!(endpoint = %self.endpoint_id(), "Agent stopped");
    }
}

impl Shared {
    fn endpoint(&self) -> String {
        self.info.read().endpoint_id.clone()
    }

    fn role(&self) -> String {
        self.info.read().role.clone()
    }

    /// Publishes the current self-description to the coordinator and
    /// returns how many subscribers heard it.
    fn publish_status(&self, kind: MessageKind) -> usize {
        let info = {
            let mut info = self.info.write();
            info.last_heartbeat = Utc::now();
            info.clone()
        };
        match Message::with_payload(kind, &info.endpoint_id, COORDINATOR_ENDPOINT, &info) {
            Ok(msg) => self.bus.publish(&agent_topic(COORDINATOR_ENDPOINT), msg),
            Err(e) => {
                error!(endpoint = %info.endpoint_id, error = %e, "Failed to encode status");
                0
            }
        }
    }

    fn set_status(&self, status: AgentStatus, task: Option<Uuid>) {
        {
            let mut info = self.info.write();
            info.status = status;
            info.current_task_id = task;
        }
        self.publish_status(MessageKind::Status);
    }

    fn go_offline(&self) {
        self.set_status(AgentStatus::Offline, None);
    }

    fn reply_error(&self, original: &Message, error: String) {
        let payload = ErrorPayload {
            error,
            original_message_id: original.id,
        };
        let endpoint = self.endpoint();
        match Message::with_payload(MessageKind::Error, &endpoint, &original.sender, &payload) {
            Ok(msg) => {
                let msg = msg.correlated(original.correlation_id.unwrap_or(original.id));
                if let Err(e) = self.bus.send(msg) {
                    warn!(endpoint = %endpoint, error = %e, "Could not deliver error reply");
                }
            }
            Err(e) => error!(endpoint = %endpoint, error = %e, "Failed to encode error reply"),
        }
    }

    fn handle_direct(self: &Arc<Self>, msg: Message, token: &CancellationToken) {
        if !self.dedup.lock().first_seen(msg.id) {
            debug!(message_id = %msg.id, "Duplicate message ignored");
            return;
        }
        match msg.kind {
            MessageKind::TaskAssignment => self.accept_assignment(msg, token),
            MessageKind::Coordination => self.handle_coordination(&msg),
            other => debug!(kind = %other, "Ignoring message"),
        }
    }

    fn handle_coordination(&self, msg: &Message) {
        let Ok(payload) = msg.payload_as::<CoordinationPayload>() else {
            debug!(message_id = %msg.id, "Ignoring unrecognised coordination payload");
            return;
        };
        match payload {
            CoordinationPayload::CancelTask { task_id, .. } => {
                let current = self.current.lock();
                if let Some(c) = current.as_ref().filter(|c| c.task_id == task_id) {
                    info!(endpoint = %self.endpoint(), task_id = %task_id, "Cancelling task");
                    c.cancel.cancel();
                }
            }
        }
    }

    fn accept_assignment(self: &Arc<Self>, msg: Message, token: &CancellationToken) {
        let assignment: TaskAssignment = match msg.payload_as() {
            Ok(a) => a,
            Err(e) => {
                warn!(message_id = %msg.id, error = %e, "Malformed task assignment");
                self.reply_error(&msg, format!("malformed task assignment: {e}"));
                return;
            }
        };

        let mut current = self.current.lock();
        if current.is_some() || self.info.read().status != AgentStatus::Idle {
            drop(current);
            warn!(endpoint = %self.endpoint(), task_id = %assignment.task.id, "Busy, rejecting assignment");
            self.reply_error(&msg, format!("agent {} is busy", self.endpoint()));
            return;
        }

        let task_id = assignment.task.id;
        let cancel = token.child_token();
        self.set_status(AgentStatus::Busy, Some(task_id));
        info!(
            endpoint = %self.endpoint(),
            task_id = %task_id,
            attempt = assignment.attempt,
            "Executing task"
        );
        let handle = tokio::spawn(execute(self.clone(), msg, assignment, cancel.clone()));
        *current = Some(CurrentTask {
            task_id,
            cancel,
            handle: Some(handle),
        });
    }

    async fn record_outcome(&self, task: &TaskSpecification, result: &ExecutionResult) {
        if !self.config.store_outcomes {
            return;
        }
        let Some(store) = &self.knowledge else {
            return;
        };
        let (source, verdict, detail) = if result.success {
            (SourceType::Pattern, "succeeded", result.text())
        } else {
            (SourceType::Failure, "failed", result.errors.join("; "))
        };
        let content = format!(
            "Task '{}' {verdict}.\n{}\n{}",
            task.title, task.description, detail
        );
        let entry = KnowledgeEntry::new(content, source)
            .with_tags([self.role(), "execution_outcome".to_string()])
            .with_metadata("task_id", serde_json::json!(task.id))
            .with_metadata("feature_id", serde_json::json!(task.feature_id))
            .with_metadata("endpoint_id", serde_json::json!(self.endpoint()));

        let timeout = self.injector.config().query_timeout();
        match tokio::time::timeout(timeout, store.store(entry)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(task_id = %task.id, error = %e, "Failed to record task outcome"),
            Err(_) => warn!(task_id = %task.id, "Timed out recording task outcome"),
        }
    }
}

async fn execute(
    shared: Arc<Shared>,
    msg: Message,
    assignment: TaskAssignment,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let task = assignment.task;
    let enriched = shared.injector.enrich(task.clone()).await;

    let executor = shared.executor.clone();
    let run = tokio::spawn(async move { executor.run(&enriched).await });
    let abort = run.abort_handle();

    let result = tokio::select! {
        _ = cancel.cancelled() => {
            abort.abort();
            ExecutionResult::failure(["cancelled"])
        }
        outcome = tokio::time::timeout(shared.config.task_timeout(), run) => match outcome {
            Err(_) => {
                abort.abort();
                ExecutionResult::failure(["execution timeout"])
            }
            Ok(Err(join_err)) => {
                error!(task_id = %task.id, error = %join_err, "Executor panicked");
                ExecutionResult::failure([format!("executor panicked: {join_err}")])
            }
            Ok(Ok(Err(e))) => ExecutionResult::failure([e.to_string()]),
            Ok(Ok(Ok(result))) => result,
        },
    };
    let result = if result.execution_time_ms == 0 {
        result.with_execution_time(started.elapsed().as_millis() as u64)
    } else {
        result
    };

    shared.record_outcome(&task, &result).await;

    // Release BUSY before replying so the coordinator can dispatch the
    // next task as soon as it sees the result.
    {
        let mut current = shared.current.lock();
        if current.as_ref().is_some_and(|c| c.task_id == task.id) {
            *current = None;
        }
    }
    let offline = shared.info.read().status == AgentStatus::Offline;
    if !offline {
        shared.set_status(AgentStatus::Idle, None);
    }

    let endpoint = shared.endpoint();
    let payload = TaskResultPayload {
        task_id: task.id,
        feature_id: task.feature_id,
        endpoint_id: endpoint.clone(),
        result,
    };
    let success = payload.result.success;
    match Message::with_payload(MessageKind::TaskResult, &endpoint, &msg.sender, &payload) {
        Ok(reply) => {
            let reply = reply.correlated(msg.correlation_id.unwrap_or(msg.id));
            if let Err(e) = shared
                .bus
                .send_with_retry(reply, &shared.config.result_retry)
                .await
            {
                error!(task_id = %task.id, error = %e, "Failed to deliver task result");
            }
        }
        Err(e) => error!(task_id = %task.id, error = %e, "Failed to encode task result"),
    }
    info!(endpoint = %endpoint, task_id = %task.id, success, "Task finished");
}

async fn event_loop(
    shared: Arc<Shared>,
    mut direct: Subscription,
    mut coordination: Subscription,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            msg = direct.recv() => match msg {
                Some(msg) => shared.handle_direct(msg, &token),
                None => break,
            },
            msg = coordination.recv() => match msg {
                Some(msg) if msg.kind == MessageKind::Coordination => {
                    if shared.dedup.lock().first_seen(msg.id) {
                        shared.handle_coordination(&msg);
                    }
                }
                Some(_) => {}
                None => break,
            },
        }
    }
    debug!(endpoint = %shared.endpoint(), "Event loop exited");
}

async fn heartbeat_loop(shared: Arc<Shared>, token: CancellationToken) {
    let interval = shared.config.heartbeat_interval();
    let threshold = shared.config.offline_after_unheard_beats;
    let mut unheard = 0u32;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                let heard_by = shared.publish_status(MessageKind::Heartbeat);
                if heard_by > 0 {
                    unheard = 0;
                    continue;
                }
                unheard += 1;
                if threshold > 0 && unheard >= threshold {
                    warn!(
                        endpoint = %shared.endpoint(),
                        unheard,
                        "No coordinator heard recent heartbeats, going offline"
                    );
                    let in_flight = shared.current.lock().as_ref().map(|c| c.cancel.clone());
                    if let Some(cancel) = in_flight {
                        cancel.cancel();
                    }
                    shared.go_offline();
                    token.cancel();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::executor::{PromptExecutor, TemplateGenerator};
    use crate::roles::AgentRole;
    use async_trait::async_trait;
    use foundry_core::EnrichedTask;
    use std::time::Duration;

    struct SleepyExecutor(Duration);

    #[async_trait]
    impl TaskExecutor for SleepyExecutor {
        async fn run(&self, _task: &EnrichedTask) -> FoundryResult<ExecutionResult> {
            tokio::time::sleep(self.0).await;
            Ok(ExecutionResult::success(serde_json::json!("done")))
        }
    }

    struct PanickingExecutor;

    #[async_trait]
    impl TaskExecutor for PanickingExecutor {
        async fn run(&self, _task: &EnrichedTask) -> FoundryResult<ExecutionResult> {
            panic!("executor bug");
        }
    }

    fn fast_config() -> RuntimeConfig {
        RuntimeConfig {
            heartbeat_interval_ms: 20,
            task_timeout_ms: 5_000,
            result_retry: foundry_core::RetryPolicy::new(2, 5),
            ..RuntimeConfig::default()
        }
    }

    fn agent(bus: &MessageBus, endpoint: &str, executor: Arc<dyn TaskExecutor>) -> AgentRuntime {
        let info = AgentInfo::new(endpoint, "coder", AgentRole::Coder.default_capabilities());
        AgentRuntime::builder(info, bus.clone(), executor)
            .config(fast_config())
            .build()
    }

    fn assignment(to: &str) -> (Message, Uuid) {
        let task = TaskSpecification::new(Uuid::new_v4(), "Login", "Add login").requires("coding");
        let id = task.id;
        let corr = Uuid::new_v4();
        let msg = Message::with_payload(
            MessageKind::TaskAssignment,
            COORDINATOR_ENDPOINT,
            to,
            &TaskAssignment { task, attempt: 1 },
        )
        .unwrap()
        .correlated(corr);
        (msg, id)
    }

    async fn next_of_kind(sub: &mut Subscription, kind: MessageKind) -> Message {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let msg = sub.recv().await.unwrap();
                if msg.kind == kind {
                    return msg;
                }
            }
        })
        .await
        .expect("timed out waiting for message")
    }

    #[tokio::test]
    async fn test_start_announces_and_heartbeats() {
        let bus = MessageBus::new();
        let mut coord = bus.subscribe(agent_topic(COORDINATOR_ENDPOINT));
        let rt = agent(&bus, "coder-1", Arc::new(SleepyExecutor(Duration::ZERO)));
        assert_eq!(rt.status(), AgentStatus::Offline);

        rt.start().unwrap();
        let status = next_of_kind(&mut coord, MessageKind::Status).await;
        let info: AgentInfo = status.payload_as().unwrap();
        assert_eq!(info.status, AgentStatus::Idle);
        assert!(info.capabilities.contains("coding"));

        let beat = next_of_kind(&mut coord, MessageKind::Heartbeat).await;
        assert_eq!(beat.sender, "coder-1");
        rt.stop().await;
        assert_eq!(rt.status(), AgentStatus::Offline);
        assert!(!bus.is_reachable("coder-1"));
    }

    #[tokio::test]
    async fn test_assignment_produces_correlated_result() {
        let bus = MessageBus::new();
        let mut coord = bus.subscribe(agent_topic(COORDINATOR_ENDPOINT));
        let executor = PromptExecutor::new(AgentRole::Coder, Arc::new(TemplateGenerator));
        let rt = agent(&bus, "coder-1", Arc::new(executor));
        rt.start().unwrap();

        let (msg, task_id) = assignment("coder-1");
        let corr = msg.correlation_id;
        bus.send(msg).unwrap();

        let reply = next_of_kind(&mut coord, MessageKind::TaskResult).await;
        assert_eq!(reply.correlation_id, corr);
        let payload: TaskResultPayload = reply.payload_as().unwrap();
        assert_eq!(payload.task_id, task_id);
        assert!(payload.result.success);
        rt.stop().await;
    }

    #[tokio::test]
    async fn test_duplicate_assignment_runs_once() {
        let bus = MessageBus::new();
        let mut coord = bus.subscribe(agent_topic(COORDINATOR_ENDPOINT));
        let rt = agent(&bus, "coder-1", Arc::new(SleepyExecutor(Duration::ZERO)));
        rt.start().unwrap();

        let (msg, _) = assignment("coder-1");
        bus.send(msg.clone()).unwrap();
        bus.send(msg.redelivery().unwrap()).unwrap();

        next_of_kind(&mut coord, MessageKind::TaskResult).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let extra = std::iter::from_fn(|| coord.try_recv())
            .filter(|m| matches!(m.kind, MessageKind::TaskResult | MessageKind::Error))
            .count();
        assert_eq!(extra, 0);
        rt.stop().await;
    }

    #[tokio::test]
    async fn test_busy_agent_rejects_second_assignment() {
        let bus = MessageBus::new();
        let mut coord = bus.subscribe(agent_topic(COORDINATOR_ENDPOINT));
        let rt = agent(&bus, "coder-1", Arc::new(SleepyExecutor(Duration::from_millis(300))));
        rt.start().unwrap();

        let (first, _) = assignment("coder-1");
        let (second, _) = assignment("coder-1");
        let second_corr = second.correlation_id;
        bus.send(first).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(rt.status(), AgentStatus::Busy);
        bus.send(second).unwrap();

        let err = next_of_kind(&mut coord, MessageKind::Error).await;
        assert_eq!(err.correlation_id, second_corr);
        next_of_kind(&mut coord, MessageKind::TaskResult).await;
        rt.stop().await;
    }

    #[tokio::test]
    async fn test_timeout_becomes_failure_and_releases_busy() {
        let bus = MessageBus::new();
        let mut coord = bus.subscribe(agent_topic(COORDINATOR_ENDPOINT));
        let info = AgentInfo::new("slow", "coder", AgentRole::Coder.default_capabilities());
        let rt = AgentRuntime::builder(
            info,
            bus.clone(),
            Arc::new(SleepyExecutor(Duration::from_secs(60))),
        )
        .config(RuntimeConfig {
            task_timeout_ms: 50,
            ..fast_config()
        })
        .build();
        rt.start().unwrap();

        let (msg, _) = assignment("slow");
        bus.send(msg).unwrap();
        let reply = next_of_kind(&mut coord, MessageKind::TaskResult).await;
        let payload: TaskResultPayload = reply.payload_as().unwrap();
        assert!(!payload.result.success);
        assert_eq!(payload.result.errors, vec!["execution timeout".to_string()]);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rt.status(), AgentStatus::Idle);
        rt.stop().await;
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let bus = MessageBus::new();
        let mut coord = bus.subscribe(agent_topic(COORDINATOR_ENDPOINT));
        let rt = agent(&bus, "buggy", Arc::new(PanickingExecutor));
        rt.start().unwrap();

        let (msg, _) = assignment("buggy");
        bus.send(msg).unwrap();
        let reply = next_of_kind(&mut coord, MessageKind::TaskResult).await;
        let payload: TaskResultPayload = reply.payload_as().unwrap();
        assert!(!payload.result.success);
        assert!(payload.result.errors[0].contains("panicked"));
        assert!(rt.is_running());
        rt.stop().await;
    }

    #[tokio::test]
    async fn test_cancel_task_emits_cancelled_failure() {
        let bus = MessageBus::new();
        let mut coord = bus.subscribe(agent_topic(COORDINATOR_ENDPOINT));
        let rt = agent(&bus, "coder-1", Arc::new(SleepyExecutor(Duration::from_secs(60))));
        rt.start().unwrap();

        let (msg, task_id) = assignment("coder-1");
        bus.send(msg).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let cancel = Message::with_payload(
            MessageKind::Coordination,
            COORDINATOR_ENDPOINT,
            COORDINATION,
            &CoordinationPayload::CancelTask {
                feature_id: Uuid::new_v4(),
                task_id,
            },
        )
        .unwrap();
        bus.broadcast(cancel);

        let reply = next_of_kind(&mut coord, MessageKind::TaskResult).await;
        let payload: TaskResultPayload = reply.payload_as().unwrap();
        assert_eq!(payload.result.errors, vec!["cancelled".to_string()]);
        rt.stop().await;
    }

    #[tokio::test]
    async fn test_self_detection_goes_offline_without_listeners() {
        let bus = MessageBus::new();
        let info = AgentInfo::new("lonely", "coder", AgentRole::Coder.default_capabilities());
        let rt = AgentRuntime::builder(info, bus.clone(), Arc::new(SleepyExecutor(Duration::ZERO)))
            .config(RuntimeConfig {
                heartbeat_interval_ms: 10,
                offline_after_unheard_beats: 2,
                ..fast_config()
            })
            .build();
        rt.start().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(rt.status(), AgentStatus::Offline);
        assert!(!rt.is_running());

        // Restartable after self-detected offline.
        let _listener = bus.subscribe(agent_topic(COORDINATOR_ENDPOINT));
        rt.start().unwrap();
        assert_eq!(rt.status(), AgentStatus::Idle);
        rt.stop().await;
    }
}
