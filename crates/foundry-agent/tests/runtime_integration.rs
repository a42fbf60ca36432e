#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the foundry-agent crate.
//!
//! Drives real runtimes over an in-process bus with a shared knowledge store:
//! outcome recording, context injection, stop/restart, and failure capture.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use foundry_agent::{
    AgentRole, AgentRuntime, ContextConfig, ContextInjector, RuntimeConfig, TaskExecutor,
};
use foundry_bus::{MessageBus, Subscription};
use foundry_core::topics::{agent_topic, COORDINATOR_ENDPOINT};
use foundry_core::{
    AgentInfo, AgentStatus, EnrichedTask, ExecutionResult, FoundryError, FoundryResult, Message,
    MessageKind, TaskAssignment, TaskResultPayload, TaskSpecification,
};
use foundry_knowledge::{
    InMemoryKnowledgeStore, KnowledgeEntry, KnowledgeFilter, KnowledgeStore, LocalEmbedding,
    SourceType,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Records every task it sees and answers with a fixed outcome.
struct RecordingExecutor {
    seen: Mutex<Vec<EnrichedTask>>,
    succeed: bool,
}

impl RecordingExecutor {
    fn new(succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            succeed,
        })
    }
}

#[async_trait]
impl TaskExecutor for RecordingExecutor {
    async fn run(&self, task: &EnrichedTask) -> FoundryResult<ExecutionResult> {
        self.seen.lock().push(task.clone());
        if self.succeed {
            Ok(ExecutionResult::success(serde_json::json!("implemented the handler")))
        } else {
            Err(FoundryError::Execution("compile error in handler".into()))
        }
    }
}

fn config() -> RuntimeConfig {
    RuntimeConfig {
        heartbeat_interval_ms: 50,
        task_timeout_ms: 5_000,
        result_retry: foundry_core::RetryPolicy::new(2, 5),
        ..RuntimeConfig::default()
    }
}

fn store() -> Arc<InMemoryKnowledgeStore> {
    Arc::new(InMemoryKnowledgeStore::new(Arc::new(LocalEmbedding::default())))
}

fn task() -> TaskSpecification {
    TaskSpecification::new(Uuid::new_v4(), "Session handler", "Implement the session handler")
        .requires("coding")
}

fn assign(bus: &MessageBus, to: &str, task: TaskSpecification) {
    let msg = Message::with_payload(
        MessageKind::TaskAssignment,
        COORDINATOR_ENDPOINT,
        to,
        &TaskAssignment { task, attempt: 1 },
    )
    .unwrap()
    .correlated(Uuid::new_v4());
    bus.send(msg).unwrap();
}

async fn next_result(sub: &mut Subscription) -> TaskResultPayload {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = sub.recv().await.unwrap();
            if msg.kind == MessageKind::TaskResult {
                return msg.payload_as::<TaskResultPayload>().unwrap();
            }
        }
    })
    .await
    .expect("no task result")
}

// ---------------------------------------------------------------------------
// 1. Outcome recording
// ---------------------------------------------------------------------------

#[tokio::test]
async fn success_is_recorded_as_pattern() {
    let bus = MessageBus::new();
    let mut coord = bus.subscribe(agent_topic(COORDINATOR_ENDPOINT));
    let kb = store();
    let info = AgentInfo::new("coder-1", "coder", AgentRole::Coder.default_capabilities());
    let rt = AgentRuntime::builder(info, bus.clone(), RecordingExecutor::new(true))
        .knowledge(kb.clone(), ContextConfig::default())
        .config(config())
        .build();
    rt.start().unwrap();

    assign(&bus, "coder-1", task());
    assert!(next_result(&mut coord).await.result.success);

    let hits = kb
        .query(
            "Session handler",
            5,
            &KnowledgeFilter::any().tags(["execution_outcome"]),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.source_type, SourceType::Pattern);
    assert!(hits[0].entry.tags.contains(&"coder".to_string()));
    rt.stop().await;
}

#[tokio::test]
async fn executor_error_is_recorded_as_failure() {
    let bus = MessageBus::new();
    let mut coord = bus.subscribe(agent_topic(COORDINATOR_ENDPOINT));
    let kb = store();
    let info = AgentInfo::new("coder-2", "coder", AgentRole::Coder.default_capabilities());
    let rt = AgentRuntime::builder(info, bus.clone(), RecordingExecutor::new(false))
        .knowledge(kb.clone(), ContextConfig::default())
        .config(config())
        .build();
    rt.start().unwrap();

    assign(&bus, "coder-2", task());
    let payload = next_result(&mut coord).await;
    assert!(!payload.result.success);
    assert!(payload.result.errors[0].contains("compile error"));

    let stats = kb.stats().await.unwrap();
    assert_eq!(stats.by_source_type.get(&SourceType::Failure), Some(&1));
    rt.stop().await;
}

// ---------------------------------------------------------------------------
// 2. Context injection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn relevant_knowledge_reaches_the_executor() {
    let bus = MessageBus::new();
    let mut coord = bus.subscribe(agent_topic(COORDINATOR_ENDPOINT));
    let kb = store();
    let t = task();
    kb.store(KnowledgeEntry::new(
        ContextInjector::query_for(&t),
        SourceType::Documentation,
    ))
    .await
    .unwrap();

    let executor = RecordingExecutor::new(true);
    let info = AgentInfo::new("coder-3", "coder", AgentRole::Coder.default_capabilities());
    let rt = AgentRuntime::builder(info, bus.clone(), executor.clone())
        .knowledge(kb, ContextConfig::default())
        .config(config())
        .build();
    rt.start().unwrap();

    assign(&bus, "coder-3", t);
    next_result(&mut coord).await;

    let seen = executor.seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].context_sources, 1);
    assert!(seen[0].context.starts_with("--- DOCUMENTATION ---"));
    drop(seen);
    rt.stop().await;
}

// ---------------------------------------------------------------------------
// 3. Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_then_start_resumes_service() {
    let bus = MessageBus::new();
    let mut coord = bus.subscribe(agent_topic(COORDINATOR_ENDPOINT));
    let info = AgentInfo::new("coder-4", "coder", AgentRole::Coder.default_capabilities());
    let rt = AgentRuntime::builder(info, bus.clone(), RecordingExecutor::new(true))
        .config(config())
        .build();

    rt.start().unwrap();
    rt.stop().await;
    assert_eq!(rt.status(), AgentStatus::Offline);
    assert!(bus.send(Message::new(
        MessageKind::TaskAssignment,
        COORDINATOR_ENDPOINT,
        "coder-4",
        serde_json::json!({}),
    ))
    .is_err());

    rt.start().unwrap();
    assert_eq!(rt.status(), AgentStatus::Idle);
    assign(&bus, "coder-4", task());
    assert!(next_result(&mut coord).await.result.success);
    rt.stop().await;
}
