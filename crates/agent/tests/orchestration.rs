//! End-to-end tests for the orchestration runtime.
//!
//! These drive the full loop with a scripted streaming provider: parallel
//! tool execution, partial call filtering, escalation, subagent delegation,
//! recursion limits, and memory injection.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use skein_agent::{
    ContextRetriever, Orchestrator, QueryRewriter, RetryPolicy, RunContext, RunSettings,
    ToolBackends, ToolGateway,
};
use skein_config::RetrievalConfig;
use skein_core::error::{ProviderError, ToolError};
use skein_core::event::{AgentEvent, EventEmitter};
use skein_core::identity::CallerIdentity;
use skein_core::job::{JobStatus, ProgressStore};
use skein_core::memory::MemoryRecord;
use skein_core::message::Role;
use skein_core::provider::{
    CompletionDelta, CompletionProvider, CompletionRequest, CompletionStream,
};
use skein_core::subagent::{SubagentDefinition, SubagentRegistry};
use skein_memory::{InMemoryPool, InMemoryProgressStore};
use skein_tools::{FnToolBackend, MemorySearchBackend};
use tokio::sync::{Barrier, mpsc};

// ── Scripted provider ────────────────────────────────────────────────────

/// Replays streamed turns in order and remembers every request.
struct ScriptedProvider {
    turns: Mutex<VecDeque<Vec<CompletionDelta>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    fn new(turns: Vec<Vec<CompletionDelta>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_scripted"
    }

    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let Some(deltas) = self.turns.lock().unwrap().pop_front() else {
            return Err(ProviderError::StreamInterrupted("script exhausted".into()));
        };

        let (tx, rx) = mpsc::channel(deltas.len() + 1);
        for delta in deltas {
            let _ = tx.send(Ok(delta)).await;
        }
        let _ = tx.send(Ok(CompletionDelta::Done { usage: None })).await;
        Ok(rx)
    }
}

fn text(content: &str) -> Vec<CompletionDelta> {
    vec![CompletionDelta::Text {
        content: content.into(),
    }]
}

fn calls(specs: &[(&str, &str, serde_json::Value)]) -> Vec<CompletionDelta> {
    specs
        .iter()
        .enumerate()
        .map(|(index, (id, name, args))| CompletionDelta::ToolCall {
            index: index as u32,
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            arguments: args.to_string(),
        })
        .collect()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(1),
        timeout: None,
    }
}

fn settings() -> RunSettings {
    RunSettings {
        model: "mock-model".into(),
        ..RunSettings::default()
    }
}

fn researcher() -> SubagentRegistry {
    [SubagentDefinition {
        name: "researcher".into(),
        description: "Looks things up".into(),
        allowed_tools: None,
        prompt_template: "You are a researcher. {task}".into(),
        model: None,
    }]
    .into_iter()
    .collect()
}

fn counting_backend(counter: Arc<AtomicUsize>) -> Arc<FnToolBackend> {
    Arc::new(FnToolBackend::new("count", move |args, _caller| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(json!({"query": args["query"]})) }
    }))
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn calls_in_one_iteration_run_concurrently() {
    // Each call waits for the other; sequential execution would never finish.
    let barrier = Arc::new(Barrier::new(2));
    let backend = Arc::new(FnToolBackend::new("barrier", move |args, _caller| {
        let barrier = Arc::clone(&barrier);
        async move {
            barrier.wait().await;
            Ok(json!({"query": args["query"]}))
        }
    }));

    let provider = ScriptedProvider::new(vec![
        calls(&[
            ("c1", "memory_search", json!({"query": "pricing"})),
            ("c2", "memory_search", json!({"query": "billing"})),
        ]),
        text("Both done."),
    ]);
    let store = Arc::new(InMemoryProgressStore::new());
    let gateway = ToolGateway::new(ToolBackends::new().with_memory_search(backend), store.clone());
    let orch = Orchestrator::new(provider.clone(), gateway, settings());

    let ctx = RunContext::new("compare", CallerIdentity::new("u1")).with_job_id("job_par");
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        orch.run(ctx, &EventEmitter::detached()),
    )
    .await
    .expect("tool calls should not run sequentially")
    .unwrap();

    assert_eq!(outcome.final_text, "Both done.");
    assert_eq!(outcome.stats.tool_calls, 2);

    // One result per call, correlated by id.
    let followup = &provider.requests()[1];
    let result_ids: Vec<_> = followup
        .history
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    assert_eq!(result_ids, vec!["c1", "c2"]);

    let job = store.get_job("job_par").await.unwrap().unwrap();
    assert_eq!(job.steps.len(), 2);
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn incomplete_call_is_skipped_until_reemitted() {
    let memory_calls = Arc::new(AtomicUsize::new(0));
    let social_calls = Arc::new(AtomicUsize::new(0));

    let provider = ScriptedProvider::new(vec![
        calls(&[
            ("c1", "social_search", json!({"query": "launch"})),
            ("c2", "memory_search", json!({"limit": 3})),
        ]),
        calls(&[("c3", "memory_search", json!({"query": "launch", "limit": 3}))]),
        text("Found it."),
    ]);
    let backends = ToolBackends::new()
        .with_memory_search(counting_backend(memory_calls.clone()))
        .with_social_search(counting_backend(social_calls.clone()));
    let gateway = ToolGateway::new(backends, Arc::new(InMemoryProgressStore::new()));
    let orch = Orchestrator::new(provider.clone(), gateway, settings());

    let (events, mut stream) = EventEmitter::channel();
    let outcome = orch
        .run(RunContext::new("launch?", CallerIdentity::new("u1")), &events)
        .await
        .unwrap();

    assert_eq!(outcome.final_text, "Found it.");
    assert_eq!(social_calls.load(Ordering::SeqCst), 1);
    assert_eq!(memory_calls.load(Ordering::SeqCst), 1);

    let started: Vec<_> = stream
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            AgentEvent::ToolCallStart { call_id, .. } => Some(call_id),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["c1", "c3"]);

    let second = &provider.requests()[1];
    assert!(
        second
            .history
            .iter()
            .all(|m| m.tool_call_id.as_deref() != Some("c2"))
    );
}

#[tokio::test]
async fn repeated_failures_block_the_job() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let failing = Arc::new(FnToolBackend::new("social", move |_args, _caller| {
        counter.fetch_add(1, Ordering::SeqCst);
        async {
            Err(ToolError::ExecutionFailed {
                tool_name: "social_search".into(),
                reason: "upstream 503".into(),
            })
        }
    }));

    let provider = ScriptedProvider::new(vec![
        calls(&[
            ("c1", "social_search", json!({"query": "a"})),
            ("c2", "social_search", json!({"query": "b"})),
            ("c3", "social_search", json!({"query": "c"})),
        ]),
        calls(&[("c4", "social_search", json!({"query": "d"}))]),
        text("Could not reach social search."),
    ]);
    let store = Arc::new(InMemoryProgressStore::new());
    let gateway = ToolGateway::new(ToolBackends::new().with_social_search(failing), store.clone())
        .with_retry(fast_retry());
    let orch = Orchestrator::new(provider, gateway, settings());

    let (events, mut stream) = EventEmitter::channel();
    let ctx = RunContext::new("search", CallerIdentity::new("u1")).with_job_id("job_esc");
    let outcome = orch.run(ctx, &events).await.unwrap();

    assert_eq!(outcome.final_text, "Could not reach social search.");
    assert_eq!(outcome.stats.failed_tool_calls, 4);

    // After escalation, c4 ran exactly once with no retries.
    let job = store.get_job("job_esc").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Blocked);
    let c4 = job.steps.iter().find(|s| s.call_id == "c4").unwrap();
    assert_eq!(c4.retries, 0);
    assert!(attempts.load(Ordering::SeqCst) <= 3 * 3 + 1);

    let events = stream.drain();
    let fatal = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::Error { recoverable: false, .. }))
        .count();
    assert_eq!(fatal, 1);
    assert_eq!(events.last().unwrap().event_type(), "complete");

    // Only an explicit resume unblocks it.
    let resumed = store.resume_job("job_esc").await.unwrap();
    assert_eq!(resumed.status, JobStatus::Running);
}

#[tokio::test]
async fn delegation_result_becomes_the_assistant_turn() {
    let provider = ScriptedProvider::new(vec![
        calls(&[(
            "t1",
            "task",
            json!({"subagent": "researcher", "prompt": "Find the pricing decision"}),
        )]),
        text("Annual billing was agreed."),
        text("The team agreed on annual billing."),
    ]);
    let store = Arc::new(InMemoryProgressStore::new());
    let gateway = ToolGateway::new(ToolBackends::new(), store.clone());
    let orch = Orchestrator::new(provider.clone(), gateway, settings()).with_subagents(researcher());

    let (events, stream) = EventEmitter::channel();
    let ctx = RunContext::new("what did we decide?", CallerIdentity::new("u1")).with_job_id("job_del");
    let outcome = orch.run(ctx, &events).await.unwrap();
    drop(events);

    assert_eq!(outcome.final_text, "The team agreed on annual billing.");
    assert_eq!(outcome.stats.subagent_runs, 1);
    assert_eq!(outcome.stats.iterations, 3);

    let requests = provider.requests();
    assert_eq!(requests[1].system_prompt, "You are a researcher. Find the pricing decision");
    let last = requests[2].history.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content, "Annual billing was agreed.");
    assert!(requests[2].history.iter().all(|m| m.role != Role::Tool));

    let job = store.get_job("job_del").await.unwrap().unwrap();
    assert_eq!(job.artifacts.len(), 1);
    assert_eq!(job.artifacts[0].kind, "subagent_result");
    assert!(job.steps.iter().any(|s| s.tool_name == "task" && s.depth == 0));

    let types: Vec<&'static str> = stream.map(|e| e.event_type()).collect().await;
    let start = types.iter().position(|t| *t == "subagent_start").unwrap();
    let complete = types.iter().position(|t| *t == "subagent_complete").unwrap();
    assert!(start < complete);
    assert_eq!(types.last(), Some(&"complete"));
}

#[tokio::test]
async fn recursion_depth_is_capped() {
    let delegate = |id: &str| {
        calls(&[(id, "task", json!({"subagent": "researcher", "prompt": "go deeper"}))])
    };
    let provider = ScriptedProvider::new(vec![
        delegate("d0"),
        delegate("d1"),
        delegate("d2"),
        delegate("d3"),
        text("bottom"),
        text("level two"),
        text("level one"),
        text("top"),
    ]);
    let store = Arc::new(InMemoryProgressStore::new());
    let gateway = ToolGateway::new(ToolBackends::new(), store.clone());
    let orch = Orchestrator::new(provider.clone(), gateway, settings()).with_subagents(researcher());

    let (events, mut stream) = EventEmitter::channel();
    let ctx = RunContext::new("dig", CallerIdentity::new("u1")).with_job_id("job_depth");
    let outcome = orch.run(ctx, &events).await.unwrap();
    assert_eq!(outcome.final_text, "top");
    assert_eq!(outcome.stats.subagent_runs, 3);

    let events = stream.drain();
    let depths: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::SubagentStart { depth, .. } => Some(*depth),
            _ => None,
        })
        .collect();
    assert_eq!(depths, vec![1, 2, 3]);

    let d3 = events
        .iter()
        .find_map(|e| match e {
            AgentEvent::ToolCallComplete {
                call_id,
                success,
                output,
                ..
            } if call_id == "d3" => Some((*success, output.clone())),
            _ => None,
        })
        .unwrap();
    assert!(!d3.0);
    assert!(d3.1.contains("Recursion depth exceeded"));

    // The depth-3 run saw the error as its subagent turn, then answered.
    assert_eq!(provider.requests().len(), 8);
}

#[tokio::test]
async fn retrieved_memory_is_injected_at_top_level_only() {
    let pool = Arc::new(
        InMemoryPool::new()
            .with_records(
                "u1",
                vec![
                    MemoryRecord {
                        id: "m1".into(),
                        facts: vec!["Prefers annual billing for the pricing plan".into()],
                        thread_id: Some("t1".into()),
                        timestamp: None,
                    },
                    MemoryRecord {
                        id: "m2".into(),
                        facts: vec!["Lives in Lisbon".into()],
                        thread_id: Some("t2".into()),
                        timestamp: None,
                    },
                ],
            )
            .await,
    );

    let provider = ScriptedProvider::new(vec![
        calls(&[(
            "t1",
            "task",
            json!({"subagent": "researcher", "prompt": "check the plan"}),
        )]),
        text("Annual."),
        text("You prefer annual billing."),
    ]);
    let backends =
        ToolBackends::new().with_memory_search(Arc::new(MemorySearchBackend::new(pool.clone())));
    let gateway = ToolGateway::new(backends, Arc::new(InMemoryProgressStore::new()));
    let retriever = ContextRetriever::new(pool, QueryRewriter::offline(), RetrievalConfig::default());
    let orch = Orchestrator::new(provider.clone(), gateway, settings())
        .with_subagents(researcher())
        .with_retriever(retriever);

    let ctx = RunContext::new("remind me what we discussed about pricing", CallerIdentity::new("u1"))
        .with_system_prompt("You are helpful.");
    orch.run(ctx, &EventEmitter::detached()).await.unwrap();

    let requests = provider.requests();
    assert!(requests[0].system_prompt.starts_with("You are helpful."));
    assert!(requests[0].system_prompt.contains("Prefers annual billing"));
    assert!(requests[0].system_prompt.contains("(memory_facts)"));
    assert!(!requests[0].system_prompt.contains("Lisbon"));
    // The subagent run gets only its own prompt.
    assert!(!requests[1].system_prompt.contains("Recalled Memories"));
}
