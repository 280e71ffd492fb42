//! 编排集成测试
//!
//! 覆盖：自动放行 / 审批拒绝 / 审批通过、并发完成乱序写回、重试上限、
//! 治理压缩幂等与降级、取消语义、记忆保存端到端。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mantis::approval::{ApprovalGate, CallDecision, Decision};
use mantis::capability::{
    Capability, CapabilityInvoker, CapabilityRegistry, EchoCapability, MemorySaveCapability,
};
use mantis::core::{AgentError, CapabilityError};
use mantis::governor::{Budget, CompactionMode, ContextGovernor};
use mantis::memory::{
    ConflictJudge, GateReplaceApprover, InMemoryRecordStore, MemoryLifecycle, MemoryRecord,
};
use mantis::orchestrator::{run_turn, TurnEvent, TurnSession};
use mantis::planner::{MockPlanner, Planner};
use mantis::transcript::{CallOutcome, CallResult, Transcript, TranscriptEntry};

/// 记录执行次数的副作用能力（需审批）
struct SendProbe {
    executions: Arc<AtomicUsize>,
}

#[async_trait]
impl Capability for SendProbe {
    fn name(&self) -> &str {
        "send_probe"
    }
    fn description(&self) -> &str {
        "probe with side effects"
    }
    async fn invoke(&self, _args: Value) -> Result<String, CapabilityError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok("sent".to_string())
    }
}

/// 可配置延时的只读能力
struct SleepEcho {
    name: &'static str,
    delay_ms: u64,
}

#[async_trait]
impl Capability for SleepEcho {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "sleep then echo"
    }
    fn side_effects(&self) -> bool {
        false
    }
    async fn invoke(&self, _args: Value) -> Result<String, CapabilityError> {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        Ok(format!("{} done", self.name))
    }
}

/// 总是失败的能力（重试上限用）
struct Flaky {
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl Capability for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }
    fn description(&self) -> &str {
        "always fails"
    }
    fn side_effects(&self) -> bool {
        false
    }
    async fn invoke(&self, _args: Value) -> Result<String, CapabilityError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CapabilityError::Transient("backend down".to_string()))
    }
}

/// 固定摘要（压缩测试用）
struct StubSummarize;

#[async_trait]
impl Capability for StubSummarize {
    fn name(&self) -> &str {
        "summarize"
    }
    fn description(&self) -> &str {
        "stub summary"
    }
    fn side_effects(&self) -> bool {
        false
    }
    async fn invoke(&self, _args: Value) -> Result<String, CapabilityError> {
        Ok("STUB SUMMARY".to_string())
    }
}

/// 摘要失败（降级测试用）
struct BrokenSummarize;

#[async_trait]
impl Capability for BrokenSummarize {
    fn name(&self) -> &str {
        "summarize"
    }
    fn description(&self) -> &str {
        "broken summary"
    }
    fn side_effects(&self) -> bool {
        false
    }
    async fn invoke(&self, _args: Value) -> Result<String, CapabilityError> {
        Err(CapabilityError::Transient("summarizer down".to_string()))
    }
}

fn session_with(
    registry: CapabilityRegistry,
    script: Vec<&str>,
    gate: Arc<ApprovalGate>,
) -> TurnSession {
    let client = Arc::new(MockPlanner::scripted(script));
    let planner = Arc::new(Planner::new(client, "test assistant"));
    let invoker = Arc::new(CapabilityInvoker::new(Arc::new(registry), 5));
    let governor = Arc::new(ContextGovernor::new(Budget::default()));
    TurnSession::new(planner, invoker, gate, governor)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

/// 场景 A：无副作用能力自动放行，全程不经审批面板
#[tokio::test]
async fn test_auto_approved_call_executes_without_surface() {
    let mut registry = CapabilityRegistry::new();
    registry.register(EchoCapability).unwrap();
    let gate = Arc::new(ApprovalGate::new(false));
    let session = session_with(
        registry,
        vec![
            r#"{"calls": [{"id": "c1", "capability": "echo", "args": {"text": "hi"}}]}"#,
            r#"{"response": "done"}"#,
        ],
        Arc::clone(&gate),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut transcript = Transcript::new();
    let outcome = run_turn(&session, &mut transcript, "hello", Some(&tx), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.response, "done");
    assert_eq!(outcome.turn.decision("c1"), Some(CallDecision::AutoApproved));
    assert!(outcome.turn.unresolved().is_empty());
    assert_eq!(
        transcript.result_for("c1"),
        Some(&CallOutcome::Success { payload: "hi".to_string() })
    );
    // 审批面板从未介入
    assert!(gate.pending().is_empty());
    let events = drain(&mut rx);
    assert!(!events
        .iter()
        .any(|e| matches!(e, TurnEvent::AwaitingApproval { .. })));
}

/// 场景 B：需审批能力被拒 → Denied 结果写回、能力未执行、轮次继续
#[tokio::test]
async fn test_denied_call_is_reported_not_executed() {
    let executions = Arc::new(AtomicUsize::new(0));
    let mut registry = CapabilityRegistry::new();
    registry
        .register(SendProbe { executions: Arc::clone(&executions) })
        .unwrap();
    let gate = Arc::new(ApprovalGate::new(false));
    let session = session_with(
        registry,
        vec![
            r#"{"calls": [{"id": "c1", "capability": "send_probe", "args": {"text": "yo"}}]}"#,
            r#"{"response": "ok, not sending"}"#,
        ],
        Arc::clone(&gate),
    );

    // 审批面板：收到请求即拒绝
    let mut pending_rx = gate.subscribe();
    let surface_gate = Arc::clone(&gate);
    tokio::spawn(async move {
        if let Some(request) = pending_rx.recv().await {
            surface_gate.resolve(request.handle, Decision::Denied).unwrap();
        }
    });

    let mut transcript = Transcript::new();
    let outcome = run_turn(&session, &mut transcript, "send it", None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.response, "ok, not sending");
    assert_eq!(outcome.turn.decision("c1"), Some(CallDecision::Denied));
    assert_eq!(transcript.result_for("c1"), Some(&CallOutcome::Denied));
    assert_eq!(executions.load(Ordering::SeqCst), 0);
}

/// 审批通过：挂起恢复后执行恰好一次
#[tokio::test]
async fn test_approved_call_executes_exactly_once() {
    let executions = Arc::new(AtomicUsize::new(0));
    let mut registry = CapabilityRegistry::new();
    registry
        .register(SendProbe { executions: Arc::clone(&executions) })
        .unwrap();
    let gate = Arc::new(ApprovalGate::new(false));
    let session = session_with(
        registry,
        vec![
            r#"{"calls": [{"id": "c1", "capability": "send_probe", "args": {"text": "yo"}}]}"#,
            r#"{"response": "sent"}"#,
        ],
        Arc::clone(&gate),
    );

    let mut pending_rx = gate.subscribe();
    let surface_gate = Arc::clone(&gate);
    tokio::spawn(async move {
        if let Some(request) = pending_rx.recv().await {
            surface_gate
                .resolve(request.handle, Decision::Approved)
                .unwrap();
            // 二次裁决必须被协议层拒绝
            assert!(surface_gate
                .resolve(request.handle, Decision::Denied)
                .is_err());
        }
    });

    let mut transcript = Transcript::new();
    let outcome = run_turn(&session, &mut transcript, "send it", None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.turn.decision("c1"), Some(CallDecision::Approved));
    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(
        transcript.result_for("c1"),
        Some(&CallOutcome::Success { payload: "sent".to_string() })
    );
}

/// 并发：同步提出的两个独立调用，结果按完成顺序写回且 call_id 对应无误
#[tokio::test]
async fn test_concurrent_results_ordered_by_completion() {
    let mut registry = CapabilityRegistry::new();
    registry
        .register(SleepEcho { name: "slow", delay_ms: 300 })
        .unwrap();
    registry
        .register(SleepEcho { name: "fast", delay_ms: 10 })
        .unwrap();
    let gate = Arc::new(ApprovalGate::new(false));
    let session = session_with(
        registry,
        vec![
            r#"{"calls": [{"id": "s1", "capability": "slow", "args": {}}, {"id": "f1", "capability": "fast", "args": {}}]}"#,
            r#"{"response": "both done"}"#,
        ],
        gate,
    );

    let mut transcript = Transcript::new();
    let outcome = run_turn(&session, &mut transcript, "go", None, CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.turn.unresolved().is_empty());

    // 提案顺序 slow, fast；完成顺序 fast, slow
    let results: Vec<&CallResult> = transcript
        .entries()
        .iter()
        .filter_map(|e| match e {
            TranscriptEntry::ToolResult { result } => Some(result),
            _ => None,
        })
        .collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].call_id, "f1");
    assert_eq!(results[1].call_id, "s1");
    assert_eq!(
        results[0].outcome,
        CallOutcome::Success { payload: "fast done".to_string() }
    );
    assert_eq!(
        results[1].outcome,
        CallOutcome::Success { payload: "slow done".to_string() }
    );
}

/// 重试上限：同一能力失败达到上限后，后续重提不再执行
#[tokio::test]
async fn test_retry_cap_per_capability() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut registry = CapabilityRegistry::new();
    registry
        .register(Flaky { attempts: Arc::clone(&attempts) })
        .unwrap();
    let gate = Arc::new(ApprovalGate::new(false));
    let session = session_with(
        registry,
        vec![
            r#"{"calls": [{"id": "c1", "capability": "flaky", "args": {}}]}"#,
            r#"{"calls": [{"id": "c2", "capability": "flaky", "args": {}}]}"#,
            r#"{"calls": [{"id": "c3", "capability": "flaky", "args": {}}]}"#,
            r#"{"response": "giving up"}"#,
        ],
        gate,
    )
    .with_max_retries_per_capability(2);

    let mut transcript = Transcript::new();
    let outcome = run_turn(&session, &mut transcript, "try it", None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.response, "giving up");
    // 前两次真执行，第三次被上限拦下
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    match transcript.result_for("c3").unwrap() {
        CallOutcome::Failure { kind, message } => {
            assert_eq!(kind, "permission_denied");
            assert!(message.contains("retry limit"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

/// 未注册能力：结构化 not_found 结果，轮次不中止
#[tokio::test]
async fn test_unknown_capability_yields_not_found_result() {
    let gate = Arc::new(ApprovalGate::new(false));
    let session = session_with(
        CapabilityRegistry::new(),
        vec![
            r#"{"calls": [{"id": "c1", "capability": "teleport", "args": {}}]}"#,
            r#"{"response": "no such thing"}"#,
        ],
        gate,
    );

    let mut transcript = Transcript::new();
    let outcome = run_turn(&session, &mut transcript, "go", None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.response, "no such thing");
    match transcript.result_for("c1").unwrap() {
        CallOutcome::Failure { kind, .. } => assert_eq!(kind, "not_found"),
        other => panic!("expected failure, got {:?}", other),
    }
}

/// 取消：挂起审批判 Denied，轮次返回 Cancelled，结果不写回
#[tokio::test]
async fn test_cancellation_resolves_pending_as_denied() {
    let executions = Arc::new(AtomicUsize::new(0));
    let mut registry = CapabilityRegistry::new();
    registry
        .register(SendProbe { executions: Arc::clone(&executions) })
        .unwrap();
    let gate = Arc::new(ApprovalGate::new(false));
    let session = session_with(
        registry,
        vec![r#"{"calls": [{"id": "c1", "capability": "send_probe", "args": {}}]}"#],
        Arc::clone(&gate),
    );

    let cancel_token = CancellationToken::new();
    let canceller = cancel_token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let mut transcript = Transcript::new();
    let result = run_turn(&session, &mut transcript, "send it", None, cancel_token).await;

    assert!(matches!(result, Err(AgentError::Cancelled)));
    assert!(gate.pending().is_empty());
    assert_eq!(executions.load(Ordering::SeqCst), 0);
    assert!(transcript.result_for("c1").is_none());
}

fn long_transcript(n: usize) -> Transcript {
    let mut t = Transcript::new();
    t.push(TranscriptEntry::user("first question"));
    t.push(TranscriptEntry::planner("first answer"));
    for i in 0..n {
        t.push(TranscriptEntry::user(format!("question {}", i)));
        t.push(TranscriptEntry::planner(format!("answer {}", i)));
    }
    t
}

fn governor_invoker(summarizer_ok: bool) -> (ContextGovernor, CapabilityInvoker) {
    let mut registry = CapabilityRegistry::new();
    if summarizer_ok {
        registry.register(StubSummarize).unwrap();
    } else {
        registry.register(BrokenSummarize).unwrap();
    }
    let budget = Budget {
        max_messages: 12,
        tail_size: 4,
        ..Budget::default()
    };
    (
        ContextGovernor::new(budget),
        CapabilityInvoker::new(Arc::new(registry), 5),
    )
}

/// 压缩：长度受限、首对保留、连续两次结果一致（幂等）
#[tokio::test]
async fn test_compaction_is_idempotent_and_bounded() {
    let (governor, invoker) = governor_invoker(true);
    let mut t = long_transcript(20);

    let mode = governor.compact(&mut t, &invoker).await;
    assert!(matches!(mode, CompactionMode::Summarized { .. }));
    assert!(t.len() <= 12);

    // 首个 User/Planner 对原样保留
    assert_eq!(t.entries()[0], TranscriptEntry::user("first question"));
    assert_eq!(t.entries()[1], TranscriptEntry::planner("first answer"));
    match &t.entries()[2] {
        TranscriptEntry::SystemNote { content } => assert!(content.contains("STUB SUMMARY")),
        other => panic!("expected summary note, got {:?}", other),
    }

    // 幂等：再压一次是 no-op
    let snapshot = t.entries().to_vec();
    let mode = governor.compact(&mut t, &invoker).await;
    assert_eq!(mode, CompactionMode::None);
    assert_eq!(t.entries(), snapshot.as_slice());
}

/// 压缩降级：摘要失败 → 硬截断，仍受长度约束、首对保留
#[tokio::test]
async fn test_compaction_degrades_to_hard_truncation() {
    let (governor, invoker) = governor_invoker(false);
    let mut t = long_transcript(20);

    let mode = governor.compact(&mut t, &invoker).await;
    assert!(matches!(mode, CompactionMode::HardTruncated { .. }));
    assert!(t.len() <= 12);
    assert_eq!(t.entries()[0], TranscriptEntry::user("first question"));
    assert_eq!(t.entries()[1], TranscriptEntry::planner("first answer"));
    // 没有替代注记
    assert!(!t
        .entries()
        .iter()
        .any(|e| matches!(e, TranscriptEntry::SystemNote { .. })));
}

/// 固定指认 id 1 的判定
struct PointAtOne;

#[async_trait]
impl ConflictJudge for PointAtOne {
    async fn judge(
        &self,
        _new: &str,
        candidates: &[MemoryRecord],
    ) -> Result<Option<i64>, String> {
        Ok(candidates.iter().find(|r| r.id == 1).map(|r| r.id))
    }
}

/// 记忆保存端到端：冲突 → 经审批门（全量放行）→ 同 id 替换
#[tokio::test]
async fn test_memory_save_replaces_through_gate() {
    let lifecycle = Arc::new(
        MemoryLifecycle::new(Arc::new(InMemoryRecordStore::new()), Arc::new(PointAtOne)).unwrap(),
    );
    lifecycle
        .propose("Prefer JavaScript", vec!["style".into()])
        .await
        .unwrap();
    let created_at = lifecycle.get(1).unwrap().created_at;

    let gate = Arc::new(ApprovalGate::new(true));
    let mut registry = CapabilityRegistry::new();
    registry
        .register(MemorySaveCapability::new(
            Arc::clone(&lifecycle),
            Arc::new(GateReplaceApprover::new(gate)),
        ))
        .unwrap();
    let invoker = CapabilityInvoker::new(Arc::new(registry), 5);

    let payload = invoker
        .invoke(
            "memory_save",
            serde_json::json!({"content": "Prefer TypeScript", "tags": ["style"]}),
        )
        .await
        .unwrap();
    assert!(payload.contains("replaced"));

    let record = lifecycle.get(1).unwrap();
    assert_eq!(record.content, "Prefer TypeScript");
    assert_eq!(record.created_at, created_at);
    assert!(record.updated_at.is_some());
    assert_eq!(lifecycle.len(), 1);
    // recall 以同一 id 命中新内容
    let hits = lifecycle.recall("typescript");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, 1);
}
