//! 轮次主循环
//!
//! 用户输入 -> 治理（裁剪+压缩）-> 规划 -> 解析提议调用 -> 审批门分类 ->
//! {立即并发执行 | 挂起待审批} -> 结果按裁决/完成顺序写回转写 -> 下一步规划，
//! 直至最终回复或步数上限；支持取消（挂起句柄判 Denied，在途结果丢弃）。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalGate, CallDecision, Classification, Decision};
use crate::capability::{canonical_invocation, step_schema_json, CapabilityInvoker};
use crate::core::{AgentError, CapabilityError, TaskScheduler};
use crate::governor::{CompactionMode, ContextGovernor};
use crate::orchestrator::{Turn, TurnEvent};
use crate::planner::{parse_planner_output, Planner, PlannerOutput, ProposedCall};
use crate::transcript::{CallResult, Transcript, TranscriptEntry};

/// 单轮最大步数，防止死循环
const DEFAULT_MAX_STEPS: usize = 12;
/// 规划器单次调用超时（秒）；审批等待是轮次内唯一不设时限的挂起点
const DEFAULT_PLANNER_TIMEOUT_SECS: u64 = 60;
/// 规划器输出格式错误的纠正重试上限
const MAX_FORMAT_RETRIES: u32 = 2;
/// 同一能力在一轮内的失败重试上限（规划器重提超过即拒绝执行）
const DEFAULT_MAX_RETRIES_PER_CAPABILITY: u32 = 2;
/// 流式回复时每段字符数（模拟打字效果）
const CHUNK_CHARS: usize = 6;
/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;
/// 思考内容展示最大字符数
const THINKING_PREVIEW_CHARS: usize = 800;

/// 轮次会话：可跨轮共享的组件集合（转写由调用方持有，单写者）
#[derive(Clone)]
pub struct TurnSession {
    pub planner: Arc<Planner>,
    pub invoker: Arc<CapabilityInvoker>,
    pub gate: Arc<ApprovalGate>,
    pub governor: Arc<ContextGovernor>,
    pub scheduler: Arc<TaskScheduler>,
    pub max_steps: usize,
    pub max_retries_per_capability: u32,
    pub planner_timeout_secs: u64,
}

impl TurnSession {
    pub fn new(
        planner: Arc<Planner>,
        invoker: Arc<CapabilityInvoker>,
        gate: Arc<ApprovalGate>,
        governor: Arc<ContextGovernor>,
    ) -> Self {
        Self {
            planner,
            invoker,
            gate,
            governor,
            scheduler: Arc::new(TaskScheduler::default()),
            max_steps: DEFAULT_MAX_STEPS,
            max_retries_per_capability: DEFAULT_MAX_RETRIES_PER_CAPABILITY,
            planner_timeout_secs: DEFAULT_PLANNER_TIMEOUT_SECS,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<TaskScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_max_retries_per_capability(mut self, cap: u32) -> Self {
        self.max_retries_per_capability = cap;
        self
    }

    pub fn with_planner_timeout_secs(mut self, secs: u64) -> Self {
        self.planner_timeout_secs = secs.max(1);
        self
    }
}

/// 轮次结果：最终回复与判定登记
#[derive(Debug)]
pub struct TurnOutcome {
    pub response: String,
    pub turn: Turn,
}

fn send_event(tx: &Option<&mpsc::UnboundedSender<TurnEvent>>, ev: TurnEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let p: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        format!("{}...", p)
    } else {
        p
    }
}

/// 已解析调用经审批/执行后的回传：按裁决解决顺序到达
type CallCompletion = (
    ProposedCall,
    CallDecision,
    Option<Result<String, CapabilityError>>,
);

/// 执行一轮：用户输入到最终回复
pub async fn run_turn(
    session: &TurnSession,
    transcript: &mut Transcript,
    user_input: &str,
    event_tx: Option<&mpsc::UnboundedSender<TurnEvent>>,
    cancel_token: CancellationToken,
) -> Result<TurnOutcome, AgentError> {
    transcript.push(TranscriptEntry::user(user_input));
    let mut turn = Turn::new();
    let mut format_retries = 0u32;

    // 记录初始 token 数，用于计算本轮增量
    let (init_prompt, init_completion, _) = session.planner.token_usage();

    // system 同一轮内不变：基础 prompt + 能力清单 + step 输出 schema
    let system = format!(
        "{}\n\n## Available capabilities\n{}\n\n## Step output format\nRespond with one JSON object; assign each call a unique id.\n{}",
        session.planner.base_system_prompt(),
        session.invoker.registry().to_schema_json(),
        step_schema_json(),
    );

    loop {
        send_event(&event_tx, TurnEvent::StepUpdate {
            step: turn.steps(),
            max_steps: session.max_steps,
        });

        if cancel_token.is_cancelled() {
            session.gate.cancel_all();
            send_event(&event_tx, TurnEvent::Error { text: "Cancelled by user".to_string() });
            return Err(AgentError::Cancelled);
        }

        if turn.steps() >= session.max_steps {
            let response = format!("达到最大步数限制 ({})，本轮提前结束。", session.max_steps);
            transcript.push(TranscriptEntry::planner(response.clone()));
            return Ok(TurnOutcome { response, turn });
        }

        // 每次规划前治理转写：裁剪超大条目 + 必要时滑窗压缩
        let report = session.governor.govern(transcript, &session.invoker).await;
        if report.trimmed_entries > 0 || report.compaction != CompactionMode::None {
            send_event(&event_tx, TurnEvent::Governed {
                trimmed: report.trimmed_entries,
                compaction: match &report.compaction {
                    CompactionMode::None => "none".to_string(),
                    CompactionMode::Summarized { replaced } => format!("summarized {} entries", replaced),
                    CompactionMode::HardTruncated { dropped } => format!("hard-truncated {} entries", dropped),
                },
            });
        }

        send_event(&event_tx, TurnEvent::Thinking);
        let output = match tokio::time::timeout(
            std::time::Duration::from_secs(session.planner_timeout_secs),
            session.planner.plan_with_system(&transcript.to_messages(), &system),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                let e = AgentError::PlannerError(format!(
                    "planner call timed out after {}s",
                    session.planner_timeout_secs
                ));
                send_event(&event_tx, TurnEvent::Error { text: e.to_string() });
                return Err(e);
            }
        };
        send_event(&event_tx, TurnEvent::ThinkingContent {
            text: preview(&output, THINKING_PREVIEW_CHARS),
        });

        match parse_planner_output(&output) {
            Ok(PlannerOutput::Final(response)) => {
                transcript.push(TranscriptEntry::planner(response.clone()));
                let chars: Vec<char> = response.chars().collect();
                for chunk in chars.chunks(CHUNK_CHARS) {
                    send_event(&event_tx, TurnEvent::MessageChunk {
                        text: chunk.iter().collect(),
                    });
                }
                send_event(&event_tx, TurnEvent::MessageDone);

                let (cur_prompt, cur_completion, cur_total) = session.planner.token_usage();
                send_event(&event_tx, TurnEvent::TokenUsage {
                    prompt_tokens: cur_prompt.saturating_sub(init_prompt),
                    completion_tokens: cur_completion.saturating_sub(init_completion),
                    total_tokens: cur_prompt.saturating_sub(init_prompt)
                        + cur_completion.saturating_sub(init_completion),
                    cumulative_prompt: cur_prompt,
                    cumulative_completion: cur_completion,
                    cumulative_total: cur_total,
                });

                return Ok(TurnOutcome { response, turn });
            }
            Ok(PlannerOutput::Step { commentary, calls }) => {
                // 先登记再执行；call_id 重复按格式违规走纠正重试（全有或全无）
                if let Err(e) = turn.register_calls(&calls) {
                    format_retries += 1;
                    if format_retries > MAX_FORMAT_RETRIES {
                        return Err(e);
                    }
                    send_event(&event_tx, TurnEvent::Recovery {
                        action: "RetryWithPrompt".to_string(),
                        detail: e.to_string(),
                    });
                    transcript.push(TranscriptEntry::user(
                        "上一步输出中 call id 重复。每个调用必须携带轮次内唯一的 id，请重新输出。",
                    ));
                    turn.advance_step();
                    continue;
                }

                transcript.push(TranscriptEntry::planner(output.clone()));
                if let Some(text) = commentary {
                    send_event(&event_tx, TurnEvent::ThinkingContent {
                        text: preview(&text, THINKING_PREVIEW_CHARS),
                    });
                }

                execute_step(session, transcript, &mut turn, calls, &event_tx, &cancel_token)
                    .await?;
            }
            Err(e @ AgentError::JsonParseError(_)) => {
                // 解析失败：注入纠正提示让规划器重试（有上限）
                format_retries += 1;
                if format_retries > MAX_FORMAT_RETRIES {
                    send_event(&event_tx, TurnEvent::Error { text: e.to_string() });
                    return Err(e);
                }
                send_event(&event_tx, TurnEvent::Recovery {
                    action: "RetryWithPrompt".to_string(),
                    detail: e.to_string(),
                });
                transcript.push(TranscriptEntry::user(format!(
                    "上一步输出的 JSON 格式错误: {}。\
                     请只输出一个合法的 JSON 对象，格式为 {{\"response\": \"...\", \"calls\": [{{\"id\": \"c1\", \"capability\": \"能力名\", \"args\": {{...}}}}]}}。",
                    e
                )));
            }
            Err(e) => {
                send_event(&event_tx, TurnEvent::Error { text: e.to_string() });
                return Err(e);
            }
        }

        turn.advance_step();
    }
}

/// 执行一步内的全部提议调用：
/// 相互独立的调用并发执行（调度器限并发）；结果按审批裁决/完成顺序写回转写，
/// 每个结果携带 call_id 供规划器对应乱序完成。本步所有调用拿到终态后才进下一步。
async fn execute_step(
    session: &TurnSession,
    transcript: &mut Transcript,
    turn: &mut Turn,
    calls: Vec<ProposedCall>,
    event_tx: &Option<&mpsc::UnboundedSender<TurnEvent>>,
    cancel_token: &CancellationToken,
) -> Result<(), AgentError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<CallCompletion>();
    let mut expected = 0usize;

    for call in calls {
        send_event(event_tx, TurnEvent::CallProposed {
            call_id: call.id.clone(),
            capability: call.capability.clone(),
            args: call.args.clone(),
        });

        // 重试上限：该能力本轮失败次数已达上限，拒绝执行
        if turn.failures(&call.capability) >= session.max_retries_per_capability {
            turn.record_decision(&call.id, CallDecision::Denied);
            send_event(event_tx, TurnEvent::CallFailure {
                call_id: call.id.clone(),
                capability: call.capability.clone(),
                kind: "permission_denied".to_string(),
                reason: "retry limit reached for this capability in the current turn".to_string(),
            });
            transcript.push(TranscriptEntry::tool_result(CallResult::failure(
                call.id,
                call.capability,
                "permission_denied",
                "retry limit reached for this capability in the current turn",
            )));
            continue;
        }

        // 未注册能力：结构化 NotFound 结果，不中止轮次
        let Some(contract) = session.invoker.registry().contract(&call.capability) else {
            turn.record_decision(&call.id, CallDecision::Denied);
            send_event(event_tx, TurnEvent::CallFailure {
                call_id: call.id.clone(),
                capability: call.capability.clone(),
                kind: "not_found".to_string(),
                reason: format!("unknown capability: {}", call.capability),
            });
            transcript.push(TranscriptEntry::tool_result(CallResult::failure(
                call.id.clone(),
                call.capability.clone(),
                "not_found",
                format!("unknown capability: {}", call.capability),
            )));
            continue;
        };

        match session.gate.classify(&call, contract) {
            Classification::AutoApproved => {
                turn.record_decision(&call.id, CallDecision::AutoApproved);
                send_event(event_tx, TurnEvent::CallDecided {
                    call_id: call.id.clone(),
                    decision: CallDecision::AutoApproved,
                });
                let tx = tx.clone();
                let invoker = Arc::clone(&session.invoker);
                let scheduler = Arc::clone(&session.scheduler);
                tokio::spawn(async move {
                    let _permit = scheduler.acquire_capability().await;
                    let result = invoker.invoke(&call.capability, call.args.clone()).await;
                    let _ = tx.send((call, CallDecision::AutoApproved, Some(result)));
                });
                expected += 1;
            }
            Classification::RequiresApproval => {
                let summary = canonical_invocation(&call.capability, &call.args);
                let handle =
                    session
                        .gate
                        .submit_for_approval(&call.id, &call.capability, summary.clone());
                send_event(event_tx, TurnEvent::AwaitingApproval {
                    handle: handle.id,
                    call_id: call.id.clone(),
                    capability: call.capability.clone(),
                    summary,
                });
                let tx = tx.clone();
                let invoker = Arc::clone(&session.invoker);
                let scheduler = Arc::clone(&session.scheduler);
                tokio::spawn(async move {
                    match handle.decided().await {
                        Decision::Approved => {
                            let _permit = scheduler.acquire_capability().await;
                            let result = invoker.invoke(&call.capability, call.args.clone()).await;
                            let _ = tx.send((call, CallDecision::Approved, Some(result)));
                        }
                        Decision::Denied => {
                            let _ = tx.send((call, CallDecision::Denied, None));
                        }
                    }
                });
                expected += 1;
            }
        }
    }
    drop(tx);

    let mut received = 0usize;
    while received < expected {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                // 取消：挂起句柄判 Denied；在途调用任其完成，但结果随接收端一起丢弃
                session.gate.cancel_all();
                send_event(event_tx, TurnEvent::Error { text: "Cancelled by user".to_string() });
                return Err(AgentError::Cancelled);
            }
            completion = rx.recv() => {
                let Some((call, decision, result)) = completion else { break };
                turn.record_decision(&call.id, decision);
                send_event(event_tx, TurnEvent::CallDecided {
                    call_id: call.id.clone(),
                    decision,
                });

                let entry = match (decision, result) {
                    (CallDecision::Denied, _) => CallResult::denied(call.id, call.capability),
                    (_, Some(Ok(payload))) => {
                        send_event(event_tx, TurnEvent::Observation {
                            call_id: call.id.clone(),
                            capability: call.capability.clone(),
                            preview: preview(&payload, OBSERVATION_PREVIEW_CHARS),
                        });
                        CallResult::success(call.id, call.capability, payload)
                    }
                    (_, Some(Err(e))) => {
                        turn.record_failure(&call.capability);
                        send_event(event_tx, TurnEvent::CallFailure {
                            call_id: call.id.clone(),
                            capability: call.capability.clone(),
                            kind: e.kind().to_string(),
                            reason: e.to_string(),
                        });
                        CallResult::failure(call.id, call.capability, e.kind(), e.to_string())
                    }
                    (_, None) => CallResult::failure(
                        call.id,
                        call.capability,
                        "invalid",
                        "call resolved without result",
                    ),
                };
                transcript.push(TranscriptEntry::tool_result(entry));
                received += 1;
            }
        }
    }

    Ok(())
}
