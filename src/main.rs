//! Mantis 控制台入口
//!
//! 极简 REPL：读用户输入跑轮次，事件泵打印过程；遇 AwaitingApproval 在终端
//! 提问 y/n 并经审批门裁决。命令：/auto on|off、/recall <查询>、/quit。

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mantis::approval::{ApprovalGate, Decision};
use mantis::capability::{
    CapabilityInvoker, CapabilityRegistry, EchoCapability, ListFilesCapability,
    MemoryRecallCapability, MemorySaveCapability, ReadFileCapability, SendMessageCapability,
    ShellCapability, SummarizeCapability,
};
use mantis::config::{load_config, AppConfig};
use mantis::core::{AgentError, TaskScheduler};
use mantis::governor::ContextGovernor;
use mantis::memory::{
    ConflictJudge, GateReplaceApprover, MemoryLifecycle, NoConflictJudge, PlannerConflictJudge,
    SqliteRecordStore,
};
use mantis::orchestrator::{run_turn, TurnEvent, TurnSession};
use mantis::planner::{create_planner_from_config, Planner};
use mantis::transcript::TranscriptPersistence;

const SYSTEM_PROMPT: &str = "You are Mantis, a careful personal assistant. \
Use the available capabilities to act on the user's behalf; never invent capability names. \
Propose independent calls together in one step; put dependent calls in a later step, \
after you have seen the results they depend on.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mantis=info")),
        )
        .init();

    let cfg = load_config(None).unwrap_or_else(|_| AppConfig::default());
    let workspace = cfg
        .app
        .workspace_root
        .clone()
        .unwrap_or_else(|| "./workspace".into());
    std::fs::create_dir_all(&workspace)?;

    let client = create_planner_from_config(&cfg.planner);
    let planner = Arc::new(Planner::new(Arc::clone(&client), SYSTEM_PROMPT));
    let gate = Arc::new(ApprovalGate::new(cfg.capabilities.auto_approve_all));

    let judge: Arc<dyn ConflictJudge> = if cfg.memory.conflict_detection {
        Arc::new(PlannerConflictJudge::new(Arc::clone(&client)))
    } else {
        Arc::new(NoConflictJudge)
    };
    let db_path = cfg
        .memory
        .db_path
        .clone()
        .unwrap_or_else(|| workspace.join("memory").join("records.db"));
    let store = Arc::new(SqliteRecordStore::new(db_path)?);
    let lifecycle = Arc::new(MemoryLifecycle::new(store, judge)?);

    let mut registry = CapabilityRegistry::new();
    registry.register(EchoCapability)?;
    registry.register(ListFilesCapability::new(&workspace))?;
    registry.register(ReadFileCapability::new(&workspace))?;
    registry.register(ShellCapability::new(
        cfg.capabilities.shell.allowed_commands.clone(),
    ))?;
    if let Some(url) = &cfg.capabilities.webhook.url {
        registry.register(SendMessageCapability::new(
            url.as_str(),
            cfg.capabilities.webhook.timeout_secs,
        ))?;
    }
    registry.register(SummarizeCapability::new(Arc::clone(&client)))?;
    registry.register(MemorySaveCapability::new(
        Arc::clone(&lifecycle),
        Arc::new(GateReplaceApprover::new(Arc::clone(&gate))),
    ))?;
    registry.register(MemoryRecallCapability::new(
        Arc::clone(&lifecycle),
        cfg.memory.max_recall,
    ))?;

    let invoker = Arc::new(CapabilityInvoker::new(
        Arc::new(registry),
        cfg.capabilities.timeout_secs,
    ));
    let governor = Arc::new(ContextGovernor::new(cfg.budget.to_budget().validated()?));
    let session = TurnSession::new(planner, invoker, Arc::clone(&gate), governor)
        .with_scheduler(Arc::new(TaskScheduler::new(cfg.capabilities.max_concurrent)))
        .with_max_steps(cfg.app.max_steps)
        .with_max_retries_per_capability(cfg.capabilities.max_retries_per_capability)
        .with_planner_timeout_secs(cfg.planner.timeouts.request);

    let name = cfg.app.name.as_deref().unwrap_or("mantis");
    println!("{} 就绪。/auto on|off 切换全量放行，/recall <查询> 检索记忆，/quit 退出。", name);

    // 会话转写跨进程恢复
    let persistence = TranscriptPersistence::new(workspace.join("session").join("transcript.json"));
    let mut transcript = persistence.load().unwrap_or_default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("you> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim().to_string();
        if input.is_empty() {
            continue;
        }

        match input.as_str() {
            "/quit" | "/exit" => break,
            "/auto on" => {
                gate.set_auto_approve(true);
                println!("全量自动放行：开");
                continue;
            }
            "/auto off" => {
                gate.set_auto_approve(false);
                println!("全量自动放行：关");
                continue;
            }
            _ if input.starts_with("/recall ") => {
                let query = input.trim_start_matches("/recall ").trim();
                for record in lifecycle.recall(query).iter().take(cfg.memory.max_recall) {
                    println!("  [{}] {} (tags: {})", record.id, record.content, record.tags.join(", "));
                }
                continue;
            }
            _ => {}
        }

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TurnEvent>();
        let cancel_token = CancellationToken::new();
        let turn_session = session.clone();
        let mut turn_transcript = std::mem::take(&mut transcript);
        let user_input = input.clone();
        let turn_task = tokio::spawn(async move {
            let result = run_turn(
                &turn_session,
                &mut turn_transcript,
                &user_input,
                Some(&event_tx),
                cancel_token,
            )
            .await;
            (result, turn_transcript)
        });

        // 事件泵：打印过程，AwaitingApproval 时在终端裁决
        while let Some(event) = event_rx.recv().await {
            match event {
                TurnEvent::AwaitingApproval {
                    handle,
                    capability,
                    summary,
                    ..
                } => {
                    println!("\n待审批: {} | {}", capability, summary);
                    print!("是否批准执行？(y/n): ");
                    std::io::stdout().flush()?;
                    let decision = read_decision(&mut lines).await;
                    if let Err(e) = gate.resolve(handle, decision) {
                        eprintln!("裁决失败: {}", e);
                    }
                }
                TurnEvent::Observation {
                    capability, preview, ..
                } => println!("  [{}] {}", capability, preview),
                TurnEvent::CallFailure {
                    capability, reason, ..
                } => println!("  [{}] 失败: {}", capability, reason),
                TurnEvent::MessageChunk { text } => {
                    print!("{}", text);
                    std::io::stdout().flush()?;
                }
                TurnEvent::MessageDone => println!(),
                TurnEvent::Error { text } => eprintln!("错误: {}", text),
                _ => {}
            }
        }

        let (result, returned) = turn_task.await?;
        transcript = returned;
        match result {
            Ok(_) => {}
            Err(AgentError::Cancelled) => println!("(已取消)"),
            Err(e) => eprintln!("轮次失败: {}", e),
        }
        if let Err(e) = persistence.save(&transcript) {
            tracing::warn!(error = %e, "transcript save failed");
        }
    }

    Ok(())
}

async fn read_decision(lines: &mut Lines<BufReader<Stdin>>) -> Decision {
    let answer = lines
        .next_line()
        .await
        .ok()
        .flatten()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    if answer == "y" || answer == "yes" || answer == "是" {
        Decision::Approved
    } else {
        Decision::Denied
    }
}
