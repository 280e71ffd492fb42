//! 轮次过程事件：用于前端展示思考、审批、调用与回复

use serde::Serialize;

use crate::approval::{CallDecision, HandleId};

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// 步数更新（当前第几步）
    StepUpdate { step: usize, max_steps: usize },
    /// 正在调用规划器
    Thinking,
    /// 规划器的思考/规划内容（过程说明）
    ThinkingContent { text: String },
    /// 规划器提议调用
    CallProposed {
        call_id: String,
        capability: String,
        args: serde_json::Value,
    },
    /// 调用等待审批（审批面板据 handle 裁决）
    AwaitingApproval {
        handle: HandleId,
        call_id: String,
        capability: String,
        summary: String,
    },
    /// 调用的终态判定
    CallDecided {
        call_id: String,
        decision: CallDecision,
    },
    /// 调用结果（预览，避免过长）
    Observation {
        call_id: String,
        capability: String,
        preview: String,
    },
    /// 调用失败（kind 区分超时/拒绝/瞬时等）
    CallFailure {
        call_id: String,
        capability: String,
        kind: String,
        reason: String,
    },
    /// 上下文治理动作（裁剪条数 + 压缩方式）
    Governed { trimmed: usize, compaction: String },
    /// 恢复动作（格式纠正重试等）
    Recovery { action: String, detail: String },
    /// 最终回复的一小段（流式输出）
    MessageChunk { text: String },
    /// 最终回复结束
    MessageDone,
    /// Token 使用统计（本轮增量 + 累计）
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
        /// 累计 prompt tokens
        cumulative_prompt: u64,
        /// 累计 completion tokens
        cumulative_completion: u64,
        /// 累计 total tokens
        cumulative_total: u64,
    },
    /// 错误
    Error { text: String },
}
