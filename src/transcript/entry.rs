//! 转写条目与调用结果
//!
//! TranscriptEntry 四种变体（用户消息 / 规划器消息 / 工具结果 / 系统注记）；
//! CallResult 以 call_id 关联提议调用，乱序完成时规划器据此对应。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息（发送给规划器的格式）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 调用结局：成功 / 失败（含机器可读 kind）/ 被拒绝
///
/// 拒绝不是错误：规划器收到 denied 后可另提方案；超时与拒绝可区分，重试策略据此分流。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallOutcome {
    Success { payload: String },
    Failure { kind: String, message: String },
    Denied,
}

/// 调用结果：以 call_id 与 ProposedCall 关联
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResult {
    pub call_id: String,
    pub capability: String,
    pub outcome: CallOutcome,
}

impl CallResult {
    pub fn success(call_id: impl Into<String>, capability: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            capability: capability.into(),
            outcome: CallOutcome::Success {
                payload: payload.into(),
            },
        }
    }

    pub fn failure(
        call_id: impl Into<String>,
        capability: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            capability: capability.into(),
            outcome: CallOutcome::Failure {
                kind: kind.into(),
                message: message.into(),
            },
        }
    }

    pub fn denied(call_id: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            capability: capability.into(),
            outcome: CallOutcome::Denied,
        }
    }
}

/// 转写条目
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEntry {
    UserMessage { content: String },
    PlannerMessage { content: String },
    ToolResult { result: CallResult },
    SystemNote { content: String },
}

impl TranscriptEntry {
    pub fn user(content: impl Into<String>) -> Self {
        TranscriptEntry::UserMessage {
            content: content.into(),
        }
    }

    pub fn planner(content: impl Into<String>) -> Self {
        TranscriptEntry::PlannerMessage {
            content: content.into(),
        }
    }

    pub fn tool_result(result: CallResult) -> Self {
        TranscriptEntry::ToolResult { result }
    }

    pub fn note(content: impl Into<String>) -> Self {
        TranscriptEntry::SystemNote {
            content: content.into(),
        }
    }

    /// 负载字节数（条目裁剪按此与 max_bytes_per_entry 比较）
    pub fn payload_bytes(&self) -> usize {
        match self {
            TranscriptEntry::UserMessage { content }
            | TranscriptEntry::PlannerMessage { content }
            | TranscriptEntry::SystemNote { content } => content.len(),
            TranscriptEntry::ToolResult { result } => match &result.outcome {
                CallOutcome::Success { payload } => payload.len(),
                CallOutcome::Failure { message, .. } => message.len(),
                CallOutcome::Denied => 0,
            },
        }
    }

    /// 渲染为单行文本（压缩摘要的输入）
    pub fn render_line(&self) -> String {
        match self {
            TranscriptEntry::UserMessage { content } => format!("User: {}", content),
            TranscriptEntry::PlannerMessage { content } => format!("Planner: {}", content),
            TranscriptEntry::SystemNote { content } => format!("Note: {}", content),
            TranscriptEntry::ToolResult { result } => match &result.outcome {
                CallOutcome::Success { payload } => {
                    format!("Result[{} {}]: {}", result.call_id, result.capability, payload)
                }
                CallOutcome::Failure { kind, message } => format!(
                    "Result[{} {}]: {} ({})",
                    result.call_id, result.capability, message, kind
                ),
                CallOutcome::Denied => {
                    format!("Result[{} {}]: denied", result.call_id, result.capability)
                }
            },
        }
    }
}
