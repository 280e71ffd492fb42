//! 规划器输出解析
//!
//! 从文本中提取 JSON 并解析为 Step：{"response": "...", "calls": [{"id","capability","args"}]}。
//! calls 非空即提议调用（可带 response 作为过程说明）；无 JSON 或 calls 为空则视为最终回复。

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 规划器提议的一次能力调用；创建后不可变。
/// call_id 由规划器指派，轮次内唯一；被拒后重提是携带新 id 的新调用。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedCall {
    pub id: String,
    pub capability: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// 单次规划器调用的产出
#[derive(Debug, Clone)]
pub enum PlannerOutput {
    /// 最终回复，轮次结束
    Final(String),
    /// 提议调用（可附过程说明）
    Step {
        commentary: Option<String>,
        calls: Vec<ProposedCall>,
    },
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    calls: Vec<ProposedCall>,
}

/// 解析规划器输出：提取 JSON 块（```json 围栏或裸大括号）；
/// 无 JSON 则整体视为最终回复；JSON 损坏返回 JsonParseError（由循环注入纠正提示重试）。
pub fn parse_planner_output(output: &str) -> Result<PlannerOutput, AgentError> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            &trimmed[start..=end]
        } else {
            trimmed
        }
    } else {
        return Ok(PlannerOutput::Final(trimmed.to_string()));
    };

    let parsed: RawStep = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;

    if parsed.calls.is_empty() {
        let text = parsed
            .response
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| trimmed.to_string());
        return Ok(PlannerOutput::Final(text));
    }

    for call in &parsed.calls {
        if call.id.trim().is_empty() || call.capability.trim().is_empty() {
            return Err(AgentError::JsonParseError(format!(
                "call with empty id or capability: {}",
                json_str
            )));
        }
    }

    Ok(PlannerOutput::Step {
        commentary: parsed.response.filter(|r| !r.trim().is_empty()),
        calls: parsed.calls,
    })
}
