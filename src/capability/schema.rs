//! 提议调用 JSON Schema 生成（schemars 自动生成）
//!
//! 用于将「合法 step 输出」的 JSON 结构注入 system prompt，减少规划器输出格式错误。

use schemars::{schema_for, JsonSchema};
use std::collections::HashMap;

/// 单个提议调用的格式（仅用于 Schema 生成，运行时解析见 planner::output）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct CallFormat {
    /// 调用 id，轮次内唯一，由规划器指派（如 c1、c2）
    pub id: String,
    /// 能力名，如 list_files、echo、shell、send_message
    pub capability: String,
    /// 能力参数，依能力不同而不同（path、command、text 等）
    pub args: HashMap<String, String>,
}

/// 规划器单步输出格式：response 与 calls 至少一个非空
#[allow(dead_code)]
#[derive(JsonSchema)]
struct StepFormat {
    /// 最终回复或过程说明；calls 为空时即为最终回复
    pub response: Option<String>,
    /// 本步提议的能力调用（相互独立的可并发；有依赖的留到下一步）
    pub calls: Vec<CallFormat>,
}

/// 返回 step 输出的 JSON Schema 字符串，可拼入 system prompt
pub fn step_schema_json() -> String {
    let schema = schema_for!(StepFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}
