//! 记忆能力：memory_save / memory_recall
//!
//! memory_save 有副作用但新建记录自动放行（append-only 低风险）；检测到矛盾时
//! 替换审批经 ReplaceApprover（通常接审批门）裁决，因此标记 suspends_for_approval，
//! Invoker 不对其施加超时。memory_recall 只读，无需审批。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::capability::Capability;
use crate::core::CapabilityError;
use crate::memory::{MemoryLifecycle, ReplaceApprover};

/// 记忆保存能力：驱动 propose → (审批) → 落盘 的完整状态机
pub struct MemorySaveCapability {
    lifecycle: Arc<MemoryLifecycle>,
    approver: Arc<dyn ReplaceApprover>,
}

impl MemorySaveCapability {
    pub fn new(lifecycle: Arc<MemoryLifecycle>, approver: Arc<dyn ReplaceApprover>) -> Self {
        Self { lifecycle, approver }
    }
}

#[async_trait]
impl Capability for MemorySaveCapability {
    fn name(&self) -> &str {
        "memory_save"
    }

    fn description(&self) -> &str {
        "Save a short durable fact. Args: {\"content\": \"the fact\", \"tags\": [\"category\", ...]}. \
         Conflicting facts trigger a replace request that needs approval."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "Short fact to remember" },
                "tags": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Category tags; conflict detection is scoped by shared tags"
                }
            },
            "required": ["content"]
        })
    }

    fn output_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "outcome": { "type": "string", "enum": ["created", "replaced", "kept_both", "rejected"] }
            }
        })
    }

    fn side_effects(&self) -> bool {
        true
    }

    /// 新建记录 append-only、低风险，调用本身自动放行；
    /// 真正需要人工裁决的是替换，由 ReplaceApprover 在执行中把关
    fn requires_approval(&self) -> bool {
        false
    }

    fn suspends_for_approval(&self) -> bool {
        true
    }

    async fn invoke(&self, args: Value) -> Result<String, CapabilityError> {
        let content = args.get("content").and_then(|v| v.as_str()).unwrap_or("");
        let tags: Vec<String> = args
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|t| t.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let report = self
            .lifecycle
            .save(content, tags, self.approver.as_ref())
            .await
            .map_err(|e| CapabilityError::Transient(e.to_string()))?;

        serde_json::to_string(&report)
            .map_err(|e| CapabilityError::Transient(format!("report serialization: {}", e)))
    }
}

/// 记忆检索能力（只读）
pub struct MemoryRecallCapability {
    lifecycle: Arc<MemoryLifecycle>,
    max_results: usize,
}

impl MemoryRecallCapability {
    pub fn new(lifecycle: Arc<MemoryLifecycle>, max_results: usize) -> Self {
        Self {
            lifecycle,
            max_results,
        }
    }
}

#[async_trait]
impl Capability for MemoryRecallCapability {
    fn name(&self) -> &str {
        "memory_recall"
    }

    fn description(&self) -> &str {
        "Recall saved facts matching a query (case-insensitive over content and tags, newest first). \
         Args: {\"query\": \"search text\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search text" }
            },
            "required": ["query"]
        })
    }

    fn side_effects(&self) -> bool {
        false
    }

    async fn invoke(&self, args: Value) -> Result<String, CapabilityError> {
        let query = args.get("query").and_then(|v| v.as_str()).unwrap_or("");
        let hits = self.lifecycle.recall(query);
        let listing: Vec<serde_json::Value> = hits
            .iter()
            .take(self.max_results)
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "content": r.content,
                    "tags": r.tags,
                })
            })
            .collect();
        serde_json::to_string(&listing)
            .map_err(|e| CapabilityError::Transient(format!("listing serialization: {}", e)))
    }
}
