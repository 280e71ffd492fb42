//! summarize 能力：转写压缩摘要
//!
//! 包装规划器客户端；Context Governor 压缩时经 Invoker 调用它，与其他能力共享
//! 同一套超时与失败策略（摘要失败时 Governor 自行降级为硬截断）。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::capability::Capability;
use crate::core::CapabilityError;
use crate::planner::PlannerClient;
use crate::transcript::Message;

pub struct SummarizeCapability {
    client: Arc<dyn PlannerClient>,
}

impl SummarizeCapability {
    pub fn new(client: Arc<dyn PlannerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Capability for SummarizeCapability {
    fn name(&self) -> &str {
        "summarize"
    }

    fn description(&self) -> &str {
        "Summarize a conversation excerpt. Args: {\"text\": \"excerpt to summarize\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Excerpt to summarize" }
            },
            "required": ["text"]
        })
    }

    fn side_effects(&self) -> bool {
        false
    }

    async fn invoke(&self, args: Value) -> Result<String, CapabilityError> {
        let text = args.get("text").and_then(|v| v.as_str()).unwrap_or("");
        if text.trim().is_empty() {
            return Err(CapabilityError::Invalid("nothing to summarize".to_string()));
        }
        let messages = vec![
            Message::system(
                "Summarize the following conversation excerpt in a few sentences. \
                 Keep decisions, facts and open items; drop pleasantries.",
            ),
            Message::user(text.to_string()),
        ];
        let summary = self
            .client
            .complete(&messages)
            .await
            .map_err(CapabilityError::Transient)?;
        if summary.trim().is_empty() {
            return Err(CapabilityError::Transient("empty summary".to_string()));
        }
        Ok(summary)
    }
}
