//! send_message 能力：向配置的 Webhook 发送出站消息
//!
//! 有副作用且无放行模式，每次调用都需人工审批。POST JSON {"text": ...}，
//! 2xx 即成功；网络错误与非 2xx 按 Transient 上报（规划器可重试）。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::capability::Capability;
use crate::core::CapabilityError;

pub struct SendMessageCapability {
    url: String,
    client: reqwest::Client,
}

impl SendMessageCapability {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl Capability for SendMessageCapability {
    fn name(&self) -> &str {
        "send_message"
    }

    fn description(&self) -> &str {
        "Send an outbound message to the configured webhook. Args: {\"text\": \"message body\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Message body to deliver" }
            },
            "required": ["text"]
        })
    }

    fn side_effects(&self) -> bool {
        true
    }

    fn requires_approval(&self) -> bool {
        true
    }

    async fn invoke(&self, args: Value) -> Result<String, CapabilityError> {
        let text = args.get("text").and_then(|v| v.as_str()).unwrap_or("");
        if text.is_empty() {
            return Err(CapabilityError::Invalid("empty message text".to_string()));
        }

        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CapabilityError::Transient(format!("webhook timeout: {}", e))
                } else {
                    CapabilityError::Transient(format!("webhook request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CapabilityError::Transient(format!(
                "webhook returned {}",
                status
            )));
        }
        Ok(format!("delivered ({} bytes)", text.len()))
    }
}
