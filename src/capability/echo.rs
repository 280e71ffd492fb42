//! echo 能力：原样返回文本（无副作用，联调与测试用）

use async_trait::async_trait;
use serde_json::Value;

use crate::capability::Capability;
use crate::core::CapabilityError;

pub struct EchoCapability;

#[async_trait]
impl Capability for EchoCapability {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back. Args: {\"text\": \"any text\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Text to echo back" }
            },
            "required": ["text"]
        })
    }

    fn side_effects(&self) -> bool {
        false
    }

    async fn invoke(&self, args: Value) -> Result<String, CapabilityError> {
        let text = args.get("text").and_then(|v| v.as_str()).unwrap_or("");
        Ok(text.to_string())
    }
}
