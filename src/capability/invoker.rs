//! 能力调用器
//!
//! 持有 CapabilityRegistry 与全局超时，invoke(name, args) 在超时内调用能力，
//! 超时转为 CapabilityError::Timeout；每次调用输出结构化审计日志（JSON）。
//! 标记 suspends_for_approval 的能力不施加超时：审批等待是唯一允许的无限挂起点。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::capability::CapabilityRegistry;
use crate::core::CapabilityError;

/// 能力调用器：统一超时与审计
pub struct CapabilityInvoker {
    registry: Arc<CapabilityRegistry>,
    timeout: Duration,
}

impl CapabilityInvoker {
    pub fn new(registry: Arc<CapabilityRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// 执行指定能力；未注册返回 NotFound，超时返回 Timeout；输出 JSON 审计日志
    pub async fn invoke(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<String, CapabilityError> {
        let Some(capability) = self.registry.get(name) else {
            return Err(CapabilityError::NotFound(name.to_string()));
        };
        let unbounded = self
            .registry
            .contract(name)
            .map(|c| c.suspends_for_approval)
            .unwrap_or(false);

        let start = Instant::now();
        let args_preview = args_preview(&args);

        let result = if unbounded {
            capability.invoke(args).await
        } else {
            match timeout(self.timeout, capability.invoke(args)).await {
                Ok(r) => r,
                Err(_) => Err(CapabilityError::Timeout(self.timeout.as_secs())),
            }
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "capability_audit",
            "capability": name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "capability");

        result
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Sleepy;

    #[async_trait]
    impl Capability for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "sleeps longer than the invoker allows"
        }
        fn side_effects(&self) -> bool {
            false
        }
        async fn invoke(&self, _args: Value) -> Result<String, CapabilityError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn test_unknown_capability_is_not_found() {
        let invoker = CapabilityInvoker::new(Arc::new(CapabilityRegistry::new()), 1);
        let err = invoker.invoke("nope", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, CapabilityError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timeout_error() {
        let mut reg = CapabilityRegistry::new();
        reg.register(Sleepy).unwrap();
        let invoker = CapabilityInvoker::new(Arc::new(reg), 1);
        let err = invoker.invoke("sleepy", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err, CapabilityError::Timeout(1));
    }
}
