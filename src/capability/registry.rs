//! 能力注册表
//!
//! 所有能力实现 Capability trait，注册时固化为 CapabilityContract（输入/输出 schema、
//! 副作用标记、审批标记、放行模式），启动期校验而非调用期；CapabilityInvoker 调用时
//! 加超时并统一转 CapabilityError。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::core::{AgentError, CapabilityError};

/// 能力 trait：名称、描述（供规划器理解）、schema、副作用/审批标记、异步调用
#[async_trait]
pub trait Capability: Send + Sync {
    /// 能力名称（用于 ProposedCall 的 "capability" 字段）
    fn name(&self) -> &str;

    /// 能力描述（供规划器理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema（供规划器生成正确的参数格式）
    /// 默认返回空对象，表示无参数或参数格式不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 输出 JSON Schema；默认纯文本
    fn output_schema(&self) -> Value {
        serde_json::json!({ "type": "string" })
    }

    /// 是否产生副作用。无副作用的能力永远自动放行，不论审批标记。
    fn side_effects(&self) -> bool {
        true
    }

    /// 有副作用时是否需要人工审批
    fn requires_approval(&self) -> bool {
        self.side_effects()
    }

    /// 放行模式：正则匹配规范化调用串（见 canonical_invocation）即自动放行。
    /// 注册时编译校验。
    fn allow_pattern(&self) -> Option<&str> {
        None
    }

    /// 执行中可能经审批门挂起（如记忆替换审批）；Invoker 对其不施加超时
    fn suspends_for_approval(&self) -> bool {
        false
    }

    /// 执行能力
    async fn invoke(&self, args: Value) -> Result<String, CapabilityError>;
}

/// 能力契约：注册时从 trait 固化的调用契约
#[derive(Clone, Debug)]
pub struct CapabilityContract {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
    pub output_schema: Value,
    pub side_effects: bool,
    pub requires_approval: bool,
    pub allow_pattern: Option<Regex>,
    pub suspends_for_approval: bool,
}

/// 规范化调用串：`<name> <args 值按键序拼接>`，放行模式对其匹配。
/// 如 `{"command": "ls -la"}` 的 shell 调用规范化为 `shell ls -la`。
pub fn canonical_invocation(name: &str, args: &Value) -> String {
    let mut rendered = String::from(name);
    if let Value::Object(map) = args {
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        for key in keys {
            let v = &map[key];
            rendered.push(' ');
            match v.as_str() {
                Some(s) => rendered.push_str(s),
                None => rendered.push_str(&v.to_string()),
            }
        }
    }
    rendered
}

/// 能力注册表：按名称存储契约与实现
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, (CapabilityContract, Arc<dyn Capability>)>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册能力；重名、放行模式无法编译、参数 schema 非对象均为启动期配置错误
    pub fn register(&mut self, capability: impl Capability + 'static) -> Result<(), AgentError> {
        let name = capability.name().to_string();
        if self.capabilities.contains_key(&name) {
            return Err(AgentError::ConfigError(format!(
                "duplicate capability: {}",
                name
            )));
        }
        let params = capability.parameters_schema();
        if !params.is_object() {
            return Err(AgentError::ConfigError(format!(
                "capability {}: parameters schema must be a JSON object",
                name
            )));
        }
        let allow_pattern = match capability.allow_pattern() {
            Some(src) => Some(Regex::new(src).map_err(|e| {
                AgentError::ConfigError(format!("capability {}: bad allow pattern: {}", name, e))
            })?),
            None => None,
        };
        let contract = CapabilityContract {
            name: name.clone(),
            description: capability.description().to_string(),
            parameters_schema: params,
            output_schema: capability.output_schema(),
            side_effects: capability.side_effects(),
            requires_approval: capability.requires_approval(),
            allow_pattern,
            suspends_for_approval: capability.suspends_for_approval(),
        };
        self.capabilities.insert(name, (contract, Arc::new(capability)));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).map(|(_, c)| Arc::clone(c))
    }

    pub fn contract(&self, name: &str) -> Option<&CapabilityContract> {
        self.capabilities.get(name).map(|(contract, _)| contract)
    }

    pub fn names(&self) -> Vec<String> {
        self.capabilities.keys().cloned().collect()
    }

    /// 动态生成能力清单 JSON（含参数 schema 与审批标记），拼入 system prompt
    pub fn to_schema_json(&self) -> String {
        let mut entries: Vec<&CapabilityContract> =
            self.capabilities.values().map(|(c, _)| c).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let list: Vec<serde_json::Value> = entries
            .iter()
            .map(|c| {
                serde_json::json!({
                    "name": c.name,
                    "description": c.description,
                    "parameters": c.parameters_schema,
                    "output": c.output_schema,
                    "requires_approval": c.requires_approval && c.side_effects,
                })
            })
            .collect();
        serde_json::to_string_pretty(&list).unwrap_or_else(|_| "[]".to_string())
    }
}
