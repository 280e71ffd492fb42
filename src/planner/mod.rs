//! 规划器层：客户端抽象与实现、输出解析、Planner 封装

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod output;
pub mod traits;

use std::sync::Arc;

pub use deepseek::{create_deepseek_planner, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT};
pub use mock::MockPlanner;
pub use openai::{OpenAiPlanner, TokenUsage};
pub use output::{parse_planner_output, PlannerOutput, ProposedCall};
pub use traits::PlannerClient;

use crate::config::PlannerSection;
use crate::core::AgentError;
use crate::transcript::Message;

/// 按配置创建规划器客户端：deepseek（默认）/ openai / mock
pub fn create_planner_from_config(cfg: &PlannerSection) -> Arc<dyn PlannerClient> {
    match cfg.provider.as_str() {
        "mock" => Arc::new(MockPlanner::new()),
        "openai" => Arc::new(OpenAiPlanner::new(cfg.base_url.as_deref(), &cfg.model, None)),
        _ => Arc::new(create_deepseek_planner(Some(&cfg.model))),
    }
}

/// Planner：持有客户端与基础 system prompt，负责 plan（拼 system + messages 后调用）
pub struct Planner {
    client: Arc<dyn PlannerClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(client: Arc<dyn PlannerClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            client,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn base_system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 获取累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.client.token_usage()
    }

    pub async fn plan(&self, messages: &[Message]) -> Result<String, AgentError> {
        self.plan_with_system(messages, &self.system_prompt).await
    }

    /// 使用动态拼接的 system（含能力清单、调用格式 schema 等）
    pub async fn plan_with_system(
        &self,
        messages: &[Message],
        system: &str,
    ) -> Result<String, AgentError> {
        let mut full_messages = vec![Message::system(system.to_string())];
        full_messages.extend(messages.to_vec());
        self.client
            .complete(&full_messages)
            .await
            .map_err(AgentError::PlannerError)
    }

    pub fn client(&self) -> Arc<dyn PlannerClient> {
        Arc::clone(&self.client)
    }
}
