//! Mock 规划器（用于测试，无需 API）
//!
//! 支持预设脚本：按序弹出预设回复；脚本耗尽后取最后一条 User 消息回显为
//! echo 能力调用，再以最终回复结束，便于本地跑通编排循环。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::planner::PlannerClient;
use crate::transcript::{Message, Role};

/// Mock 客户端：scripted 模式按序回放，默认模式回显用户输入
#[derive(Debug, Default)]
pub struct MockPlanner {
    script: Mutex<VecDeque<String>>,
    echoed: AtomicBool,
}

impl MockPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预设回复序列（测试中按调用次序逐条返回）
    pub fn scripted(lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            script: Mutex::new(lines.into_iter().map(Into::into).collect()),
            echoed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PlannerClient for MockPlanner {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Some(line) = self.script.lock().unwrap().pop_front() {
            return Ok(line);
        }

        // 脚本耗尽：第一次回显为 echo 调用，之后给最终回复
        if !self.echoed.swap(true, Ordering::SeqCst) {
            let last_user = messages
                .iter()
                .rev()
                .find(|m| matches!(m.role, Role::User))
                .map(|m| m.content.as_str())
                .unwrap_or("(no input)");
            return Ok(format!(
                r#"{{"calls": [{{"id": "m1", "capability": "echo", "args": {{"text": "Echo from Mock: {}"}}}}]}}"#,
                last_user.replace('"', "'")
            ));
        }

        Ok(r#"{"response": "(mock) 处理完毕"}"#.to_string())
    }
}
