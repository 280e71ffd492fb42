//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MANTIS__*` 覆盖（双下划线表示嵌套，
//! 如 `MANTIS__PLANNER__PROVIDER=openai`）。预算在轮次内只读，构造时注入组件。

use std::path::PathBuf;

use serde::Deserialize;

use crate::governor::Budget;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub budget: BudgetSection,
    #[serde(default)]
    pub planner: PlannerSection,
    #[serde(default)]
    pub capabilities: CapabilitiesSection,
    #[serde(default)]
    pub memory: MemorySection,
}

/// [app] 段：应用名、工作目录、轮次步数上限
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// 单轮最大步数
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            workspace_root: None,
            max_steps: default_max_steps(),
        }
    }
}

fn default_max_steps() -> usize {
    12
}

/// [budget] 段：转写预算（治理器）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetSection {
    pub max_messages: usize,
    pub max_bytes_per_entry: usize,
    pub tail_size: usize,
    pub keep_recent_results: usize,
    pub preview_bytes: usize,
}

impl Default for BudgetSection {
    fn default() -> Self {
        let b = Budget::default();
        Self {
            max_messages: b.max_messages,
            max_bytes_per_entry: b.max_bytes_per_entry,
            tail_size: b.tail_size,
            keep_recent_results: b.keep_recent_results,
            preview_bytes: b.preview_bytes,
        }
    }
}

impl BudgetSection {
    pub fn to_budget(&self) -> Budget {
        Budget {
            max_messages: self.max_messages,
            max_bytes_per_entry: self.max_bytes_per_entry,
            tail_size: self.tail_size,
            keep_recent_results: self.keep_recent_results,
            preview_bytes: self.preview_bytes,
        }
    }
}

/// [planner] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlannerSection {
    /// 后端：deepseek / openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: PlannerTimeoutsSection,
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlannerTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

fn default_request_timeout() -> u64 {
    60
}

/// [capabilities] 段：调用超时、并发、重试上限、全量放行开关
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CapabilitiesSection {
    /// 单次能力调用超时（秒）
    #[serde(default = "default_capability_timeout_secs")]
    pub timeout_secs: u64,
    /// 能力并发上限
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// 同一能力一轮内的失败重试上限
    #[serde(default = "default_max_retries")]
    pub max_retries_per_capability: u32,
    /// 会话级全量自动放行（信任/测试模式）
    #[serde(default)]
    pub auto_approve_all: bool,
    #[serde(default)]
    pub shell: ShellSection,
    #[serde(default)]
    pub webhook: WebhookSection,
}

fn default_capability_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    3
}

fn default_max_retries() -> u32 {
    2
}

/// [capabilities.shell] 段：自动放行的命令名（仅首词，如 ls、grep、cargo）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ShellSection {
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
}

fn default_allowed_commands() -> Vec<String> {
    vec![
        "ls".into(),
        "grep".into(),
        "cat".into(),
        "head".into(),
        "tail".into(),
        "wc".into(),
        "find".into(),
        "cargo".into(),
        "rustc".into(),
    ]
}

/// [capabilities.webhook] 段：出站消息 Webhook（未配置则不注册 send_message）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WebhookSection {
    pub url: Option<String>,
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

/// [memory] 段：记录库路径、冲突检测开关、检索条数
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    /// SQLite 文件路径，未设置时用 workspace 下 memory/records.db
    pub db_path: Option<PathBuf>,
    /// 关闭后退化为 append-only（等价于推理调用不可用）
    #[serde(default = "default_conflict_detection")]
    pub conflict_detection: bool,
    #[serde(default = "default_max_recall")]
    pub max_recall: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            db_path: None,
            conflict_detection: default_conflict_detection(),
            max_recall: default_max_recall(),
        }
    }
}

fn default_conflict_detection() -> bool {
    true
}

fn default_max_recall() -> usize {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            budget: BudgetSection::default(),
            planner: PlannerSection::default(),
            capabilities: CapabilitiesSection::default(),
            memory: MemorySection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 MANTIS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MANTIS__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MANTIS")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent_with_budget() {
        let cfg = AppConfig::default();
        let budget = cfg.budget.to_budget();
        assert!(budget.validated().is_ok());
        assert_eq!(cfg.app.max_steps, 12);
        assert!(cfg.memory.conflict_detection);
    }
}
