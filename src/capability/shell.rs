//! shell 能力：白名单命令，禁止危险操作
//!
//! 有副作用、需审批；白名单内的命令（首词，如 ls、grep、cargo）通过放行模式自动放行，
//! 白名单外的命令直接拒绝。禁止 rm -rf、chmod 777 等子串。执行通过 sh -c / cmd /C。

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::capability::Capability;
use crate::core::CapabilityError;

/// 禁止的命令/子串（即使白名单中有同名，也不允许带这些参数）
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "rm -r",
    "wget ",
    "curl | sh",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    ":(){ :|:& };:", // fork bomb
];

/// shell 能力：仅放行白名单内命令，其余需人工审批
pub struct ShellCapability {
    allowed_commands: HashSet<String>,
    /// 放行模式源串（由白名单拼出，注册时编译）
    allow_pattern: String,
}

impl ShellCapability {
    pub fn new(allowed_commands: Vec<String>) -> Self {
        let allowed: HashSet<String> = allowed_commands
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect();
        let mut names: Vec<String> = allowed.iter().map(|s| regex::escape(s)).collect();
        names.sort();
        // 规范化调用串形如 "shell ls -la"，首词命中白名单即放行
        let allow_pattern = format!("^shell (?:{})(?:\\s|$)", names.join("|"));
        Self {
            allowed_commands: allowed,
            allow_pattern,
        }
    }

    /// 解析命令：只取第一个 token 作为命令名
    fn command_name<'a>(&self, raw: &'a str) -> &'a str {
        raw.split_whitespace().next().unwrap_or("")
    }

    fn check(&self, raw: &str) -> Result<(), CapabilityError> {
        let raw_lower = raw.to_lowercase();
        for forbidden in FORBIDDEN_SUBSTR {
            if raw_lower.contains(forbidden) {
                return Err(CapabilityError::PermissionDenied(format!(
                    "Forbidden pattern: {}",
                    forbidden
                )));
            }
        }
        if self.command_name(&raw_lower).is_empty() {
            return Err(CapabilityError::Invalid("Empty command".to_string()));
        }
        Ok(())
    }

    pub fn is_allowlisted(&self, raw: &str) -> bool {
        self.allowed_commands
            .contains(self.command_name(&raw.to_lowercase()))
    }
}

#[async_trait]
impl Capability for ShellCapability {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command. Allowlisted read-only commands run without approval; anything else waits for approval."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    fn side_effects(&self) -> bool {
        true
    }

    fn requires_approval(&self) -> bool {
        true
    }

    fn allow_pattern(&self) -> Option<&str> {
        Some(&self.allow_pattern)
    }

    async fn invoke(&self, args: Value) -> Result<String, CapabilityError> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        self.check(command)?;

        tracing::info!(command = %command, "shell invoke");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };

        let output = cmd
            .output()
            .await
            .map_err(|e| CapabilityError::Transient(format!("Execution failed: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(CapabilityError::Invalid(format!(
                "Exit {:?}\nstderr: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(if stderr.is_empty() {
            stdout
        } else {
            format!("{}\nstderr: {}", stdout.trim(), stderr.trim())
        })
    }
}
