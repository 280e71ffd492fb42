//! 沙箱文件系统能力
//!
//! SafeFs 绑定 root_dir，所有路径经 resolve 校验必须在 root 下（禁止 ../ 逃逸）；
//! list_files / read_file 基于 SafeFs，均为只读、无副作用。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::capability::Capability;
use crate::core::CapabilityError;

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    /// 检查路径是否在沙箱内
    pub fn resolve(&self, path: &str) -> Result<PathBuf, CapabilityError> {
        let path = path.trim_start_matches("./");
        let full = self.root_dir.join(path);
        let canonical = full
            .canonicalize()
            .map_err(|_| CapabilityError::Invalid(format!("Path not found: {}", path)))?;
        let root_canon = self
            .root_dir
            .canonicalize()
            .unwrap_or_else(|_| self.root_dir.clone());
        if canonical.starts_with(root_canon) {
            Ok(canonical)
        } else {
            // 如 ../../etc/passwd
            Err(CapabilityError::PermissionDenied(format!(
                "Path escapes workspace: {}",
                path
            )))
        }
    }

    pub fn read_file(&self, path: &str) -> Result<String, CapabilityError> {
        let resolved = self.resolve(path)?;
        std::fs::read_to_string(&resolved)
            .map_err(|e| CapabilityError::Transient(format!("Read failed: {}", e)))
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, CapabilityError> {
        let base = if path.is_empty() || path == "." {
            self.root_dir.clone()
        } else {
            self.resolve(path)?
        };
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base)
            .map_err(|e| CapabilityError::Transient(format!("List failed: {}", e)))?
        {
            let e = e.map_err(|e| CapabilityError::Transient(e.to_string()))?;
            let name = e.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                let ty = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    "/"
                } else {
                    ""
                };
                entries.push(format!("{}{}", name, ty));
            }
        }
        entries.sort();
        Ok(entries)
    }
}

/// list_files 能力：列出目录
pub struct ListFilesCapability {
    fs: SafeFs,
}

impl ListFilesCapability {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Capability for ListFilesCapability {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List directory. Args: {\"path\": \"directory path, default '.'\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory path relative to workspace" }
            },
            "required": []
        })
    }

    fn side_effects(&self) -> bool {
        false
    }

    async fn invoke(&self, args: Value) -> Result<String, CapabilityError> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        tracing::info!(path = %path, "list_files invoke");
        let entries = self.fs.list_dir(path)?;
        Ok(entries.join("\n"))
    }
}

/// read_file 能力：读取文件内容
pub struct ReadFileCapability {
    fs: SafeFs,
}

impl ReadFileCapability {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Capability for ReadFileCapability {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read file contents. Args: {\"path\": \"file path relative to workspace\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path relative to workspace" }
            },
            "required": ["path"]
        })
    }

    fn side_effects(&self) -> bool {
        false
    }

    async fn invoke(&self, args: Value) -> Result<String, CapabilityError> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("");
        tracing::info!(path = %path, "read_file invoke");
        self.fs.read_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_escape_is_permission_denied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("inner")).unwrap();
        let fs = SafeFs::new(dir.path().join("inner"));
        let err = fs.resolve("../..").unwrap_err();
        assert!(matches!(err, CapabilityError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_list_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let cap = ListFilesCapability::new(dir.path());
        let out = cap.invoke(serde_json::json!({})).await.unwrap();
        assert_eq!(out, "a.txt\nb.txt");
    }
}
