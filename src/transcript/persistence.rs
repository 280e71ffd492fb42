//! 转写持久化
//!
//! 将转写条目写入/从 JSON 文件加载，用于跨进程恢复会话（可选使用）。

use std::path::Path;

use crate::transcript::{Transcript, TranscriptEntry};

/// 单文件 JSON 持久化
#[derive(Debug)]
pub struct TranscriptPersistence {
    path: std::path::PathBuf,
}

impl TranscriptPersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// 从 JSON 文件加载转写；文件不存在时返回空转写
    pub fn load(&self) -> anyhow::Result<Transcript> {
        let mut transcript = Transcript::new();
        if !self.path.exists() {
            return Ok(transcript);
        }
        let data = std::fs::read_to_string(&self.path)?;
        let entries: Vec<TranscriptEntry> = serde_json::from_str(&data)?;
        transcript.set_entries(entries);
        Ok(transcript)
    }

    /// 将转写写入 JSON 文件；父目录不存在时自动创建
    pub fn save(&self, transcript: &Transcript) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(
            &self.path,
            serde_json::to_string_pretty(transcript.entries())?,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::CallResult;

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session").join("transcript.json");
        let persistence = TranscriptPersistence::new(&path);

        let mut t = Transcript::new();
        t.push(TranscriptEntry::user("hi"));
        t.push(TranscriptEntry::planner("hello"));
        t.push(TranscriptEntry::tool_result(CallResult::success("c1", "echo", "hi")));
        persistence.save(&t).unwrap();

        let loaded = persistence.load().unwrap();
        assert_eq!(loaded.entries(), t.entries());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = TranscriptPersistence::new(dir.path().join("none.json"));
        assert!(persistence.load().unwrap().is_empty());
    }
}
