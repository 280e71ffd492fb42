//! 记忆存储接口与实现
//!
//! RecordStore 对物理格式保持无知：load_records / save_record / update_record，
//! 写操作返回成功前必须落盘。SqliteRecordStore 为默认实现（rusqlite，单文件），
//! InMemoryRecordStore 供测试。

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::memory::MemoryRecord;

/// 持久化接口（由外部存储协作方实现；核心只要求写后即durable）
pub trait RecordStore: Send + Sync {
    fn load_records(&self) -> anyhow::Result<Vec<MemoryRecord>>;
    fn save_record(&self, record: &MemoryRecord) -> anyhow::Result<()>;
    fn update_record(
        &self,
        id: i64,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;
}

/// 内存实现（测试用）
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<Vec<MemoryRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn load_records(&self) -> anyhow::Result<Vec<MemoryRecord>> {
        Ok(self.records.lock().unwrap().clone())
    }

    fn save_record(&self, record: &MemoryRecord) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn update_record(
        &self,
        id: i64,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow::anyhow!("record {} not found", id))?;
        record.content = content.to_string();
        record.updated_at = Some(updated_at);
        Ok(())
    }
}

/// SQLite 实现：单表 records，tags 存 JSON 数组
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                id         INTEGER PRIMARY KEY,
                content    TEXT NOT NULL,
                tags       TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT,
                source     TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl RecordStore for SqliteRecordStore {
    fn load_records(&self) -> anyhow::Result<Vec<MemoryRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, content, tags, created_at, updated_at, source FROM records ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            let tags_json: String = row.get(2)?;
            Ok(MemoryRecord {
                id: row.get(0)?,
                content: row.get(1)?,
                tags: serde_json::from_str(&tags_json).unwrap_or_default(),
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
                source: row.get(5)?,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn save_record(&self, record: &MemoryRecord) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO records (id, content, tags, created_at, updated_at, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.content,
                serde_json::to_string(&record.tags)?,
                record.created_at,
                record.updated_at,
                record.source,
            ],
        )?;
        Ok(())
    }

    fn update_record(
        &self,
        id: i64,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE records SET content = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, content, updated_at],
        )?;
        if changed == 0 {
            anyhow::bail!("record {} not found", id);
        }
        Ok(())
    }
}
