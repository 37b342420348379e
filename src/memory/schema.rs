//! 存储层：SQLite 表结构、FTS5 影子索引与同步触发器
//!
//! - conversations / messages / preferences / insights 四张主表
//! - messages_fts（content）、insights_fts（content, tags）为 external-content FTS5 表，
//!   由 AFTER INSERT / DELETE / UPDATE 触发器在同一事务内维护，调用方无法跳过
//! - 每次操作打开一个短连接，用完即释放；写操作走 IMMEDIATE 事务
//! - 表结构版本记录在 `PRAGMA user_version`

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use serde::Serialize;

use crate::core::{MemoryError, Result};

pub const SCHEMA_VERSION: i64 = 1;

/// v1 表结构；全部 IF NOT EXISTS，重复执行无副作用
const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    title       TEXT    NOT NULL CHECK (length(trim(title)) > 0),
    started_at  TEXT    NOT NULL,
    ended_at    TEXT,
    summary     TEXT,
    tags        TEXT    NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_conversations_started
    ON conversations(started_at DESC, id DESC);

CREATE TABLE IF NOT EXISTS messages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL
                    REFERENCES conversations(id) ON DELETE RESTRICT,
    role            TEXT    NOT NULL CHECK (role IN ('user', 'assistant')),
    content         TEXT    NOT NULL CHECK (length(trim(content)) > 0),
    created_at      TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(conversation_id, created_at, id);

CREATE TABLE IF NOT EXISTS preferences (
    category    TEXT NOT NULL CHECK (length(trim(category)) > 0),
    key         TEXT NOT NULL CHECK (length(trim(key)) > 0),
    value       TEXT NOT NULL,
    confidence  REAL NOT NULL DEFAULT 1.0,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (category, key)
);

CREATE TABLE IF NOT EXISTS insights (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    type        TEXT NOT NULL CHECK (type IN ('goal', 'decision', 'pattern', 'context')),
    content     TEXT NOT NULL CHECK (length(trim(content)) > 0),
    tags        TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_insights_type_created
    ON insights(type, created_at DESC, id DESC);

CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
    content,
    content='messages',
    content_rowid='id'
);
CREATE TRIGGER IF NOT EXISTS messages_ai AFTER INSERT ON messages BEGIN
    INSERT INTO messages_fts(rowid, content) VALUES (new.id, new.content);
END;
CREATE TRIGGER IF NOT EXISTS messages_ad AFTER DELETE ON messages BEGIN
    INSERT INTO messages_fts(messages_fts, rowid, content)
    VALUES ('delete', old.id, old.content);
END;
CREATE TRIGGER IF NOT EXISTS messages_au AFTER UPDATE ON messages BEGIN
    INSERT INTO messages_fts(messages_fts, rowid, content)
    VALUES ('delete', old.id, old.content);
    INSERT INTO messages_fts(rowid, content) VALUES (new.id, new.content);
END;

CREATE VIRTUAL TABLE IF NOT EXISTS insights_fts USING fts5(
    content,
    tags,
    content='insights',
    content_rowid='id'
);
CREATE TRIGGER IF NOT EXISTS insights_ai AFTER INSERT ON insights BEGIN
    INSERT INTO insights_fts(rowid, content, tags) VALUES (new.id, new.content, new.tags);
END;
CREATE TRIGGER IF NOT EXISTS insights_ad AFTER DELETE ON insights BEGIN
    INSERT INTO insights_fts(insights_fts, rowid, content, tags)
    VALUES ('delete', old.id, old.content, old.tags);
END;
CREATE TRIGGER IF NOT EXISTS insights_au AFTER UPDATE ON insights BEGIN
    INSERT INTO insights_fts(insights_fts, rowid, content, tags)
    VALUES ('delete', old.id, old.content, old.tags);
    INSERT INTO insights_fts(rowid, content, tags) VALUES (new.id, new.content, new.tags);
END;
";

/// 影子索引表名（FTS5 控制命令与统计共用）
const FTS_TABLES: [&str; 2] = ["messages_fts", "insights_fts"];

/// 各表行数与索引条目数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub conversations: i64,
    pub messages: i64,
    pub preferences: i64,
    pub insights: i64,
    pub indexed_messages: i64,
    pub indexed_insights: i64,
}

/// 数据库句柄：只保存路径与连接参数，不长期持有连接
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Database {
    pub fn new(path: impl AsRef<Path>, busy_timeout: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 打开一个短连接；父目录不存在时自动创建
    pub(crate) fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    /// 只读操作
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.connect()?;
        f(&conn)
    }

    /// 写操作：IMMEDIATE 事务，闭包返回 Err 时整体回滚（主表与索引同进同退）
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.read(|conn| Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?))
    }

    /// 幂等初始化：建表、建索引、建触发器并写入版本号；每次进程启动都可调用
    pub fn init(&self) -> Result<()> {
        self.write(|conn| {
            let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
            if current > SCHEMA_VERSION {
                return Err(MemoryError::UnsupportedSchemaVersion {
                    found: current,
                    supported: SCHEMA_VERSION,
                });
            }

            conn.execute_batch(SCHEMA_V1)?;
            if current < SCHEMA_VERSION {
                conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
                tracing::info!(
                    path = %self.path.display(),
                    from = current,
                    to = SCHEMA_VERSION,
                    "memory schema migrated"
                );
            }
            Ok(())
        })
    }

    /// 校验影子索引与主表一致（FTS5 integrity-check），不一致时返回 Storage 错误
    pub fn check_index(&self) -> Result<()> {
        self.read(|conn| {
            for table in FTS_TABLES {
                conn.execute(
                    &format!("INSERT INTO {table}({table}, rank) VALUES ('integrity-check', 1)"),
                    [],
                )?;
            }
            Ok(())
        })
    }

    /// 从主表全量重建影子索引
    pub fn rebuild_index(&self) -> Result<()> {
        self.write(|conn| {
            for table in FTS_TABLES {
                conn.execute(&format!("INSERT INTO {table}({table}) VALUES ('rebuild')"), [])?;
            }
            tracing::info!("search index rebuilt");
            Ok(())
        })
    }

    pub fn stats(&self) -> Result<MemoryStats> {
        self.read(|conn| {
            let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |row| row.get(0))?) };
            Ok(MemoryStats {
                conversations: count("SELECT COUNT(*) FROM conversations")?,
                messages: count("SELECT COUNT(*) FROM messages")?,
                preferences: count("SELECT COUNT(*) FROM preferences")?,
                insights: count("SELECT COUNT(*) FROM insights")?,
                // external-content 表的 COUNT(*) 会读主表，索引条目数以 docsize 影子表为准
                indexed_messages: count("SELECT COUNT(*) FROM messages_fts_docsize")?,
                indexed_insights: count("SELECT COUNT(*) FROM insights_fts_docsize")?,
            })
        })
    }
}
