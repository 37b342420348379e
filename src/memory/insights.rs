//! 洞察：只追加的分类笔记（目标 / 决策 / 模式 / 背景），可带标签
//!
//! 与偏好不同，洞察代表一次次独立的观察：内容相同也会各自成行，不提供更新与删除。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::schema::Database;
use super::{tags, validate_limit};
use crate::core::{time, MemoryError, Result};

/// 洞察类型（固定四种，落库为小写字符串）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Goal,
    Decision,
    Pattern,
    Context,
}

impl InsightKind {
    pub const ALL: [InsightKind; 4] = [
        InsightKind::Goal,
        InsightKind::Decision,
        InsightKind::Pattern,
        InsightKind::Context,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InsightKind::Goal => "goal",
            InsightKind::Decision => "decision",
            InsightKind::Pattern => "pattern",
            InsightKind::Context => "context",
        }
    }

    /// 检索结果里的标题，如 "Pattern Insight"
    pub fn label(&self) -> String {
        let name = match self {
            InsightKind::Goal => "Goal",
            InsightKind::Decision => "Decision",
            InsightKind::Pattern => "Pattern",
            InsightKind::Context => "Context",
        };
        format!("{name} Insight")
    }
}

impl fmt::Display for InsightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsightKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        InsightKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                MemoryError::validation(format!(
                    "insight type must be one of goal, decision, pattern, context; got {s:?}"
                ))
            })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Insight {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Insight {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind: String = row.get(1)?;
        Ok(Self {
            id: row.get(0)?,
            kind: kind.parse().map_err(|err: MemoryError| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(err))
            })?,
            content: row.get(2)?,
            tags: tags::decode(&row.get::<_, String>(3)?),
            created_at: time::column(row, 4)?,
        })
    }
}

const INSIGHT_COLUMNS: &str = "id, type, content, tags, created_at";

pub struct InsightStore<'a> {
    db: &'a Database,
}

impl<'a> InsightStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// 追加一条洞察（总是新行）
    pub fn add(&self, kind: InsightKind, content: &str, tags: &[&str]) -> Result<Insight> {
        if content.trim().is_empty() {
            return Err(MemoryError::validation("insight content must not be empty"));
        }
        let encoded = tags::encode(tags)?;
        let created_at = time::now();

        self.db.write(|conn| {
            conn.execute(
                "INSERT INTO insights (type, content, tags, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![kind.as_str(), content, encoded, time::to_sql(&created_at)],
            )?;
            let id = conn.last_insert_rowid();
            tracing::debug!(insight_id = id, %kind, "insight added");
            Ok(Insight {
                id,
                kind,
                content: content.to_string(),
                tags: tags::decode(&encoded),
                created_at,
            })
        })
    }

    /// 不过滤时按 (type 升序, created_at 倒序)；按类型过滤时按 created_at 倒序
    pub fn list(&self, kind: Option<InsightKind>) -> Result<Vec<Insight>> {
        self.db.read(|conn| {
            let rows = match kind {
                Some(kind) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {INSIGHT_COLUMNS} FROM insights
                         WHERE type = ?1
                         ORDER BY created_at DESC, id DESC"
                    ))?;
                    let rows = stmt.query_map([kind.as_str()], Insight::from_row)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {INSIGHT_COLUMNS} FROM insights
                         ORDER BY type ASC, created_at DESC, id DESC"
                    ))?;
                    let rows = stmt.query_map([], Insight::from_row)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
            };
            Ok(rows)
        })
    }

    /// 最近的洞察（不分类型），0 返回空，负数报 Validation
    pub fn recent(&self, limit: i64) -> Result<Vec<Insight>> {
        let limit = validate_limit(limit)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INSIGHT_COLUMNS} FROM insights
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?1"
            ))?;
            let rows = stmt.query_map([limit], Insight::from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// 是否已有同类型、同内容的洞察（种子导入去重用）
    pub fn exists(&self, kind: InsightKind, content: &str) -> Result<bool> {
        self.db.read(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM insights WHERE type = ?1 AND content = ?2)",
                params![kind.as_str(), content],
                |row| row.get(0),
            )?)
        })
    }
}
