//! 用户偏好：按 (category, key) 唯一寻址的键值设置
//!
//! 写入一律是 upsert：同一 (category, key) 再写只覆盖 value / confidence / updated_at，
//! created_at 保持首次写入时的值。单条 `INSERT ... ON CONFLICT DO UPDATE` 完成，不会产生重复行。

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::schema::Database;
use crate::core::{time, MemoryError, Result};

pub const DEFAULT_CONFIDENCE: f64 = 1.0;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Preference {
    pub category: String,
    pub key: String,
    pub value: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Preference {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            category: row.get(0)?,
            key: row.get(1)?,
            value: row.get(2)?,
            confidence: row.get(3)?,
            created_at: time::column(row, 4)?,
            updated_at: time::column(row, 5)?,
        })
    }
}

const PREFERENCE_COLUMNS: &str = "category, key, value, confidence, created_at, updated_at";

pub struct PreferenceStore<'a> {
    db: &'a Database,
}

impl<'a> PreferenceStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// 全部偏好（可按 category 过滤），按 (category, key) 升序
    pub fn list(&self, category: Option<&str>) -> Result<Vec<Preference>> {
        self.db.read(|conn| {
            let rows = match category {
                Some(category) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {PREFERENCE_COLUMNS} FROM preferences
                         WHERE category = ?1
                         ORDER BY category ASC, key ASC"
                    ))?;
                    let rows = stmt.query_map([category], Preference::from_row)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {PREFERENCE_COLUMNS} FROM preferences
                         ORDER BY category ASC, key ASC"
                    ))?;
                    let rows = stmt.query_map([], Preference::from_row)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
            };
            Ok(rows)
        })
    }

    /// 插入或更新；返回写入后的完整记录
    pub fn upsert(
        &self,
        category: &str,
        key: &str,
        value: &str,
        confidence: f64,
    ) -> Result<Preference> {
        if category.trim().is_empty() {
            return Err(MemoryError::validation("preference category must not be empty"));
        }
        if key.trim().is_empty() {
            return Err(MemoryError::validation("preference key must not be empty"));
        }
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(MemoryError::validation(format!(
                "confidence must be within [0.0, 1.0], got {confidence}"
            )));
        }
        let now = time::to_sql(&time::now());

        self.db.write(|conn| {
            conn.execute(
                "INSERT INTO preferences (category, key, value, confidence, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(category, key) DO UPDATE SET
                     value = excluded.value,
                     confidence = excluded.confidence,
                     updated_at = excluded.updated_at",
                params![category, key, value, confidence, now],
            )?;
            tracing::debug!(category, key, confidence, "preference upserted");
            let stored = conn.query_row(
                &format!("SELECT {PREFERENCE_COLUMNS} FROM preferences WHERE category = ?1 AND key = ?2"),
                params![category, key],
                Preference::from_row,
            )?;
            Ok(stored)
        })
    }

    /// 精确查找；不存在返回 None
    pub fn get(&self, category: &str, key: &str) -> Result<Option<Preference>> {
        self.db.read(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {PREFERENCE_COLUMNS} FROM preferences WHERE category = ?1 AND key = ?2"),
                    params![category, key],
                    Preference::from_row,
                )
                .optional()?)
        })
    }
}
