//! 时间戳：统一为 UTC、微秒精度、定宽 RFC 3339 文本
//!
//! 定宽保证 SQLite 中按字符串排序即按时间排序。

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use super::error::{MemoryError, Result};

/// 当前时间（截断到微秒，与落库精度一致，写入后读回可直接比较）
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| MemoryError::Timestamp(format!("{value}: {err}")))
}

/// 在 rusqlite 行映射闭包里解析时间列
pub(crate) fn column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse(&raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
    })
}

/// 可空时间列
pub(crate) fn opt_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| {
        parse(&value).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
        })
    })
    .transpose()
}
