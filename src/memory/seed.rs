//! 种子导入：从 TOML 文件批量写入偏好与洞察（启动引导用）
//!
//! 偏好走 upsert；洞察若已有同类型同内容的记录则跳过，重复引导不会堆出重复行。

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::insights::InsightKind;
use super::preferences::DEFAULT_CONFIDENCE;
use super::store::MemoryStore;
use crate::core::{MemoryError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub preferences: Vec<SeedPreference>,
    #[serde(default)]
    pub insights: Vec<SeedInsight>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedPreference {
    pub category: String,
    pub key: String,
    pub value: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedInsight {
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// 导入结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub preferences_upserted: usize,
    pub insights_added: usize,
    pub insights_skipped: usize,
}

impl SeedFile {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| MemoryError::validation(format!("invalid seed file: {err}")))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }
}

/// 按公开接口逐条写入；任一条校验失败即中止并返回错误（之前已写入的条目保留）
pub fn apply(store: &MemoryStore, seed: &SeedFile) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    let preferences = store.preferences();
    for pref in &seed.preferences {
        preferences.upsert(&pref.category, &pref.key, &pref.value, pref.confidence)?;
        report.preferences_upserted += 1;
    }

    let insights = store.insights();
    for insight in &seed.insights {
        if insights.exists(insight.kind, &insight.content)? {
            report.insights_skipped += 1;
            continue;
        }
        let tags: Vec<&str> = insight.tags.iter().map(String::as_str).collect();
        insights.add(insight.kind, &insight.content, &tags)?;
        report.insights_added += 1;
    }

    tracing::info!(
        preferences = report.preferences_upserted,
        insights_added = report.insights_added,
        insights_skipped = report.insights_skipped,
        "seed applied"
    );
    Ok(report)
}
