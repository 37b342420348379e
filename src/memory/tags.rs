//! 标签列表 <-> 逗号分隔字符串

use crate::core::{MemoryError, Result};

pub const TAG_DELIMITER: char = ',';

/// 编码标签：逐个 trim、丢弃空标签、保持顺序；含分隔符的标签直接拒绝
pub fn encode(tags: &[&str]) -> Result<String> {
    let mut cleaned = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        if tag.contains(TAG_DELIMITER) {
            return Err(MemoryError::validation(format!(
                "tag {tag:?} must not contain '{TAG_DELIMITER}'"
            )));
        }
        cleaned.push(tag);
    }
    Ok(cleaned.join(&TAG_DELIMITER.to_string()))
}

pub fn decode(raw: &str) -> Vec<String> {
    raw.split(TAG_DELIMITER)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
