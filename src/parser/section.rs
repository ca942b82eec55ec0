//! 答案区切分
//!
//! 把规范化文本切成题目区和可选的答案/解析区。
//! 先找标题行（answer key / answers / explanations / rationales），
//! 找不到再用统计扫描兜底；两者都不命中时整个文档都是题目区。

use regex::Regex;
use std::sync::LazyLock;

/// 答案区标题行，前 20% 的匹配视为目录噪声忽略
static ANSWER_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\n[ ]*(?:answer key|answers and explanations|answers|explanations|rationales)\b")
        .unwrap()
});

/// 形如 `12) Answer: B`、`3. C` 的答案行
static ANSWER_LIKE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[ ]*(?:q(?:uestion)?[ ]*)?\d{1,3}[ ]*[)\.:\-]?[ ]*(?:answer[ ]*[:\-][ ]*)?[A-F]\b")
        .unwrap()
});

/// 标题搜索的位置下限（文档长度占比）
const HEADING_MIN_POSITION: f64 = 0.2;
/// 统计扫描的起始位置（行数占比）
const SCAN_START_FRACTION: f64 = 0.35;
/// 统计扫描窗口行数
const SCAN_WINDOW: usize = 8;
/// 窗口内判定为答案区所需的答案行数
const SCAN_MIN_HITS: usize = 4;

/// 切分结果，两个区都已 trim
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionSplit {
    pub question_section: String,
    pub answer_section: String,
}

/// 把规范化文本切成题目区 + 答案区
///
/// 没有答案区是常见合法情况，此时答案区为空串。
pub fn split_sections(text: &str) -> SectionSplit {
    let answer_start = find_heading_start(text).or_else(|| find_statistical_start(text));

    match answer_start {
        Some(idx) => SectionSplit {
            question_section: text[..idx].trim().to_string(),
            answer_section: text[idx..].trim().to_string(),
        },
        None => SectionSplit {
            question_section: text.trim().to_string(),
            answer_section: String::new(),
        },
    }
}

/// 标题行检测：取位置约束内最早的匹配
fn find_heading_start(text: &str) -> Option<usize> {
    let min_pos = (text.len() as f64 * HEADING_MIN_POSITION) as usize;

    ANSWER_HEADING_RE
        .find_iter(text)
        .map(|m| m.start())
        .find(|&idx| idx > min_pos)
}

/// 统计兜底：从 35% 行位置起，找第一个 8 行窗口内
/// 至少有 4 行长得像答案行的位置
fn find_statistical_start(text: &str) -> Option<usize> {
    let lines: Vec<&str> = text.split('\n').collect();
    let start = (lines.len() as f64 * SCAN_START_FRACTION) as usize;

    for i in start..lines.len() {
        let window_end = (i + SCAN_WINDOW).min(lines.len());
        let hits = lines[i..window_end]
            .iter()
            .filter(|line| ANSWER_LIKE_LINE_RE.is_match(line))
            .count();

        if hits >= SCAN_MIN_HITS {
            // 行号换算为字节偏移（前 i 行 + 分隔换行）
            let offset: usize = lines[..i].iter().map(|l| l.len() + 1).sum();
            return Some(offset.saturating_sub(1));
        }
    }

    None
}
