//! 文档到测验的解析流水线
//!
//! 纯同步转换：文本进、Quiz 出。无共享可变状态、无 I/O、不抛错——
//! 解析不出来的块直接丢弃，切分不出答案区就把全文当题目区。
//! 各阶段顺序：
//!
//! 规范化 → 区域切分 → {题目提取 → 块解析} ∪ {答案解析} → 合并 → Quiz

pub mod answers;
pub mod block;
pub mod extract;
pub mod images;
pub mod merge;
pub mod normalize;
pub mod section;

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{ParsingStats, Quiz};

pub use answers::{AnswerEntry, AnswerMap, AnswerToken};
pub use normalize::normalize_whitespace;
pub use section::{split_sections, SectionSplit};

/// 标题推断时跳过的题目标记行（`Question 1` / `Q1` / `1)` / `1.`）
static TITLE_SKIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:(?:question|q)[ ]*\d+|\d{1,3}[ ]*[)\.])").unwrap());

/// 标题最大长度
const TITLE_MAX_LEN: usize = 120;

/// 从原始提取文本构建一份测验
///
/// 这是解析子系统唯一的入口。对独立文档可以并发调用，互不协调。
pub fn build_quiz_from_text(raw_text: &str) -> Quiz {
    let text = normalize_whitespace(raw_text);
    let sections = split_sections(&text);

    let mut questions = extract::extract_questions(&sections.question_section);

    let mut answer_map = answers::parse_answer_section(&sections.answer_section);
    if !answers::has_resolved_answers(&answer_map) {
        // a/b 两个策略颗粒无收：顺序兜底按位置补齐，
        // 已恢复的纯解析条目保留（并集合并）
        let sequential = answers::parse_sequential_answers(&sections.answer_section, &questions);
        answers::merge_answer_maps(&mut answer_map, sequential);
    }

    merge::apply_answers(&mut questions, &answer_map);

    let parsing = ParsingStats {
        detected_answer_section: !sections.answer_section.is_empty(),
        total_questions: questions.len(),
        answers_mapped: questions
            .iter()
            .filter(|q| q.correct_option.is_some())
            .count(),
        explanations_mapped: questions
            .iter()
            .filter(|q| !q.explanations.is_empty())
            .count(),
    };

    Quiz {
        title: infer_title(&sections.question_section),
        questions,
        parsing,
    }
}

/// 标题推断：题目区前三个非空行里第一个不是题目标记的行
fn infer_title(question_section: &str) -> String {
    let inferred = question_section
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(3)
        .find(|line| !TITLE_SKIP_RE.is_match(line));

    let title = inferred.unwrap_or("Generated Quiz");
    title.chars().take(TITLE_MAX_LEN).collect()
}
