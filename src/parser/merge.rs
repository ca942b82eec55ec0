//! 答案合并与题型定型
//!
//! 把答案映射套到已解析的题目上：
//! 1. 先做一类窄修复（leading-option-recovery）：答案键引用的选项
//!    被块解析器误并进题干时，把题干尾部的冒号子句拆回成首个选项
//! 2. 解析最终的 `correct_options`（数组 → 单值 → 布尔记号）
//! 3. 回填文档解析文本及其来源标记
//! 4. 定型题目类型（multi_select / true_false / single_select）

use regex::Regex;
use std::sync::LazyLock;

use super::answers::AnswerMap;
use super::extract::is_likely_question_start;
use crate::models::{label_at, label_index, ExplanationSource, Question, QuestionOption, QuestionType};

/// 选项文本形如 `True` / `☐ True`
static TRUE_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[ ]*☐?[ ]*true\b").unwrap());
static FALSE_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[ ]*☐?[ ]*false\b").unwrap());

/// 多选题题干提示语
static MULTI_SELECT_CUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)select all that apply|choose all that apply|which\b.*\bare correct|all of the following are true")
        .unwrap()
});

/// 拆回题干子句时用来排除选项标记开头
static OPTION_MARKER_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\(?[A-F]\)?[)\.:\-]").unwrap());

/// 可拆回子句的长度窗口
const RECOVERY_MIN_LEN: usize = 18;
const RECOVERY_MAX_LEN: usize = 260;

/// 把答案映射套到题目上（就地修改），并定型所有题目的类型
pub fn apply_answers(questions: &mut [Question], answer_map: &AnswerMap) {
    for question in questions.iter_mut() {
        if let Some(entry) = answer_map.get(&question.number).cloned() {
            let declared: Vec<String> = if !entry.correct_options.is_empty() {
                entry.correct_options.clone()
            } else {
                question.correct_option.iter().cloned().collect()
            };

            try_recover_leading_option(question, &declared);

            // 数组 → 单值 → 布尔记号
            let mut resolved: Vec<String> = entry
                .correct_options
                .iter()
                .filter(|label| question.has_option(label))
                .cloned()
                .collect();
            if resolved.is_empty() {
                if let Some(value) = entry.boolean_value {
                    let label = resolve_boolean_label(question, value);
                    if question.has_option(&label) {
                        resolved.push(label);
                    }
                }
            }

            if !resolved.is_empty() {
                question.correct_options = resolved;
            } else {
                retain_existing_labels(question);
            }
            question.correct_option = question.correct_options.first().cloned();

            if entry.raw_token.is_some() {
                question.raw_answer_token = entry.raw_token.clone();
            }

            if !entry.explanation.is_empty() {
                question.source_explanation = entry.explanation.clone();
                question.upgrade_explanation_source(ExplanationSource::Document);
                if let Some(correct) = question.correct_option.clone() {
                    question
                        .explanations
                        .entry(correct)
                        .or_insert_with(|| entry.explanation.clone());
                }
            }
        } else {
            // 没有答案条目：内嵌答案也要过一遍标签过滤
            retain_existing_labels(question);
            question.correct_option = question.correct_options.first().cloned();
        }

        question.question_type = classify_question_type(question);
    }
}

/// 最终题型判定
pub fn classify_question_type(question: &Question) -> QuestionType {
    if question.correct_options.len() > 1 {
        return QuestionType::MultiSelect;
    }

    if question.options.len() == 2 {
        let texts: Vec<String> = question
            .options
            .iter()
            .map(|o| o.text.trim().to_ascii_lowercase())
            .collect();
        if texts.contains(&"true".to_string()) && texts.contains(&"false".to_string()) {
            return QuestionType::TrueFalse;
        }
    }

    if MULTI_SELECT_CUE_RE.is_match(&question.stem) {
        return QuestionType::MultiSelect;
    }

    QuestionType::SingleSelect
}

/// 布尔记号落到具体选项标签
///
/// 优先找文本本身写着 True/False 的选项，找不到就按 TRUE→A、FALSE→B
fn resolve_boolean_label(question: &Question, value: bool) -> String {
    let matcher: &Regex = if value { &TRUE_TEXT_RE } else { &FALSE_TEXT_RE };

    question
        .options
        .iter()
        .find(|option| matcher.is_match(&option.text))
        .map(|option| option.label.clone())
        .unwrap_or_else(|| if value { "A".to_string() } else { "B".to_string() })
}

/// 去掉引用了不存在选项的标签
fn retain_existing_labels(question: &mut Question) {
    let labels: Vec<String> = question.options.iter().map(|o| o.label.clone()).collect();
    question.correct_options.retain(|l| labels.contains(l));
}

/// leading-option-recovery
///
/// 仅当：当前 2-5 个选项、声明标签里恰好缺 1 个、缺的正是现有最后
/// 一个选项的下一个顺序标签、且题干尾部有一段长得像选项的冒号子句。
/// 满足时把子句拆成新的 A 选项并顺延重排其余标签。
fn try_recover_leading_option(question: &mut Question, declared: &[String]) {
    if declared.is_empty() {
        return;
    }
    if question.options.len() < 2 || question.options.len() > 5 {
        return;
    }

    let missing: Vec<&String> = declared
        .iter()
        .filter(|label| !question.has_option(label))
        .collect();
    if missing.len() != 1 {
        return;
    }
    let missing_label = missing[0];

    let last_label = match question.options.last() {
        Some(option) => option.label.clone(),
        None => return,
    };
    let expected_next = label_index(&last_label).and_then(|idx| label_at(idx + 1));
    if expected_next != Some(missing_label.as_str()) {
        return;
    }

    let Some(colon_pos) = question.stem.rfind(':') else {
        return;
    };
    let clause = question.stem[colon_pos + 1..].trim().to_string();
    let clause_len = clause.chars().count();

    let looks_like_option = clause_len >= RECOVERY_MIN_LEN
        && clause_len <= RECOVERY_MAX_LEN
        && !clause.ends_with('?')
        && !is_likely_question_start(&clause)
        && clause.contains(' ')
        && !OPTION_MARKER_PREFIX_RE.is_match(&clause);
    if !looks_like_option {
        return;
    }

    question.stem = question.stem[..colon_pos + 1].trim().to_string();

    let mut rebuilt = Vec::with_capacity(question.options.len() + 1);
    rebuilt.push(QuestionOption::new("A", clause));
    rebuilt.append(&mut question.options);
    for (idx, option) in rebuilt.iter_mut().enumerate() {
        if let Some(label) = label_at(idx) {
            option.label = label.to_string();
        }
    }
    question.options = rebuilt;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuestionOption;
    use crate::parser::answers::AnswerEntry;

    fn question_with_options(number: u32, texts: &[&str]) -> Question {
        let mut q = Question::new(number);
        q.stem = format!("Stem {}?", number);
        for (idx, text) in texts.iter().enumerate() {
            q.options
                .push(QuestionOption::new(label_at(idx).unwrap(), *text));
        }
        q
    }

    fn entry_with_labels(labels: &[&str]) -> AnswerEntry {
        AnswerEntry {
            correct_options: labels.iter().map(|l| l.to_string()).collect(),
            raw_token: Some(labels.join(",")),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_answer_applied() {
        let mut questions = vec![question_with_options(1, &["one", "two", "three"])];
        let mut map = AnswerMap::new();
        map.insert(1, entry_with_labels(&["B"]));

        apply_answers(&mut questions, &map);
        assert_eq!(questions[0].correct_option.as_deref(), Some("B"));
        assert_eq!(questions[0].question_type, QuestionType::SingleSelect);
        assert_eq!(questions[0].raw_answer_token.as_deref(), Some("B"));
    }

    #[test]
    fn test_multi_select_from_answer_set() {
        let mut questions = vec![question_with_options(2, &["w", "x", "y", "z"])];
        let mut map = AnswerMap::new();
        map.insert(2, entry_with_labels(&["A", "C"]));

        apply_answers(&mut questions, &map);
        assert_eq!(questions[0].correct_options, vec!["A", "C"]);
        assert_eq!(questions[0].correct_option.as_deref(), Some("A"));
        assert_eq!(questions[0].question_type, QuestionType::MultiSelect);
    }

    #[test]
    fn test_true_false_type_from_option_texts() {
        let mut questions = vec![question_with_options(3, &["True", "False"])];
        apply_answers(&mut questions, &AnswerMap::new());
        assert_eq!(questions[0].question_type, QuestionType::TrueFalse);
    }

    #[test]
    fn test_boolean_token_resolution() {
        let mut questions = vec![question_with_options(4, &["False", "True"])];
        let mut map = AnswerMap::new();
        map.insert(
            4,
            AnswerEntry {
                boolean_value: Some(true),
                raw_token: Some("TRUE".into()),
                ..Default::default()
            },
        );

        apply_answers(&mut questions, &map);
        // True 文本在 B 位：按文本匹配而非默认映射
        assert_eq!(questions[0].correct_option.as_deref(), Some("B"));
        assert_eq!(questions[0].question_type, QuestionType::TrueFalse);
    }

    #[test]
    fn test_boolean_default_mapping() {
        let mut questions = vec![question_with_options(5, &["yes", "no"])];
        let mut map = AnswerMap::new();
        map.insert(
            5,
            AnswerEntry {
                boolean_value: Some(false),
                ..Default::default()
            },
        );

        apply_answers(&mut questions, &map);
        assert_eq!(questions[0].correct_option.as_deref(), Some("B"));
    }

    #[test]
    fn test_multi_select_cue_in_stem() {
        let mut q = question_with_options(6, &["a", "b", "c"]);
        q.stem = "Which of the following apply? Select all that apply.".into();
        let mut questions = vec![q];
        apply_answers(&mut questions, &AnswerMap::new());
        assert_eq!(questions[0].question_type, QuestionType::MultiSelect);
    }

    #[test]
    fn test_explanation_seeded_on_correct_option() {
        let mut questions = vec![question_with_options(7, &["one", "two"])];
        let mut map = AnswerMap::new();
        map.insert(
            7,
            AnswerEntry {
                correct_options: vec!["A".into()],
                explanation: "Because of the underlying physiology.".into(),
                raw_token: Some("A".into()),
                ..Default::default()
            },
        );

        apply_answers(&mut questions, &map);
        let q = &questions[0];
        assert_eq!(q.source_explanation, "Because of the underlying physiology.");
        assert_eq!(q.explanation_source, ExplanationSource::Document);
        assert_eq!(
            q.explanations.get("A").map(String::as_str),
            Some("Because of the underlying physiology.")
        );
    }

    #[test]
    fn test_leading_option_recovery() {
        let mut q = question_with_options(8, &["Lisinopril", "Metoprolol", "Amlodipine"]);
        q.stem = "A 52-year-old man with hypertension. The best initial therapy is: Hydrochlorothiazide daily".into();
        let mut questions = vec![q];
        let mut map = AnswerMap::new();
        map.insert(8, entry_with_labels(&["D"]));

        apply_answers(&mut questions, &map);
        let q = &questions[0];
        // 子句拆成了新的 A 选项，原 A-C 顺延为 B-D
        assert_eq!(q.options.len(), 4);
        assert_eq!(q.options[0].label, "A");
        assert_eq!(q.options[0].text, "Hydrochlorothiazide daily");
        assert_eq!(q.options[3].label, "D");
        assert_eq!(q.options[3].text, "Amlodipine");
        assert_eq!(q.correct_option.as_deref(), Some("D"));
        assert!(q.stem.ends_with("therapy is:"));
    }

    #[test]
    fn test_recovery_requires_exact_successor() {
        // 缺的是 E 而不是 D：不触发
        let mut q = question_with_options(9, &["a", "b", "c"]);
        q.stem = "The best initial therapy for this patient is: Hydrochlorothiazide daily".into();
        let mut questions = vec![q];
        let mut map = AnswerMap::new();
        map.insert(9, entry_with_labels(&["E"]));

        apply_answers(&mut questions, &map);
        assert_eq!(questions[0].options.len(), 3);
        assert_eq!(questions[0].correct_option, None);
    }

    #[test]
    fn test_recovery_skipped_with_six_options() {
        let mut q = question_with_options(10, &["a", "b", "c", "d", "e", "f"]);
        q.stem = "Pick the best answer from the list below: Something colon delimited here".into();
        let mut questions = vec![q];
        let mut map = AnswerMap::new();
        // 全部 6 个选项齐了，答案键却引用不存在的标签——不会再扩
        map.insert(10, entry_with_labels(&["G"]));

        apply_answers(&mut questions, &map);
        assert_eq!(questions[0].options.len(), 6);
    }

    #[test]
    fn test_recovery_skipped_when_two_missing() {
        let mut q = question_with_options(11, &["a", "b"]);
        q.stem = "The next management step in this case is: Observation with repeat imaging".into();
        let mut questions = vec![q];
        let mut map = AnswerMap::new();
        map.insert(11, entry_with_labels(&["C", "D"]));

        apply_answers(&mut questions, &map);
        // 缺 2 个标签：不修复，不合并
        assert_eq!(questions[0].options.len(), 2);
        assert!(questions[0].correct_options.is_empty());
    }

    #[test]
    fn test_unmapped_question_keeps_classification() {
        let mut questions = vec![question_with_options(12, &["one", "two", "three"])];
        apply_answers(&mut questions, &AnswerMap::new());
        assert_eq!(questions[0].correct_option, None);
        assert!(questions[0].correct_options.is_empty());
        assert_eq!(questions[0].question_type, QuestionType::SingleSelect);
    }
}
