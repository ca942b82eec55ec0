//! 单个题目块解析
//!
//! 把一段题目文本转成结构化题目：题干、选项、内嵌答案、图片引用。
//! 三级策略依次兜底：
//! 1. 标准选项行（`A) xxx` / `B. xxx` / `C: xxx`）
//! 2. 行内括号标记（`(A) xxx (B) yyy`）
//! 3. 无标签尾行（题干以 `:`/`?` 结尾，后面跟 2-6 个短行）
//!
//! 三级都凑不够 2 个选项的块由上层丢弃，不报错。

use regex::Regex;
use std::sync::LazyLock;

use super::images::{extract_image_refs, maybe_push_image};
use super::normalize::normalize_whitespace;
use crate::models::{ExplanationSource, Question, QuestionOption, OPTION_LABELS};

/// 标准选项行（标签大写，后跟 `)`/`.`/`:` 加空格）
static OPTION_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ ]*[A-F][)\.:][ ]+").unwrap());

static OPTION_CAPTURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-F])[)\.:][ ]*(.*)$").unwrap());

/// 选项区内嵌的答案行
static ANSWER_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:correct[ ]*answer|answer)[ ]*[:\-][ ]*([A-F])\b").unwrap());

/// 块内任意位置的答案标记
static ANSWER_IN_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:correct[ ]*answer|answer)[ ]*[:\-]?[ ]*([A-F])\b").unwrap());

/// 行内 `(A)` 式选项标记
static INLINE_OPTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(([A-F])\)").unwrap());

/// 无标签尾行选项的最大行长
const UNLABELED_OPTION_MAX_LEN: usize = 140;

/// 该行是否是标准选项行
pub fn is_option_line(line: &str) -> bool {
    OPTION_LINE_RE.is_match(line)
}

/// 剥离行首的选项标记（`A)` / `(B)` / `C.` / `D:` / `E-`）
pub fn strip_leading_option_marker(text: &str) -> String {
    static STRIP_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)^\(?[A-F]\)?[)\.:\-][ ]+").unwrap());
    STRIP_RE.replace(text.trim(), "").trim().to_string()
}

/// 把题干 + 选项文本组装成题目，顺带提取并去重图片引用
///
/// 图片顺序：题干里的在前，选项里的在后。
pub fn question_from_parts(
    number: u32,
    stem: &str,
    options: Vec<QuestionOption>,
    embedded_answer: Option<String>,
) -> Question {
    let extracted_stem = extract_image_refs(stem);
    let mut images = extracted_stem.images;

    let clean_options: Vec<QuestionOption> = options
        .into_iter()
        .map(|option| {
            let extracted = extract_image_refs(&option.text);
            for source in &extracted.images {
                maybe_push_image(&mut images, source);
            }
            QuestionOption::new(option.label, extracted.text)
        })
        .collect();

    let mut question = Question::new(number);
    question.stem = normalize_whitespace(&extracted_stem.text);
    question.images = images;
    question.options = clean_options;
    question.correct_options = embedded_answer.iter().cloned().collect();
    question.correct_option = embedded_answer;
    question.explanation_source = ExplanationSource::None;
    question
}

/// 解析一个编号题目块
pub fn parse_question_block(number: u32, block_text: &str) -> Question {
    let text = block_text.trim();
    let lines: Vec<&str> = text.split('\n').collect();

    let first_option_line = lines.iter().position(|line| is_option_line(line));

    let mut stem = text.to_string();
    let mut options: Vec<QuestionOption> = Vec::new();
    let mut embedded_answer: Option<String> = None;

    if let Some(first) = first_option_line {
        stem = normalize_whitespace(&lines[..first].join("\n"));

        let mut current: Option<QuestionOption> = None;
        for raw_line in &lines[first..] {
            let line = raw_line.trim();

            if let Some(caps) = OPTION_CAPTURE_RE.captures(line) {
                if let Some(mut finished) = current.take() {
                    finished.text = normalize_whitespace(&finished.text);
                    options.push(finished);
                }
                current = Some(QuestionOption::new(&caps[1], &caps[2]));
                continue;
            }

            if let Some(caps) = ANSWER_LINE_RE.captures(line) {
                embedded_answer = Some(caps[1].to_ascii_uppercase());
                continue;
            }

            // 续行：归属当前选项，没有选项时归属题干
            match current.as_mut() {
                Some(option) => {
                    option.text = format!("{} {}", option.text, line).trim().to_string();
                }
                None => {
                    stem = format!("{} {}", stem, line).trim().to_string();
                }
            }
        }

        if let Some(mut finished) = current.take() {
            finished.text = normalize_whitespace(&finished.text);
            options.push(finished);
        }
    }

    if options.len() < 2 {
        let inline = parse_inline_options(text);
        stem = inline.0;
        options = inline.1;
    }

    if options.len() < 2 {
        let unlabeled = parse_unlabeled_trailing_options(&lines);
        stem = unlabeled.0;
        options = unlabeled.1;
    }

    if embedded_answer.is_none() {
        if let Some(caps) = ANSWER_IN_BLOCK_RE.captures(text) {
            embedded_answer = Some(caps[1].to_ascii_uppercase());
        }
    }

    question_from_parts(number, &stem, options, embedded_answer)
}

/// 策略 2：按行内 `(A) ... (B) ...` 标记切分
fn parse_inline_options(block_text: &str) -> (String, Vec<QuestionOption>) {
    let markers: Vec<(usize, usize, String)> = INLINE_OPTION_RE
        .captures_iter(block_text)
        .filter_map(|caps| {
            let m = caps.get(0)?;
            Some((m.start(), m.end(), caps[1].to_string()))
        })
        .collect();

    if markers.len() < 2 {
        return (block_text.trim().to_string(), Vec::new());
    }

    let stem = block_text[..markers[0].0].trim().to_string();
    let options = markers
        .iter()
        .enumerate()
        .map(|(idx, (_, end, label))| {
            let text_end = markers
                .get(idx + 1)
                .map(|(next_start, _, _)| *next_start)
                .unwrap_or(block_text.len());
            QuestionOption::new(label, normalize_whitespace(&block_text[*end..text_end]))
        })
        .collect();

    (stem, options)
}

/// 策略 3：无标签尾行
///
/// 从块尾向前找最晚的切分点：尾部 2-6 行都足够短且不以 `?` 结尾，
/// 且紧邻的前一行以 `:` 或 `?` 结尾，则尾部按顺序赋 A、B、C…标签。
fn parse_unlabeled_trailing_options(lines: &[&str]) -> (String, Vec<QuestionOption>) {
    let non_empty: Vec<&str> = lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect();

    if non_empty.len() < 3 {
        return (non_empty.join(" "), Vec::new());
    }

    for i in (0..=non_empty.len() - 2).rev() {
        let stem_candidate = &non_empty[..=i];
        let option_candidate = &non_empty[i + 1..];

        let stem_tail = stem_candidate.last().copied().unwrap_or("");
        let valid_count = option_candidate.len() >= 2 && option_candidate.len() <= 6;
        let shape_ok = option_candidate.iter().all(|line| {
            line.chars().count() <= UNLABELED_OPTION_MAX_LEN && !line.ends_with('?')
        });

        if valid_count && shape_ok && (stem_tail.ends_with(':') || stem_tail.ends_with('?')) {
            let options = option_candidate
                .iter()
                .enumerate()
                .map(|(idx, text)| {
                    QuestionOption::new(OPTION_LABELS[idx], normalize_whitespace(text))
                })
                .collect();
            return (normalize_whitespace(&stem_candidate.join("\n")), options);
        }
    }

    (normalize_whitespace(&non_empty.join("\n")), Vec::new())
}
