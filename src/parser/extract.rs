//! 题目块提取
//!
//! 把题目区切成一个个题目。编号策略优先：
//! a. 显式标记行（`Question 3` / `Q3`，独占一行）
//! b. 裸编号行（`3)` / `3.` 后跟题干）
//! 两者都无命中时退到无编号启发式切分（与块解析融合，直接产出题目）。

use regex::Regex;
use std::sync::LazyLock;

use super::block::{parse_question_block, question_from_parts, strip_leading_option_marker};
use super::images::is_image_marker_line;
use super::normalize::normalize_whitespace;
use crate::models::{Question, QuestionOption, OPTION_LABELS};

/// `Question 12` / `Q12.`，独占一行
static EXPLICIT_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ ]*(?:question[ ]*|q[ ]*)(\d{1,3})[ ]*[)\.:\-]?[ ]*$").unwrap()
});

/// `12)` / `12.` 行首编号，题干同行开始
static NUMERIC_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ ]*(\d{1,3})[ ]*[)\.][ ]+").unwrap());

/// 题首判定：`Question N`/`QN` 前缀
static QUESTION_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:question[ ]+\d+|q\d+)").unwrap());

/// 临床病例开头（`A 45-year-old ...`）
static VIGNETTE_OPENER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:a|an)[ ]+\d{1,3}-year-old\b").unwrap());

/// 疑问/祈使开头
static INTERROGATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:what|which|in the|next step|true or false|place the)\b").unwrap()
});

static ANSWERS_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^answers?$").unwrap());

/// 长行且以 `?`/`:` 结尾即视为题首的最小长度
const QUESTION_START_MIN_LEN: usize = 35;
/// 选项形状行的最大长度
const OPTION_SHAPE_MAX_LEN: usize = 240;

/// 该行是否像一道题的开头
pub fn is_likely_question_start(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() || is_image_marker_line(trimmed) {
        return false;
    }

    if QUESTION_PREFIX_RE.is_match(trimmed)
        || VIGNETTE_OPENER_RE.is_match(trimmed)
        || INTERROGATIVE_RE.is_match(trimmed)
    {
        return true;
    }

    (trimmed.ends_with('?') || trimmed.ends_with(':'))
        && trimmed.chars().count() >= QUESTION_START_MIN_LEN
}

/// 该行是否长得像选项文本
pub fn looks_like_option_text(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() || is_image_marker_line(trimmed) {
        return false;
    }
    if ANSWERS_HEADING_RE.is_match(trimmed) {
        return false;
    }
    if is_likely_question_start(trimmed) {
        return false;
    }
    trimmed.chars().count() <= OPTION_SHAPE_MAX_LEN
}

/// 提取题目区里的所有题目
pub fn extract_questions(question_section: &str) -> Vec<Question> {
    let blocks = find_marker_blocks(question_section, &EXPLICIT_MARKER_RE)
        .into_iter()
        .filter(|b| !b.1.is_empty())
        .collect::<Vec<_>>();

    let blocks = if blocks.is_empty() {
        find_marker_blocks(question_section, &NUMERIC_MARKER_RE)
    } else {
        blocks
    };

    if blocks.is_empty() {
        return parse_unnumbered_questions(question_section);
    }

    blocks
        .into_iter()
        .filter_map(|(number, block_text)| {
            let question = parse_question_block(number, &normalize_whitespace(&block_text));
            (!question.stem.is_empty() && question.options.len() >= 2).then_some(question)
        })
        .collect()
}

/// 按标记行切块：块从标记结束处延伸到下一个标记行首（或文末）
fn find_marker_blocks(text: &str, marker: &Regex) -> Vec<(u32, String)> {
    let matches: Vec<(usize, usize, u32)> = marker
        .captures_iter(text)
        .filter_map(|caps| {
            let m = caps.get(0)?;
            let number: u32 = caps[1].parse().ok()?;
            Some((m.start(), m.end(), number))
        })
        .collect();

    matches
        .iter()
        .enumerate()
        .map(|(idx, (_, end, number))| {
            let block_end = matches
                .get(idx + 1)
                .map(|(next_start, _, _)| *next_start)
                .unwrap_or(text.len());
            (*number, text[*end..block_end].trim().to_string())
        })
        .collect()
}

/// 无编号启发式切分（与块解析融合）
///
/// 逐行扫描：先积累题干，遇到选项形状的行转为积累选项；
/// 选项区里出现的图片标记推迟归属到下一题的题干
/// （纯文本提取时插图常落在本题选项之后、实际属于下一题）。
fn parse_unnumbered_questions(question_section: &str) -> Vec<Question> {
    let raw_lines: Vec<&str> = question_section
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if raw_lines.is_empty() {
        return Vec::new();
    }

    // 首行是标题、次行才是题首时跳过标题
    let lines: &[&str] = if raw_lines.len() > 1
        && !is_likely_question_start(raw_lines[0])
        && is_likely_question_start(raw_lines[1])
    {
        &raw_lines[1..]
    } else {
        &raw_lines[..]
    };

    let mut questions = Vec::new();
    let mut number: u32 = 1;
    let mut cursor = 0usize;
    let mut deferred_images: Vec<String> = Vec::new();

    while cursor < lines.len() {
        while cursor < lines.len() && !is_likely_question_start(lines[cursor]) {
            cursor += 1;
        }
        if cursor >= lines.len() {
            break;
        }

        let mut stem_lines: Vec<String> = deferred_images.drain(..).collect();
        stem_lines.push(lines[cursor].to_string());
        cursor += 1;

        // 题干积累
        while cursor < lines.len() {
            let next = lines[cursor];

            if is_image_marker_line(next) {
                stem_lines.push(next.to_string());
                cursor += 1;
                continue;
            }
            if looks_like_option_text(next) {
                break;
            }
            if is_likely_question_start(next)
                && stem_lines
                    .iter()
                    .any(|l| l.ends_with('?') || l.ends_with(':'))
            {
                break;
            }

            stem_lines.push(next.to_string());
            cursor += 1;
        }

        // 选项积累
        let mut option_lines: Vec<String> = Vec::new();
        while cursor < lines.len() {
            let next = lines[cursor];

            if is_image_marker_line(next) {
                if option_lines.len() >= 2 {
                    deferred_images.push(next.to_string());
                } else {
                    stem_lines.push(next.to_string());
                }
                cursor += 1;
                continue;
            }

            if option_lines.len() >= 2 && is_likely_question_start(next) {
                break;
            }

            if !looks_like_option_text(next) {
                if option_lines.len() >= 2 {
                    break;
                }
                cursor += 1;
                continue;
            }

            option_lines.push(next.to_string());
            cursor += 1;

            if option_lines.len() >= OPTION_LABELS.len() {
                break;
            }
        }

        if let Some(expanded) = try_expand_true_false(&stem_lines, &option_lines, number) {
            number += expanded.len() as u32;
            questions.extend(expanded);
            continue;
        }

        if option_lines.len() >= 2 {
            let options: Vec<QuestionOption> = option_lines
                .iter()
                .take(OPTION_LABELS.len())
                .enumerate()
                .map(|(idx, text)| {
                    QuestionOption::new(
                        OPTION_LABELS[idx],
                        normalize_whitespace(&strip_leading_option_marker(text)),
                    )
                })
                .collect();

            let stem = stem_lines.join("\n");
            questions.push(question_from_parts(number, &stem, options, None));
            number += 1;
        }
        // 选项不足 2 个的候选块丢弃，游标已越过，继续扫描
    }

    questions
}

/// `TRUE`/`FALSE` 记号（允许前导勾选框字符）
fn bool_token(line: &str) -> Option<bool> {
    let cleaned = line
        .trim()
        .trim_start_matches(['☐', '☑', '✓', '✗'])
        .trim();
    if cleaned.eq_ignore_ascii_case("true") {
        Some(true)
    } else if cleaned.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// `True or False` 组展开
///
/// 题干恰为 "True or False" 且选项行按 `[陈述, TRUE|FALSE, TRUE|FALSE]`
/// 三行一组重复（两个记号不同）时，拆成每组一道判断题。
/// 至少要有 2 组才接受，否则回退为普通单题解析。
fn try_expand_true_false(
    stem_lines: &[String],
    option_lines: &[String],
    first_number: u32,
) -> Option<Vec<Question>> {
    let marker_lines: Vec<&String> = stem_lines
        .iter()
        .filter(|l| is_image_marker_line(l))
        .collect();
    let stem_text: String = stem_lines
        .iter()
        .filter(|l| !is_image_marker_line(l))
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    let stem_text = normalize_whitespace(&stem_text);
    let stem_core = stem_text.trim_end_matches([':', '?', '.']).trim();

    if !stem_core.eq_ignore_ascii_case("true or false") {
        return None;
    }
    if option_lines.len() < 6 || option_lines.len() % 3 != 0 {
        return None;
    }

    let mut groups: Vec<(&String, &String, &String)> = Vec::new();
    for chunk in option_lines.chunks(3) {
        let statement = &chunk[0];
        let first = bool_token(&chunk[1])?;
        let second = bool_token(&chunk[2])?;
        if first == second || bool_token(statement).is_some() {
            return None;
        }
        groups.push((&chunk[0], &chunk[1], &chunk[2]));
    }

    if groups.len() < 2 {
        return None;
    }

    let mut questions = Vec::new();
    for (idx, (statement, first, second)) in groups.iter().enumerate() {
        let number = first_number + idx as u32;
        // 题干里挂着的图片标记归到第一道展开题
        let stem = if idx == 0 && !marker_lines.is_empty() {
            let mut parts: Vec<String> = marker_lines.iter().map(|l| l.to_string()).collect();
            parts.push(statement.to_string());
            parts.join("\n")
        } else {
            statement.to_string()
        };

        let options = vec![
            QuestionOption::new("A", first.trim()),
            QuestionOption::new("B", second.trim()),
        ];
        questions.push(question_from_parts(number, &stem, options, None));
    }

    Some(questions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_numeric_markers() {
        let section = "1) Stem one?\nA) opt1\nB) opt2\n2) Stem two?\nA) x\nB) y";
        let questions = extract_questions(section);
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].number, 1);
        assert_eq!(questions[1].number, 2);
        for q in &questions {
            assert_eq!(q.options.len(), 2);
            assert_eq!(q.options[0].label, "A");
            assert_eq!(q.options[1].label, "B");
        }
    }

    #[test]
    fn test_explicit_markers_win_over_numeric() {
        let section =
            "Question 1\nStem one?\nA) a\nB) b\nQuestion 2\nStem two?\nA) c\nB) d";
        let questions = extract_questions(section);
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].stem, "Stem one?");
        assert_eq!(questions[1].number, 2);
    }

    #[test]
    fn test_q_prefix_marker() {
        let section = "Q7.\nWhat is shown?\nA) a\nB) b";
        let questions = extract_questions(section);
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].number, 7);
    }

    #[test]
    fn test_blocks_without_enough_options_dropped() {
        let section = "1) Stem one?\nA) only one option\n2) Stem two?\nA) x\nB) y";
        let questions = extract_questions(section);
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].number, 2);
    }

    #[test]
    fn test_unnumbered_segmentation() {
        let section = "Cardiology Review Pack\nWhich drug is first-line for stable angina?\nBeta blocker\nCalcium channel blocker\nNitrate only\nWhat is the most common cause of right heart failure?\nLeft heart failure\nPulmonary embolism";
        let questions = extract_questions(section);
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].number, 1);
        assert_eq!(questions[0].options.len(), 3);
        assert_eq!(questions[1].number, 2);
        assert_eq!(questions[1].options[0].text, "Left heart failure");
    }

    #[test]
    fn test_question_start_heuristics() {
        assert!(is_likely_question_start("Question 4"));
        assert!(is_likely_question_start("Q12"));
        assert!(is_likely_question_start("A 67-year-old man presents with chest pain"));
        assert!(is_likely_question_start("Which of the following is true?"));
        assert!(is_likely_question_start(
            "The most appropriate next step in management is which of these:"
        ));
        assert!(!is_likely_question_start("Short line?"));
        assert!(!is_likely_question_start("[IMAGE:x.png]"));
        assert!(!is_likely_question_start(""));
    }

    #[test]
    fn test_true_false_group_expansion() {
        let section = "True or False:\nThe heart has four chambers\nTRUE\nFALSE\nThe liver is in the left upper quadrant\nTRUE\nFALSE";
        let questions = extract_questions(section);
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].stem, "The heart has four chambers");
        assert_eq!(questions[0].options.len(), 2);
        assert_eq!(questions[0].options[0].text, "TRUE");
        assert_eq!(questions[1].stem, "The liver is in the left upper quadrant");
        assert_eq!(questions[1].number, 2);
    }

    #[test]
    fn test_true_false_single_group_falls_back() {
        // 只有一组（3 行）：不展开，走普通路径
        let section = "True or False:\nThe heart has four chambers\nTRUE\nFALSE";
        let questions = extract_questions(section);
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].stem, "True or False:");
        assert_eq!(questions[0].options.len(), 3);
    }

    #[test]
    fn test_deferred_image_marker_goes_to_next_question() {
        let section = "Which finding is most likely?\nEffusion\nConsolidation\n[IMAGE:./next-figure.png]\nWhat does the image demonstrate?\nPneumothorax\nHemothorax";
        let questions = extract_questions(section);
        assert_eq!(questions.len(), 2);
        assert!(questions[0].images.is_empty());
        assert_eq!(questions[1].images, vec!["./next-figure.png"]);
    }
}
