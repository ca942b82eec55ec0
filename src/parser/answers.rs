//! 答案区解析
//!
//! 把答案/解析区解析成 `题号 -> 答案条目` 的映射。三个策略按优先级：
//! a. 简单键值行（`12) B`、`3: A,C`、`7. TRUE`）
//! b. 带解析正文的编号块（`12) Answer: B  Because ...`）
//! c. 顺序兜底：整个答案区一个带编号的答案 token 都没解析出来时，
//!    把第 k 个合法 token 行按位置赋给第 k 道题
//!
//! 同一题号的多个来源按字段并集合并，不做整条覆盖。

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::normalize::normalize_whitespace;
use crate::models::{label_at, Question};

/// 答案 token 的统一语法
///
/// 字符串/数组/布尔的鸭子类型在这里收敛成一个带标签的联合
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerToken {
    /// 一个或多个选项字母（`B`、`A,C`、`A and C`）
    Letters(Vec<String>),
    /// 1 起始的选项序号（`2` -> B、`1,3` -> A,C）
    Numeric(Vec<u8>),
    /// 判断题记号（TRUE / FALSE）
    Boolean(bool),
    /// 不是答案 token
    Unresolved,
}

static LETTER_SET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[A-F](?:[ ]*(?:,|/|;|&|\+|and)[ ]*[A-F])*$").unwrap()
});

static NUMERIC_SET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-6](?:[ ]*,[ ]*[1-6])*$").unwrap());

static LETTER_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[ ]*(?:,|/|;|&|\+|and)[ ]*").unwrap());

impl AnswerToken {
    /// 解析一个原始 token 字符串
    pub fn parse(raw: &str) -> Self {
        let cleaned = raw
            .trim()
            .trim_start_matches(['☐', '☑', '✓', '✗'])
            .trim();

        if cleaned.is_empty() {
            return AnswerToken::Unresolved;
        }

        if cleaned.eq_ignore_ascii_case("true") {
            return AnswerToken::Boolean(true);
        }
        if cleaned.eq_ignore_ascii_case("false") {
            return AnswerToken::Boolean(false);
        }

        if LETTER_SET_RE.is_match(cleaned) {
            let mut labels: Vec<String> = Vec::new();
            for part in LETTER_SPLIT_RE.split(cleaned) {
                let label = part.trim().to_ascii_uppercase();
                if !label.is_empty() && !labels.contains(&label) {
                    labels.push(label);
                }
            }
            return AnswerToken::Letters(labels);
        }

        if NUMERIC_SET_RE.is_match(cleaned) {
            let mut numbers: Vec<u8> = Vec::new();
            for part in cleaned.split(',') {
                if let Ok(n) = part.trim().parse::<u8>() {
                    if !numbers.contains(&n) {
                        numbers.push(n);
                    }
                }
            }
            return AnswerToken::Numeric(numbers);
        }

        AnswerToken::Unresolved
    }

    /// 是否解析成了答案
    pub fn is_resolved(&self) -> bool {
        !matches!(self, AnswerToken::Unresolved)
    }

    /// 转成选项标签列表（布尔记号在合并阶段才落到标签）
    pub fn labels(&self) -> Vec<String> {
        match self {
            AnswerToken::Letters(labels) => labels.clone(),
            AnswerToken::Numeric(numbers) => numbers
                .iter()
                .filter_map(|n| label_at((*n as usize).saturating_sub(1)))
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// 答案映射条目
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnswerEntry {
    pub correct_options: Vec<String>,
    pub boolean_value: Option<bool>,
    pub explanation: String,
    pub raw_token: Option<String>,
}

impl AnswerEntry {
    pub fn has_answer(&self) -> bool {
        !self.correct_options.is_empty() || self.boolean_value.is_some()
    }

    /// 用一个解析好的 token 填充（已有答案时不覆盖）
    fn absorb_token(&mut self, token: &AnswerToken, raw: &str) {
        if self.has_answer() {
            return;
        }
        match token {
            AnswerToken::Boolean(value) => self.boolean_value = Some(*value),
            AnswerToken::Letters(_) | AnswerToken::Numeric(_) => {
                self.correct_options = token.labels();
            }
            AnswerToken::Unresolved => return,
        }
        if self.raw_token.is_none() {
            self.raw_token = Some(raw.trim().to_string());
        }
    }
}

pub type AnswerMap = BTreeMap<u32, AnswerEntry>;

/// `12) B` / `3: A,C` 式键值行（可带 `Answer:` 前缀）
static SIMPLE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ ]*(?:q(?:uestion)?[ ]*)?(\d{1,3})[ ]*[)\.:\-][ ]*(?:(?:correct[ ]*answer|answer|ans)[ ]*[:\-]?[ ]*)?(.+)$",
    )
    .unwrap()
});

/// 编号块的起始行
static BLOCK_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ ]*(?:q(?:uestion)?[ ]*)?(\d{1,3})[ ]*[)\.:\-]?[ ]*").unwrap()
});

/// 正文里前缀形式的答案（`Answer: B` / `Ans - A,C` / `Correct answer: TRUE`）
static PREFIXED_ANSWER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:correct[ ]*answer|answer|ans)[ ]*[:\-]?[ ]*((?:[A-F](?:[ ]*[,/;&+][ ]*[A-F])*)|true|false)\b",
    )
    .unwrap()
});

/// 正文开头的裸选项标记（`(A)` / `A.`）
static LEADING_OPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\(?([A-F])\)?[)\.:\-][ ]*").unwrap());

/// `Explanation:` 子标记
static EXPLANATION_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)explanation[ ]*:[ ]*(.*)$").unwrap());

static ANSWERS_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^answers?$").unwrap());

/// 策略 a + b：解析带编号的答案区
pub fn parse_answer_section(answer_section: &str) -> AnswerMap {
    let mut map = AnswerMap::new();

    if answer_section.trim().is_empty() {
        return map;
    }

    // 策略 a：键值行，首见优先
    for caps in SIMPLE_KEY_RE.captures_iter(answer_section) {
        let Ok(number) = caps[1].parse::<u32>() else {
            continue;
        };
        let raw = caps[2].trim();
        let token = AnswerToken::parse(raw);
        if !token.is_resolved() {
            continue;
        }
        map.entry(number).or_default().absorb_token(&token, raw);
    }

    // 策略 b：编号块 + 解析正文，只补缺字段
    for (number, body) in split_numbered_blocks(answer_section) {
        let raw_body = normalize_whitespace(&body);
        if raw_body.chars().count() < 2 {
            continue;
        }
        // 整个正文就是一个裸 token 的块归策略 a 管
        if AnswerToken::parse(&raw_body).is_resolved() {
            continue;
        }

        let mut token = AnswerToken::Unresolved;
        let mut answer_raw: Option<String> = None;
        let mut explanation_base = raw_body.as_str();

        if let Some(caps) = PREFIXED_ANSWER_RE.captures(&raw_body) {
            token = AnswerToken::parse(&caps[1]);
            answer_raw = Some(caps[1].to_string());
            // 前缀就在正文开头时，解析文本从前缀之后算起
            if let Some(m) = caps.get(0) {
                if m.start() == 0 {
                    explanation_base = &raw_body[m.end()..];
                }
            }
        } else if let Some(caps) = LEADING_OPTION_RE.captures(&raw_body) {
            token = AnswerToken::Letters(vec![caps[1].to_ascii_uppercase()]);
            answer_raw = Some(caps[1].to_string());
            if let Some(m) = caps.get(0) {
                explanation_base = &raw_body[m.end()..];
            }
        }

        let explanation = match EXPLANATION_MARKER_RE.captures(&raw_body) {
            Some(caps) => caps[1].trim().to_string(),
            None => explanation_base.trim().to_string(),
        };

        let entry = map.entry(number).or_default();
        if token.is_resolved() && !entry.has_answer() {
            entry.absorb_token(&token, answer_raw.as_deref().unwrap_or_default());
        }
        // 更长的解析文本胜出
        if explanation.chars().count() > entry.explanation.chars().count() {
            entry.explanation = explanation;
        }
    }

    map
}

/// 映射里是否有任何已解析的正确答案
pub fn has_resolved_answers(map: &AnswerMap) -> bool {
    map.values().any(AnswerEntry::has_answer)
}

/// 策略 c：顺序兜底
///
/// 只在 a/b 颗粒无收时调用：跳过空行和非 token 行，
/// 第 k 个合法 token 按位置对应第 k 道题。
pub fn parse_sequential_answers(answer_section: &str, questions: &[Question]) -> AnswerMap {
    let mut map = AnswerMap::new();

    if answer_section.trim().is_empty() || questions.is_empty() {
        return map;
    }

    let normalized = normalize_whitespace(answer_section);
    let lines: Vec<&str> = normalized
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let start = lines
        .iter()
        .position(|line| ANSWERS_HEADING_RE.is_match(line))
        .map(|idx| idx + 1)
        .unwrap_or(0);

    let mut question_idx = 0usize;
    for line in &lines[start..] {
        if question_idx >= questions.len() {
            break;
        }
        let token = AnswerToken::parse(line);
        if !token.is_resolved() {
            continue;
        }

        let mut entry = AnswerEntry {
            raw_token: Some(line.to_string()),
            ..Default::default()
        };
        match &token {
            AnswerToken::Boolean(value) => entry.boolean_value = Some(*value),
            _ => entry.correct_options = token.labels(),
        }
        map.insert(questions[question_idx].number, entry);
        question_idx += 1;
    }

    map
}

/// 把两张映射按字段并集合并（`extra` 只填 `base` 的缺口）
pub fn merge_answer_maps(base: &mut AnswerMap, extra: AnswerMap) {
    for (number, incoming) in extra {
        let entry = base.entry(number).or_default();
        if !entry.has_answer() {
            entry.correct_options = incoming.correct_options;
            entry.boolean_value = incoming.boolean_value;
            if entry.raw_token.is_none() {
                entry.raw_token = incoming.raw_token;
            }
        }
        if incoming.explanation.chars().count() > entry.explanation.chars().count() {
            entry.explanation = incoming.explanation;
        }
    }
}

/// 按编号行切块，块体到下一个编号行首为止
fn split_numbered_blocks(text: &str) -> Vec<(u32, String)> {
    let markers: Vec<(usize, usize, u32)> = BLOCK_MARKER_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let m = caps.get(0)?;
            let number: u32 = caps[1].parse().ok()?;
            Some((m.start(), m.end(), number))
        })
        .collect();

    markers
        .iter()
        .enumerate()
        .map(|(idx, (_, end, number))| {
            let block_end = markers
                .get(idx + 1)
                .map(|(next_start, _, _)| *next_start)
                .unwrap_or(text.len());
            (*number, text[*end..block_end].to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuestionOption;

    fn make_questions(count: u32) -> Vec<Question> {
        (1..=count)
            .map(|n| {
                let mut q = Question::new(n);
                q.stem = format!("Stem {}?", n);
                q.options.push(QuestionOption::new("A", "one"));
                q.options.push(QuestionOption::new("B", "two"));
                q
            })
            .collect()
    }

    #[test]
    fn test_token_grammar() {
        assert_eq!(AnswerToken::parse("B"), AnswerToken::Letters(vec!["B".into()]));
        assert_eq!(
            AnswerToken::parse("a, c"),
            AnswerToken::Letters(vec!["A".into(), "C".into()])
        );
        assert_eq!(
            AnswerToken::parse("A and D"),
            AnswerToken::Letters(vec!["A".into(), "D".into()])
        );
        assert_eq!(
            AnswerToken::parse("B/E"),
            AnswerToken::Letters(vec!["B".into(), "E".into()])
        );
        assert_eq!(AnswerToken::parse("2"), AnswerToken::Numeric(vec![2]));
        assert_eq!(AnswerToken::parse("1, 3"), AnswerToken::Numeric(vec![1, 3]));
        assert_eq!(AnswerToken::parse("TRUE"), AnswerToken::Boolean(true));
        assert_eq!(AnswerToken::parse("☐ false"), AnswerToken::Boolean(false));
        assert_eq!(AnswerToken::parse("maybe C"), AnswerToken::Unresolved);
        assert_eq!(AnswerToken::parse(""), AnswerToken::Unresolved);
    }

    #[test]
    fn test_numeric_token_maps_to_labels() {
        let token = AnswerToken::parse("1,3");
        assert_eq!(token.labels(), vec!["A", "C"]);
    }

    #[test]
    fn test_letters_deduped_order_preserved() {
        let token = AnswerToken::parse("C,A,C");
        assert_eq!(token.labels(), vec!["C", "A"]);
    }

    #[test]
    fn test_simple_keyed_lines() {
        let map = parse_answer_section("Answer Key\n1) B\n2) A,C\n3: TRUE");
        assert_eq!(map[&1].correct_options, vec!["B"]);
        assert_eq!(map[&2].correct_options, vec!["A", "C"]);
        assert_eq!(map[&3].boolean_value, Some(true));
        assert_eq!(map[&2].raw_token.as_deref(), Some("A,C"));
        // 纯答案键没有解析文本
        assert!(map[&1].explanation.is_empty());
    }

    #[test]
    fn test_keyed_line_with_answer_prefix() {
        let map = parse_answer_section("12) Answer: B\n13) Ans - C");
        assert_eq!(map[&12].correct_options, vec!["B"]);
        assert_eq!(map[&13].correct_options, vec!["C"]);
    }

    #[test]
    fn test_first_seen_wins_for_keyed() {
        let map = parse_answer_section("1) B\n1) C");
        assert_eq!(map[&1].correct_options, vec!["B"]);
    }

    #[test]
    fn test_block_with_explanation() {
        let section = "1) Answer: B\nBeta blockade reduces myocardial oxygen demand and is first-line therapy.\n2) Answer: A\nShort note.";
        let map = parse_answer_section(section);
        assert_eq!(map[&1].correct_options, vec!["B"]);
        assert!(map[&1].explanation.contains("Beta blockade"));
        assert!(!map[&1].explanation.to_lowercase().contains("answer"));
        assert_eq!(map[&2].correct_options, vec!["A"]);
        assert_eq!(map[&2].explanation, "Short note.");
    }

    #[test]
    fn test_explanation_submarker_overrides() {
        let section = "4) Answer: C  Wrong lead-in text. Explanation: The actual rationale text.";
        let map = parse_answer_section(section);
        assert_eq!(map[&4].correct_options, vec!["C"]);
        assert_eq!(map[&4].explanation, "The actual rationale text.");
    }

    #[test]
    fn test_bare_leading_option_in_body() {
        let map = parse_answer_section("5) (B) The lesion is benign so observation suffices.");
        assert_eq!(map[&5].correct_options, vec!["B"]);
        assert_eq!(map[&5].explanation, "The lesion is benign so observation suffices.");
    }

    #[test]
    fn test_sequential_fallback_positional() {
        let questions = make_questions(3);
        let map = parse_sequential_answers("Answers\nB\nnot a token\nA\nTRUE", &questions);
        assert_eq!(map[&1].correct_options, vec!["B"]);
        assert_eq!(map[&2].correct_options, vec!["A"]);
        assert_eq!(map[&3].boolean_value, Some(true));
    }

    #[test]
    fn test_sequential_stops_at_question_count() {
        let questions = make_questions(1);
        let map = parse_sequential_answers("B\nA\nC", &questions);
        assert_eq!(map.len(), 1);
        assert_eq!(map[&1].correct_options, vec!["B"]);
    }

    #[test]
    fn test_merge_maps_union() {
        let mut base = AnswerMap::new();
        base.insert(
            1,
            AnswerEntry {
                explanation: "Document explanation that is fairly long.".into(),
                ..Default::default()
            },
        );
        let mut extra = AnswerMap::new();
        extra.insert(
            1,
            AnswerEntry {
                correct_options: vec!["B".into()],
                raw_token: Some("B".into()),
                ..Default::default()
            },
        );
        merge_answer_maps(&mut base, extra);
        assert_eq!(base[&1].correct_options, vec!["B"]);
        assert!(base[&1].explanation.contains("Document"));
    }
}
