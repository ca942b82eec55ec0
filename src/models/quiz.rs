//! 测验数据模型
//!
//! 从文档解析出来的测验结构，字段名按 camelCase 序列化，
//! 与前端/接口约定的 JSON 形状保持一致

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 选项标签表（A-F），最多 6 个选项
pub const OPTION_LABELS: [&str; 6] = ["A", "B", "C", "D", "E", "F"];

/// 根据下标取标签（0 -> "A"）
pub fn label_at(index: usize) -> Option<&'static str> {
    OPTION_LABELS.get(index).copied()
}

/// 根据标签取下标（"A" -> 0）
pub fn label_index(label: &str) -> Option<usize> {
    OPTION_LABELS.iter().position(|l| *l == label)
}

/// 题目类型
///
/// 解析阶段只是推断，Merger 最终定型之前不作数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    /// 单选题
    #[default]
    SingleSelect,
    /// 多选题
    MultiSelect,
    /// 判断题
    TrueFalse,
}

/// 解析出来的答案解析来源
///
/// 只允许单调升级：none→document→mixed 或 none→gemini，不允许降级
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplanationSource {
    #[default]
    None,
    /// 来自文档答案区
    Document,
    /// 来自模型生成
    Gemini,
    /// 文档 + 模型混合
    Mixed,
}

/// 单个选项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    /// 标签，A-F 之一
    pub label: String,
    /// 显示文本（已规范化、已剥离图片标记）
    pub text: String,
}

impl QuestionOption {
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
        }
    }
}

/// 单个题目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// 稳定 ID，`q-<number>`
    pub id: String,
    /// 1 起始的题号，提取顺序递增，也是答案映射的连接键
    pub number: u32,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    /// 题干（已规范化、已剥离图片标记）
    pub stem: String,
    /// 图片引用（data URL / 路径 / 文件名），去重且保持插入顺序
    pub images: Vec<String>,
    pub options: Vec<QuestionOption>,
    /// `correct_options` 的第一项，兼容旧接口
    #[serde(rename = "correctOption")]
    pub correct_option: Option<String>,
    #[serde(rename = "correctOptions")]
    pub correct_options: Vec<String>,
    /// 按选项标签存放的解析文本，稀疏
    pub explanations: BTreeMap<String, String>,
    /// 文档答案区里恢复出来的原始解析文本
    #[serde(rename = "sourceExplanation")]
    pub source_explanation: String,
    #[serde(rename = "explanationSource")]
    pub explanation_source: ExplanationSource,
    /// 原始答案 token，保留用于诊断
    #[serde(rename = "rawAnswerToken", skip_serializing_if = "Option::is_none")]
    pub raw_answer_token: Option<String>,
}

impl Question {
    /// 创建一个空题目骨架（解析器随后填充）
    pub fn new(number: u32) -> Self {
        Self {
            id: format!("q-{}", number),
            number,
            question_type: QuestionType::default(),
            stem: String::new(),
            images: Vec::new(),
            options: Vec::new(),
            correct_option: None,
            correct_options: Vec::new(),
            explanations: BTreeMap::new(),
            source_explanation: String::new(),
            explanation_source: ExplanationSource::default(),
            raw_answer_token: None,
        }
    }

    /// 题目里是否存在该标签的选项
    pub fn has_option(&self, label: &str) -> bool {
        self.options.iter().any(|o| o.label == label)
    }

    /// 升级解析来源（只升不降）
    pub fn upgrade_explanation_source(&mut self, incoming: ExplanationSource) {
        use ExplanationSource::*;
        self.explanation_source = match (self.explanation_source, incoming) {
            (None, next) => next,
            (Document, Gemini) | (Document, Mixed) => Mixed,
            (Gemini, Document) | (Gemini, Mixed) => Mixed,
            (current, _) => current,
        };
    }
}

/// 解析统计（只读汇总）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsingStats {
    /// 是否检测到答案区
    #[serde(rename = "detectedAnswerSection")]
    pub detected_answer_section: bool,
    #[serde(rename = "totalQuestions")]
    pub total_questions: usize,
    /// 至少映射到一个正确答案的题目数
    #[serde(rename = "answersMapped")]
    pub answers_mapped: usize,
    /// 至少映射到一条解析的题目数
    #[serde(rename = "explanationsMapped")]
    pub explanations_mapped: usize,
}

/// 一份完整测验
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub title: String,
    pub questions: Vec<Question>,
    pub parsing: ParsingStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_helpers() {
        assert_eq!(label_at(0), Some("A"));
        assert_eq!(label_at(5), Some("F"));
        assert_eq!(label_at(6), None);
        assert_eq!(label_index("C"), Some(2));
        assert_eq!(label_index("G"), None);
    }

    #[test]
    fn test_explanation_source_only_upgrades() {
        let mut q = Question::new(1);
        q.upgrade_explanation_source(ExplanationSource::Document);
        assert_eq!(q.explanation_source, ExplanationSource::Document);

        // document + gemini = mixed
        q.upgrade_explanation_source(ExplanationSource::Gemini);
        assert_eq!(q.explanation_source, ExplanationSource::Mixed);

        // mixed 不再变化
        q.upgrade_explanation_source(ExplanationSource::Document);
        assert_eq!(q.explanation_source, ExplanationSource::Mixed);
    }

    #[test]
    fn test_question_type_serde_names() {
        let json = serde_json::to_string(&QuestionType::MultiSelect).unwrap();
        assert_eq!(json, "\"multi_select\"");
        let json = serde_json::to_string(&QuestionType::TrueFalse).unwrap();
        assert_eq!(json, "\"true_false\"");
    }

    #[test]
    fn test_question_json_shape() {
        let mut q = Question::new(3);
        q.stem = "What is the next step?".to_string();
        q.options.push(QuestionOption::new("A", "Observation"));
        q.options.push(QuestionOption::new("B", "Surgery"));
        q.correct_options = vec!["B".to_string()];
        q.correct_option = Some("B".to_string());

        let value = serde_json::to_value(&q).unwrap();
        assert_eq!(value["id"], "q-3");
        assert_eq!(value["type"], "single_select");
        assert_eq!(value["correctOption"], "B");
        assert_eq!(value["correctOptions"][0], "B");
        assert_eq!(value["explanationSource"], "none");
        // rawAnswerToken 为空时不序列化
        assert!(value.get("rawAnswerToken").is_none());
    }
}
