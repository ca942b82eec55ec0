//! Gemini 富化服务 - 业务能力层
//!
//! 对解析后仍然缺答案/缺解析的题目，分批请求模型补齐。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 调用 OpenAI 兼容端点（Gemini 的
//!   openai 兼容层、Azure 等都可以）
//! - `tokio::time::timeout` 实现单次调用超时
//!
//! ## 失败策略
//! - 限流（429/quota）：沿回退链切到下一个模型重试本批
//! - 超时：把本批对半拆开重新排队，一直拆到单题为止才计失败
//! - 鉴权失败：直接终止本轮富化
//! - 其他模型错误：本批计失败，继续下一批
//!
//! 所有失败都汇总进 [`EnrichReport`]，不向调用方抛错。

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{ExplanationSource, Question};

/// 兜底解析文本（源文档没有解析且未启用富化时回填）
pub const PLACEHOLDER_EXPLANATION: &str =
    "Explanation not available in source. Enable Gemini with a valid API key to auto-generate rationale.";

/// 已知的占位解析句式，富化结果总是允许覆盖它们
static PLACEHOLDER_PHRASES: phf::Set<&'static str> = phf::phf_set! {
    "Explanation not available in source. Enable Gemini with a valid API key to auto-generate rationale.",
    "Explanation not available in source.",
    "No explanation available.",
    "Explanation pending.",
};

/// 解析文本低于这个长度就视为不充分，允许覆盖
const MIN_EXPLANATION_CHARS: usize = 25;

/// 墙钟预算剩余不足这个毫秒数就不再发起调用
const BUDGET_FLOOR_MS: u64 = 1_500;
/// 给响应处理留出的余量
const BUDGET_MARGIN_MS: u64 = 250;

/// 富化调用失败分类
#[derive(Debug, thiserror::Error)]
pub enum EnrichCallError {
    /// 请求频率限制（429 / quota）
    #[error("模型限流")]
    RateLimit,
    /// 单次调用超时
    #[error("模型调用超时")]
    Timeout,
    /// 鉴权失败（401/403/无效 API key）
    #[error("模型鉴权失败")]
    Auth,
    /// 其他模型错误
    #[error("模型调用失败: {0}")]
    Model(String),
}

/// 富化汇总统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichReport {
    pub attempted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(rename = "modelChain")]
    pub model_chain: Vec<String>,
    #[serde(rename = "triedModels")]
    pub tried_models: Vec<String>,
    #[serde(rename = "rateLimitFallbacks")]
    pub rate_limit_fallbacks: usize,
    #[serde(rename = "updatedQuestions")]
    pub updated_questions: usize,
    #[serde(rename = "failedChunks")]
    pub failed_chunks: usize,
    #[serde(rename = "processedQuestions")]
    pub processed_questions: usize,
    #[serde(rename = "skippedQuestions")]
    pub skipped_questions: usize,
    #[serde(rename = "timedOut")]
    pub timed_out: bool,
    pub reason: String,
}

/// 发给模型的单题载荷
#[derive(Debug, Serialize)]
struct EnrichRequestItem {
    number: u32,
    stem: String,
    options: Vec<crate::models::QuestionOption>,
    #[serde(rename = "knownCorrectOptions")]
    known_correct_options: Vec<String>,
    #[serde(rename = "knownCorrectOption")]
    known_correct_option: Option<String>,
    #[serde(rename = "knownExplanationForCorrect")]
    known_explanation_for_correct: Option<String>,
}

/// 模型返回的单题结果（形状宽容：单值/数组都接受）
#[derive(Debug, Clone, Deserialize)]
struct EnrichResponseItem {
    number: u32,
    #[serde(default, rename = "correctOption")]
    correct_option: Option<serde_json::Value>,
    #[serde(default, rename = "correctOptions")]
    correct_options: Option<serde_json::Value>,
    #[serde(default)]
    explanations: Option<BTreeMap<String, String>>,
}

/// Gemini 富化服务
///
/// 职责：
/// - 选出解析不充分的题目并分批补齐
/// - 管理模型回退链与批次工作队列
/// - 不关心题目怎么来的，也不碰文件
pub struct EnrichService {
    client: Client<OpenAIConfig>,
    models: Vec<String>,
    chunk_size: usize,
    per_chunk_timeout: Duration,
    max_duration: Duration,
    max_questions: usize,
    api_key_configured: bool,
}

impl EnrichService {
    /// 创建新的富化服务
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.gemini_api_key)
            .with_api_base(&config.gemini_api_base_url);

        let mut models = config.model_chain();
        if models.is_empty() {
            models.push("gemini-2.5-flash-lite".to_string());
        }

        Self {
            client: Client::with_config(openai_config),
            models,
            chunk_size: config.gemini_chunk_size.max(1),
            per_chunk_timeout: Duration::from_millis(config.gemini_chunk_timeout_ms),
            max_duration: Duration::from_millis(config.gemini_max_ms),
            max_questions: config.gemini_max_questions,
            api_key_configured: !config.gemini_api_key.trim().is_empty(),
        }
    }

    /// 富化一组题目（就地修改），返回汇总统计
    pub async fn enrich(&self, questions: &mut [Question]) -> EnrichReport {
        let mut report = EnrichReport {
            model_chain: self.models.clone(),
            ..Default::default()
        };

        if !self.api_key_configured {
            report.reason = "GEMINI_API_KEY is not configured.".to_string();
            return report;
        }

        let targets: Vec<usize> = (0..questions.len())
            .filter(|&idx| !has_sufficient_explanations(&questions[idx]))
            .collect();
        if targets.is_empty() {
            report.reason = "All questions already contain sufficient explanations.".to_string();
            return report;
        }

        let limited: Vec<usize> = if self.max_questions > 0 {
            targets.iter().copied().take(self.max_questions).collect()
        } else {
            targets.clone()
        };
        report.skipped_questions = targets.len().saturating_sub(limited.len());

        let mut queue: VecDeque<Vec<usize>> = limited
            .chunks(self.chunk_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        report.attempted = true;
        let started = Instant::now();
        let mut model_cursor = 0usize;
        let mut exhausted_models = false;
        let mut auth_failed = false;
        let mut active_model = self.models.first().cloned().unwrap_or_default();
        report.tried_models.push(active_model.clone());

        'queue: while let Some(chunk) = queue.pop_front() {
            loop {
                active_model = self.models[model_cursor.min(self.models.len() - 1)].clone();

                let elapsed = started.elapsed();
                let remaining = self.max_duration.saturating_sub(elapsed);
                if remaining <= Duration::from_millis(BUDGET_FLOOR_MS) {
                    report.timed_out = true;
                    break 'queue;
                }

                let call_timeout = self
                    .per_chunk_timeout
                    .min(remaining - Duration::from_millis(BUDGET_MARGIN_MS))
                    .max(Duration::from_millis(BUDGET_FLOOR_MS));

                let payload: Vec<EnrichRequestItem> = chunk
                    .iter()
                    .map(|&idx| build_request_item(&questions[idx]))
                    .collect();

                match self
                    .generate_chunk(&active_model, &payload, call_timeout)
                    .await
                {
                    Ok(items) => {
                        let by_number: BTreeMap<u32, EnrichResponseItem> =
                            items.into_iter().map(|item| (item.number, item)).collect();

                        for &idx in &chunk {
                            let question = &mut questions[idx];
                            if let Some(item) = by_number.get(&question.number) {
                                if merge_generated(question, item) {
                                    report.updated_questions += 1;
                                }
                            }
                        }
                        report.processed_questions += chunk.len();
                        break;
                    }
                    Err(EnrichCallError::Timeout) => {
                        // 超时的批不丢弃：对半拆开重新排队，拆到单题为止
                        if chunk.len() > 1 {
                            let mid = chunk.len() / 2;
                            let (first, second) = chunk.split_at(mid);
                            queue.push_front(second.to_vec());
                            queue.push_front(first.to_vec());
                            warn!(
                                "⏱️ 批次超时（{} 题），拆成 {}+{} 重新排队",
                                chunk.len(),
                                first.len(),
                                second.len()
                            );
                        } else {
                            warn!("⏱️ 单题批次仍超时，计入失败");
                            report.failed_chunks += 1;
                        }
                        break;
                    }
                    Err(EnrichCallError::RateLimit) => {
                        if model_cursor < self.models.len() - 1 {
                            model_cursor += 1;
                            report.rate_limit_fallbacks += 1;
                            let next_model = self.models[model_cursor].clone();
                            if !report.tried_models.contains(&next_model) {
                                report.tried_models.push(next_model.clone());
                            }
                            info!("🔁 {} 被限流，切换到 {}", active_model, next_model);
                            continue;
                        }
                        report.failed_chunks += 1;
                        exhausted_models = true;
                        break 'queue;
                    }
                    Err(EnrichCallError::Auth) => {
                        report.failed_chunks += 1;
                        auth_failed = true;
                        break 'queue;
                    }
                    Err(EnrichCallError::Model(message)) => {
                        warn!("❌ 富化批次失败: {}", message);
                        report.failed_chunks += 1;
                        break;
                    }
                }
            }
        }

        report.model = Some(active_model.clone());

        let mut reason_parts: Vec<String> = Vec::new();
        if report.skipped_questions > 0 {
            reason_parts.push(format!(
                "Limited to first {} question(s) to fit runtime.",
                limited.len()
            ));
        }
        if report.timed_out {
            reason_parts.push("Stopped early due to runtime budget.".to_string());
        }
        if report.rate_limit_fallbacks > 0 {
            reason_parts.push(format!(
                "Rate-limit fallback used {} time(s); active model: {}.",
                report.rate_limit_fallbacks, active_model
            ));
        }
        if exhausted_models {
            reason_parts.push("All fallback models were rate-limited.".to_string());
        }
        if auth_failed {
            reason_parts.push("Authentication failed for the configured API key.".to_string());
        }
        if report.failed_chunks > 0 {
            reason_parts.push(format!("{} chunk(s) failed.", report.failed_chunks));
        }
        report.reason = reason_parts.join(" ");

        report
    }

    /// 调用一次模型，解析出题目结果数组
    async fn generate_chunk(
        &self,
        model: &str,
        payload: &[EnrichRequestItem],
        call_timeout: Duration,
    ) -> Result<Vec<EnrichResponseItem>, EnrichCallError> {
        debug!(
            "调用富化模型 {}，批大小 {}，超时 {:?}",
            model,
            payload.len(),
            call_timeout
        );

        let (system_message, user_message) = build_prompt(payload);

        let mut messages = Vec::new();
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_message)
            .build()
            .map_err(|e| EnrichCallError::Model(e.to_string()))?;
        messages.push(ChatCompletionRequestMessage::System(system));

        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()
            .map_err(|e| EnrichCallError::Model(e.to_string()))?;
        messages.push(ChatCompletionRequestMessage::User(user));

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .temperature(0.2)
            .max_tokens(2048u32)
            .build()
            .map_err(|e| EnrichCallError::Model(e.to_string()))?;

        let response = tokio::time::timeout(call_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| EnrichCallError::Timeout)?
            .map_err(classify_api_error)?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| EnrichCallError::Model("模型返回内容为空".to_string()))?;

        let parsed = extract_json(&content)
            .ok_or_else(|| EnrichCallError::Model("模型返回了非 JSON 输出".to_string()))?;
        let items = parsed
            .as_array()
            .ok_or_else(|| EnrichCallError::Model("模型返回的 JSON 不是数组".to_string()))?;

        // 逐项反序列化，坏条目跳过不拖累整批
        Ok(items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect())
    }
}

/// 按错误信息分类 API 失败
fn classify_api_error<E: std::fmt::Display>(error: E) -> EnrichCallError {
    let message = error.to_string();
    let lower = message.to_lowercase();

    if lower.contains("429")
        || lower.contains("resource_exhausted")
        || lower.contains("rate limit")
        || lower.contains("quota")
    {
        return EnrichCallError::RateLimit;
    }
    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("permission")
        || lower.contains("api key")
        || lower.contains("api_key")
    {
        return EnrichCallError::Auth;
    }
    EnrichCallError::Model(message)
}

/// 宽容地从模型输出里抠出 JSON
///
/// 依次尝试：直接解析 → 围栏代码块 → `[`..`]` 截取
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str(trimmed) {
            return Some(value);
        }
    }

    if let Some(fence_start) = trimmed.find("```") {
        let after = &trimmed[fence_start + 3..];
        // 跳过 ```json 这类语言标记
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        if let Some(fence_end) = after[body_start..].find("```") {
            let body = after[body_start..body_start + fence_end].trim();
            if let Ok(value) = serde_json::from_str(body) {
                return Some(value);
            }
        }
    }

    let first = trimmed.find('[')?;
    let last = trimmed.rfind(']')?;
    if last > first {
        return serde_json::from_str(&trimmed[first..=last]).ok();
    }
    None
}

/// 该文本是否是占位解析
pub fn is_placeholder_explanation(text: &str) -> bool {
    PLACEHOLDER_PHRASES.contains(text.trim())
}

/// 题目的已知正确标签（数组优先，单值兜底）
fn known_correct_labels(question: &Question) -> Vec<String> {
    if !question.correct_options.is_empty() {
        return question.correct_options.clone();
    }
    question.correct_option.iter().cloned().collect()
}

/// 是否已有充分解析：正确答案已知且每个选项的解析都够长
fn has_sufficient_explanations(question: &Question) -> bool {
    if known_correct_labels(question).is_empty() {
        return false;
    }
    if question.options.len() < 2 {
        return false;
    }

    question.options.iter().all(|option| {
        question
            .explanations
            .get(&option.label)
            .map(|text| {
                text.trim().chars().count() >= MIN_EXPLANATION_CHARS
                    && !is_placeholder_explanation(text)
            })
            .unwrap_or(false)
    })
}

fn build_request_item(question: &Question) -> EnrichRequestItem {
    EnrichRequestItem {
        number: question.number,
        stem: question.stem.clone(),
        options: question.options.clone(),
        known_correct_options: known_correct_labels(question),
        known_correct_option: question.correct_option.clone(),
        known_explanation_for_correct: if question.source_explanation.is_empty() {
            None
        } else {
            Some(question.source_explanation.clone())
        },
    }
}

/// 组装 (system, user) 提示词
fn build_prompt(payload: &[EnrichRequestItem]) -> (String, String) {
    let payload_json = serde_json::to_string(payload).unwrap_or_default();

    let system = "You are helping build an NBME-style medical practice quiz.".to_string();
    let user = [
        "For each question, provide concise teaching explanations for every option.",
        "Only infer answer choice labels when none are supplied in knownCorrectOptions/knownCorrectOption.",
        "Return ONLY JSON as an array with this exact shape:",
        r#"[{"number":1,"correctOption":"A","correctOptions":["A"],"explanations":{"A":"...","B":"...","C":"...","D":"..."}}]"#,
        "Rules:",
        "- Use only option labels provided.",
        "- Keep each explanation practical and educational (1-3 sentences).",
        "- Explain why the correct option is right and why each incorrect option is wrong.",
        "- If knownCorrectOptions/knownCorrectOption is provided, preserve it.",
        "",
        payload_json.as_str(),
    ]
    .join("\n");

    (system, user)
}

/// 标签值规范化：接受 `"A"` 或 `["A","C"]`，过滤非法标签并去重
fn normalize_option_labels(value: &serde_json::Value) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();

    let mut push = |raw: &str| {
        let label = raw.trim().to_ascii_uppercase();
        if label.len() == 1
            && ('A'..='F').contains(&label.chars().next().unwrap_or('?'))
            && !labels.contains(&label)
        {
            labels.push(label);
        }
    };

    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                if let Some(s) = item.as_str() {
                    push(s);
                }
            }
        }
        serde_json::Value::String(s) => push(s),
        _ => {}
    }

    labels
}

/// 把模型结果合并进题目，返回是否有解析被更新
///
/// - 正确答案只在题目原本没有时才采纳
/// - 已有的解析只有在缺失、过短或是占位句时才被覆盖
fn merge_generated(question: &mut Question, generated: &EnrichResponseItem) -> bool {
    if known_correct_labels(question).is_empty() {
        let by_array = generated
            .correct_options
            .as_ref()
            .map(normalize_option_labels)
            .unwrap_or_default();
        let by_single = generated
            .correct_option
            .as_ref()
            .map(normalize_option_labels)
            .unwrap_or_default();
        let resolved = if !by_array.is_empty() { by_array } else { by_single };

        let valid: Vec<String> = resolved
            .into_iter()
            .filter(|label| question.has_option(label))
            .collect();
        if !valid.is_empty() {
            question.correct_option = valid.first().cloned();
            question.correct_options = valid;
        }
    }

    let Some(by_option) = &generated.explanations else {
        return false;
    };

    let labels: Vec<String> = question.options.iter().map(|o| o.label.clone()).collect();
    let mut added_any = false;

    for label in labels {
        let Some(next) = by_option.get(&label) else {
            continue;
        };
        let next = next.trim();
        if next.is_empty() {
            continue;
        }

        let keep_existing = question
            .explanations
            .get(&label)
            .map(|current| {
                current.trim().chars().count() >= MIN_EXPLANATION_CHARS
                    && !is_placeholder_explanation(current)
            })
            .unwrap_or(false);
        if keep_existing {
            continue;
        }

        question.explanations.insert(label, next.to_string());
        added_any = true;
    }

    if added_any {
        question.upgrade_explanation_source(ExplanationSource::Gemini);
    }

    added_any
}
