use serde::Deserialize;
use std::path::Path;

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 待处理文档目录
    pub input_folder: String,
    /// 测验 JSON 输出目录
    pub output_folder: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
    // --- Gemini 富化配置 ---
    /// 是否启用富化
    pub enrich_enabled: bool,
    pub gemini_api_key: String,
    /// OpenAI 兼容端点
    pub gemini_api_base_url: String,
    /// 首选模型（放到回退链最前面）
    pub gemini_model: String,
    /// 限流回退链
    pub gemini_model_chain: Vec<String>,
    /// 每批题目数
    pub gemini_chunk_size: usize,
    /// 单次调用超时（毫秒）
    pub gemini_chunk_timeout_ms: u64,
    /// 整体墙钟预算（毫秒）
    pub gemini_max_ms: u64,
    /// 单次富化最多处理的题目数
    pub gemini_max_questions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_folder: "input_docs".to_string(),
            output_folder: "output_quizzes".to_string(),
            verbose_logging: false,
            output_log_file: "output.txt".to_string(),
            enrich_enabled: false,
            gemini_api_key: String::new(),
            gemini_api_base_url: "https://generativelanguage.googleapis.com/v1beta/openai"
                .to_string(),
            gemini_model: String::new(),
            gemini_model_chain: vec![
                "gemini-2.5-flash-lite".to_string(),
                "gemini-3.0-flash".to_string(),
                "gemini-2.5-flash".to_string(),
                "gemma-3-12b-it".to_string(),
            ],
            gemini_chunk_size: 3,
            gemini_chunk_timeout_ms: 12_000,
            gemini_max_ms: 35_000,
            gemini_max_questions: 40,
        }
    }
}

impl Config {
    /// 加载配置：先读 config.toml（如果有），再叠加环境变量
    pub fn load() -> Self {
        let base = Self::from_toml_file(Path::new("config.toml")).unwrap_or_default();
        base.with_env_overrides()
    }

    /// 从 TOML 文件加载（文件不存在或无法解析时返回 None）
    pub fn from_toml_file(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        toml::from_str(&content).ok()
    }

    /// 用环境变量覆盖已有配置
    pub fn with_env_overrides(self) -> Self {
        Self {
            input_folder: std::env::var("INPUT_FOLDER").unwrap_or(self.input_folder),
            output_folder: std::env::var("OUTPUT_FOLDER").unwrap_or(self.output_folder),
            verbose_logging: std::env::var("VERBOSE_LOGGING")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(self.output_log_file),
            enrich_enabled: std::env::var("ENRICH_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.enrich_enabled),
            gemini_api_key: std::env::var("GEMINI_API_KEY").unwrap_or(self.gemini_api_key),
            gemini_api_base_url: std::env::var("GEMINI_API_BASE_URL")
                .unwrap_or(self.gemini_api_base_url),
            gemini_model: std::env::var("GEMINI_MODEL").unwrap_or(self.gemini_model),
            gemini_model_chain: std::env::var("GEMINI_MODEL_CHAIN")
                .ok()
                .map(|v| parse_model_chain(&v))
                .filter(|chain| !chain.is_empty())
                .unwrap_or(self.gemini_model_chain),
            gemini_chunk_size: std::env::var("GEMINI_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.gemini_chunk_size),
            gemini_chunk_timeout_ms: std::env::var("GEMINI_CHUNK_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.gemini_chunk_timeout_ms),
            gemini_max_ms: std::env::var("GEMINI_MAX_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.gemini_max_ms),
            gemini_max_questions: std::env::var("GEMINI_MAX_QUESTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.gemini_max_questions),
        }
    }

    /// 构建完整回退链：首选模型在前，去重去空
    pub fn model_chain(&self) -> Vec<String> {
        let preferred = self.gemini_model.trim();
        let mut chain: Vec<String> = Vec::new();

        if !preferred.is_empty() {
            chain.push(preferred.to_string());
        }
        for model in &self.gemini_model_chain {
            let model = model.trim();
            if !model.is_empty() && !chain.iter().any(|m| m == model) {
                chain.push(model.to_string());
            }
        }
        chain
    }
}

/// 逗号分隔的模型链
fn parse_model_chain(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
