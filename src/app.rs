//! 批量文档处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量文档的处理流程。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：启动日志文件、创建提取/富化服务
//! 2. **批量加载**：扫描输入目录下所有可处理的文档
//! 3. **逐个处理**：提取文本 → 解析测验 → （可选）富化 → 回填解析 → 写出 JSON
//! 4. **全局统计**：汇总所有文档的处理结果
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个文档的解析细节
//! - **向下委托**：解析委托给 parser，能力委托给 services
//! - **错误不外溢**：单个文档失败只计数，不中断批次

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::models::{ExplanationSource, Quiz};
use crate::parser;
use crate::services::enrich_service::PLACEHOLDER_EXPLANATION;
use crate::services::{EnrichReport, EnrichService, TextExtractor};
use crate::utils::logging::{init_log_file, truncate_text};

/// 应用主结构
pub struct App {
    config: Config,
    extractor: TextExtractor,
    enricher: Option<EnrichService>,
}

/// 处理统计
#[derive(Debug, Default)]
struct ProcessingStats {
    success: usize,
    failed: usize,
    total: usize,
}

impl App {
    /// 初始化应用
    pub fn initialize(config: Config) -> Result<Self> {
        init_log_file(&config.output_log_file)?;
        log_startup(&config);

        let enricher = if config.enrich_enabled {
            Some(EnrichService::new(&config))
        } else {
            None
        };

        Ok(Self {
            config,
            extractor: TextExtractor::new(),
            enricher,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<()> {
        let documents = self.load_documents().await?;

        if documents.is_empty() {
            warn!("⚠️ 输入目录里没有可处理的文档，程序结束");
            return Ok(());
        }

        fs::create_dir_all(&self.config.output_folder)
            .await
            .with_context(|| format!("无法创建输出目录: {}", self.config.output_folder))?;

        let mut stats = ProcessingStats {
            total: documents.len(),
            ..Default::default()
        };
        info!("✓ 找到 {} 个待处理的文档\n", documents.len());

        for (idx, path) in documents.iter().enumerate() {
            let doc_index = idx + 1;
            log_document_start(doc_index, documents.len(), path);

            match self.process_document(doc_index, path).await {
                Ok(_) => stats.success += 1,
                Err(e) => {
                    error!("[文档 {}] ❌ 处理失败: {:#}", doc_index, e);
                    stats.failed += 1;
                }
            }
        }

        print_final_stats(&stats, &self.config);
        Ok(())
    }

    /// 扫描输入目录，收集可处理的文档路径
    async fn load_documents(&self) -> Result<Vec<PathBuf>> {
        info!("\n📁 正在扫描待处理的文档...");
        let folder = Path::new(&self.config.input_folder);
        if !folder.exists() {
            anyhow::bail!("输入目录不存在: {}", self.config.input_folder);
        }

        let mut documents = Vec::new();
        let mut entries = fs::read_dir(folder)
            .await
            .with_context(|| format!("无法读取目录: {}", self.config.input_folder))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let extension = path
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default();
            if path.is_file() && TextExtractor::is_text_extension(&extension) {
                documents.push(path);
            }
        }

        documents.sort();
        Ok(documents)
    }

    /// 处理单个文档：提取 → 解析 → 富化 → 回填 → 写出
    async fn process_document(&self, doc_index: usize, path: &Path) -> Result<()> {
        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let text = self.extractor.extract(path, &original_name).await?;

        let mut quiz = parser::build_quiz_from_text(&text);
        log_parsing(doc_index, &quiz);

        // 一道题都没切出来：对外就是这个文档处理失败
        if quiz.questions.is_empty() {
            anyhow::bail!(
                "No valid multiple-choice questions were detected. Check document format (Question N + answer choices)."
            );
        }

        if let Some(enricher) = &self.enricher {
            info!("[文档 {}] 🤖 正在请求模型补齐答案与解析...", doc_index);
            let report = enricher.enrich(&mut quiz.questions).await;
            log_enrichment(doc_index, &report);
        }

        backfill_explanations(&mut quiz);

        let output_path = self.output_path_for(path);
        let json = serde_json::to_string_pretty(&quiz)?;
        fs::write(&output_path, json)
            .await
            .with_context(|| format!("无法写入输出文件: {}", output_path.display()))?;

        info!(
            "[文档 {}] ✅ 测验已写出: {} ({} 题)\n",
            doc_index,
            output_path.display(),
            quiz.questions.len()
        );
        Ok(())
    }

    fn output_path_for(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "quiz".to_string());
        Path::new(&self.config.output_folder).join(format!("{}.quiz.json", stem))
    }
}

/// 每个选项都兜底一条解析
///
/// 缺失或过短的解析先用文档解析文本补，再不行用占位句。
fn backfill_explanations(quiz: &mut Quiz) {
    for question in &mut quiz.questions {
        let labels: Vec<String> = question.options.iter().map(|o| o.label.clone()).collect();

        for label in labels {
            let sufficient = question
                .explanations
                .get(&label)
                .map(|text| text.trim().chars().count() >= 5)
                .unwrap_or(false);
            if sufficient {
                continue;
            }

            if !question.source_explanation.is_empty() {
                question
                    .explanations
                    .insert(label, question.source_explanation.clone());
                if question.explanation_source == ExplanationSource::None {
                    question.explanation_source = ExplanationSource::Document;
                }
            } else {
                question
                    .explanations
                    .insert(label, PLACEHOLDER_EXPLANATION.to_string());
            }
        }
    }
}

// ========== 日志辅助函数 ==========

fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 文档转测验模式");
    info!("📂 输入目录: {}", config.input_folder);
    info!("📂 输出目录: {}", config.output_folder);
    info!(
        "🤖 模型富化: {}",
        if config.enrich_enabled { "启用" } else { "关闭" }
    );
    info!("{}", "=".repeat(60));
}

fn log_document_start(doc_index: usize, total: usize, path: &Path) {
    info!("\n[文档 {}] {}", doc_index, "─".repeat(30));
    info!(
        "[文档 {}] 处理第 {}/{} 个文档: {}",
        doc_index,
        doc_index,
        total,
        path.display()
    );
}

fn log_parsing(doc_index: usize, quiz: &Quiz) {
    info!(
        "[文档 {}] ✓ 解析完成: {} 题, 已映射答案 {}, 已映射解析 {}, 答案区: {}",
        doc_index,
        quiz.parsing.total_questions,
        quiz.parsing.answers_mapped,
        quiz.parsing.explanations_mapped,
        if quiz.parsing.detected_answer_section {
            "有"
        } else {
            "无"
        }
    );
    info!(
        "[文档 {}] 标题: {}",
        doc_index,
        truncate_text(&quiz.title, 60)
    );
}

fn log_enrichment(doc_index: usize, report: &EnrichReport) {
    if !report.attempted {
        info!("[文档 {}] 富化未执行: {}", doc_index, report.reason);
        return;
    }
    info!(
        "[文档 {}] ✓ 富化完成: 更新 {} 题, 失败 {} 批, 模型: {}",
        doc_index,
        report.updated_questions,
        report.failed_chunks,
        report.model.as_deref().unwrap_or("-")
    );
    if !report.reason.is_empty() {
        info!("[文档 {}] 富化备注: {}", doc_index, report.reason);
    }
}

fn print_final_stats(stats: &ProcessingStats, config: &Config) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", stats.success, stats.total);
    info!("❌ 失败: {}", stats.failed);
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", config.output_log_file);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Question, QuestionOption};

    fn quiz_with_question(question: Question) -> Quiz {
        Quiz {
            title: "t".into(),
            questions: vec![question],
            parsing: Default::default(),
        }
    }

    #[test]
    fn test_backfill_uses_source_explanation() {
        let mut q = Question::new(1);
        q.options.push(QuestionOption::new("A", "one"));
        q.options.push(QuestionOption::new("B", "two"));
        q.source_explanation = "From the document answer section.".to_string();

        let mut quiz = quiz_with_question(q);
        backfill_explanations(&mut quiz);

        let q = &quiz.questions[0];
        assert_eq!(q.explanations["A"], "From the document answer section.");
        assert_eq!(q.explanations["B"], "From the document answer section.");
        assert_eq!(q.explanation_source, ExplanationSource::Document);
    }

    #[test]
    fn test_backfill_placeholder_without_source() {
        let mut q = Question::new(2);
        q.options.push(QuestionOption::new("A", "one"));
        q.options.push(QuestionOption::new("B", "two"));

        let mut quiz = quiz_with_question(q);
        backfill_explanations(&mut quiz);

        assert_eq!(quiz.questions[0].explanations["A"], PLACEHOLDER_EXPLANATION);
        assert_eq!(
            quiz.questions[0].explanation_source,
            ExplanationSource::None
        );
    }

    #[test]
    fn test_backfill_keeps_existing() {
        let mut q = Question::new(3);
        q.options.push(QuestionOption::new("A", "one"));
        q.explanations
            .insert("A".to_string(), "Existing rationale.".to_string());

        let mut quiz = quiz_with_question(q);
        backfill_explanations(&mut quiz);

        assert_eq!(quiz.questions[0].explanations["A"], "Existing rationale.");
    }
}
