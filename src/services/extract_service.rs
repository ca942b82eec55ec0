//! 文档文本提取 - 业务能力层
//!
//! 与解析核心的唯一约定：给定文件路径和原始文件名，返回纯文本，
//! 图片以 `[IMAGE:<src>]` 标记内嵌在原位置；格式不支持或不可读时报错。
//!
//! 本进程只实现纯文本格式（TXT/MD，Markdown 的图片语法解析器自己认）。
//! PDF/DOCX/DOC 的二进制解码由上游提取服务负责，这里统一报不支持。

use std::path::Path;
use tokio::fs;

use crate::error::{AppError, AppResult};

/// 上游提取服务负责的二进制格式
const BINARY_EXTENSIONS: [&str; 3] = ["pdf", "docx", "doc"];
/// 本进程直接读取的纯文本格式
const TEXT_EXTENSIONS: [&str; 2] = ["txt", "md"];

/// 有效文档的最小字符数（再短就当空文档处理）
const MIN_DOCUMENT_CHARS: usize = 30;

/// 文档文本提取服务
///
/// 职责：
/// - 按扩展名分派提取方式
/// - 产出已规范化的纯文本
/// - 不关心解析流程，也不碰 Quiz
pub struct TextExtractor;

impl TextExtractor {
    pub fn new() -> Self {
        Self
    }

    /// 该扩展名是否属于整个系统可接受的文档类型
    pub fn is_known_extension(extension: &str) -> bool {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        TEXT_EXTENSIONS.contains(&ext.as_str()) || BINARY_EXTENSIONS.contains(&ext.as_str())
    }

    /// 该扩展名是否能在本进程内直接提取
    pub fn is_text_extension(extension: &str) -> bool {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        TEXT_EXTENSIONS.contains(&ext.as_str())
    }

    /// 提取文档文本
    ///
    /// # 参数
    /// - `path`: 磁盘上的文件路径
    /// - `original_name`: 原始文件名（扩展名优先从这里取）
    ///
    /// # 返回
    /// 规范化后的纯文本，图片保留为 `[IMAGE:...]` 标记
    pub async fn extract(&self, path: &Path, original_name: &str) -> AppResult<String> {
        let name_for_ext = if original_name.trim().is_empty() {
            path.to_string_lossy().to_string()
        } else {
            original_name.to_string()
        };
        let extension = Path::new(&name_for_ext)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if !Self::is_text_extension(&extension) {
            return Err(AppError::unsupported_format(format!(".{}", extension)));
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| AppError::file_read_failed(path.to_string_lossy(), e))?;

        let text = crate::parser::normalize_whitespace(&content);
        if text.chars().count() < MIN_DOCUMENT_CHARS {
            return Err(AppError::empty_document(path.to_string_lossy()));
        }

        Ok(text)
    }
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractError;

    #[test]
    fn test_extension_classification() {
        assert!(TextExtractor::is_text_extension("txt"));
        assert!(TextExtractor::is_text_extension(".MD"));
        assert!(!TextExtractor::is_text_extension("pdf"));
        assert!(TextExtractor::is_known_extension(".pdf"));
        assert!(!TextExtractor::is_known_extension(".exe"));
    }

    #[tokio::test]
    async fn test_binary_format_rejected() {
        let extractor = TextExtractor::new();
        let err = extractor
            .extract(Path::new("/tmp/whatever.pdf"), "upload.pdf")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Extract(ExtractError::UnsupportedFormat { .. })
        ));
    }

    #[tokio::test]
    async fn test_plain_text_roundtrip() {
        let dir = std::env::temp_dir();
        let path = dir.join("doc_quiz_parser_extract_test.txt");
        tokio::fs::write(&path, "1) Which option is correct?\r\nA) option one\r\nB) option two\r\n")
            .await
            .unwrap();

        let extractor = TextExtractor::new();
        let text = extractor.extract(&path, "quiz.txt").await.unwrap();
        assert_eq!(text, "1) Which option is correct?\nA) option one\nB) option two");

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_tiny_document_is_empty() {
        let dir = std::env::temp_dir();
        let path = dir.join("doc_quiz_parser_tiny_test.txt");
        tokio::fs::write(&path, "too short").await.unwrap();

        let extractor = TextExtractor::new();
        let err = extractor.extract(&path, "tiny.txt").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Extract(ExtractError::EmptyDocument { .. })
        ));

        let _ = tokio::fs::remove_file(&path).await;
    }
}
