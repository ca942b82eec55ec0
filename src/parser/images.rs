//! 图片引用提取
//!
//! 文档提取器会把图片以 `[IMAGE:<src>]` 标记内嵌在文本里；Markdown 原文
//! 还可能带 `![..](..)` 语法、`Image:`/`Figure:` 前缀行或裸的图片路径行。
//! 这里统一把它们从文本中剥离并收集为去重后的引用列表。

use regex::Regex;
use std::sync::LazyLock;

use super::normalize::normalize_whitespace;

/// 合法图片扩展名结尾（可带查询串）
static IMAGE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(?:png|jpe?g|gif|webp|bmp|svg)(?:\?[^)\s]*)?$").unwrap()
});

static MARKDOWN_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)!\[[^\]]*\]\(([^)]+)\)").unwrap());

static IMAGE_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[IMAGE:([^\]]+)\]").unwrap());

/// `Image: xxx` / `Figure - xxx` 行
static IMAGE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[ ]*(?:image|figure)[ ]*[:\-][ ]*([^\n]+)$").unwrap());

/// 整行只有一个图片路径/URL/文件名
static BARE_IMAGE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ ]*((?:https?://|/|\./|\.\./)?[^\s]+\.(?:png|jpe?g|gif|webp|bmp|svg)(?:\?[^\s]+)?)[ ]*$",
    )
    .unwrap()
});

static DATA_URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^data:image/").unwrap());
static HTTP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^https?://").unwrap());
static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:/|\./|\.\./)").unwrap());
static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[^\s/]+?\.(?:png|jpe?g|gif|webp|bmp|svg)$").unwrap());

/// 提取结果：剥离图片标记后的文本 + 收集到的图片引用
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedImages {
    pub text: String,
    pub images: Vec<String>,
}

/// 校验并收集一个图片引用，去重且保持插入顺序
pub fn maybe_push_image(images: &mut Vec<String>, raw_source: &str) {
    let source = raw_source
        .trim()
        .trim_end_matches([')', ',', '.', ';'])
        .to_string();
    if source.is_empty() {
        return;
    }

    let is_data_url = DATA_URL_RE.is_match(&source);
    let is_http = HTTP_RE.is_match(&source) && IMAGE_PATH_RE.is_match(&source);
    let is_relative = RELATIVE_RE.is_match(&source) && IMAGE_PATH_RE.is_match(&source);
    let is_filename = FILENAME_RE.is_match(&source);

    if !is_data_url && !is_http && !is_relative && !is_filename {
        return;
    }

    if !images.iter().any(|i| *i == source) {
        images.push(source);
    }
}

/// 从一段文本中剥离所有图片标记并收集引用
pub fn extract_image_refs(text: &str) -> ExtractedImages {
    let mut images = Vec::new();

    for caps in MARKDOWN_IMAGE_RE.captures_iter(text) {
        maybe_push_image(&mut images, &caps[1]);
    }
    let cleaned = MARKDOWN_IMAGE_RE.replace_all(text, "").into_owned();

    for caps in IMAGE_MARKER_RE.captures_iter(&cleaned) {
        maybe_push_image(&mut images, &caps[1]);
    }
    let cleaned = IMAGE_MARKER_RE.replace_all(&cleaned, "").into_owned();

    for caps in IMAGE_LINE_RE.captures_iter(&cleaned) {
        // 行内容的第一个空白分隔 token 才是候选路径
        if let Some(candidate) = caps[1].trim().split_whitespace().next() {
            maybe_push_image(&mut images, candidate);
        }
    }
    let cleaned = IMAGE_LINE_RE.replace_all(&cleaned, "").into_owned();

    for caps in BARE_IMAGE_LINE_RE.captures_iter(&cleaned) {
        maybe_push_image(&mut images, &caps[1]);
    }
    let cleaned = BARE_IMAGE_LINE_RE.replace_all(&cleaned, "").into_owned();

    ExtractedImages {
        text: normalize_whitespace(&cleaned),
        images,
    }
}

/// 该行是否是独立的 `[IMAGE:...]` 标记行
pub fn is_image_marker_line(line: &str) -> bool {
    line.trim_start().to_ascii_uppercase().starts_with("[IMAGE:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_marker_extracted() {
        let got = extract_image_refs("A 30-year-old man.\n[IMAGE:./figs/cxr.png]\nWhat next?");
        assert_eq!(got.images, vec!["./figs/cxr.png"]);
        assert_eq!(got.text, "A 30-year-old man.\n\nWhat next?");
    }

    #[test]
    fn test_pathless_subdir_source_rejected() {
        // 带子目录但不带 ./ 前缀的引用既不是相对路径也不是纯文件名
        let mut images = Vec::new();
        maybe_push_image(&mut images, "figs/cxr.png");
        assert!(images.is_empty());
    }

    #[test]
    fn test_markdown_image_extracted() {
        let got = extract_image_refs("See ![chest x-ray](./img/cxr.jpg) for details");
        assert_eq!(got.images, vec!["./img/cxr.jpg"]);
        assert_eq!(got.text, "See for details");
    }

    #[test]
    fn test_figure_line_and_bare_path() {
        let got = extract_image_refs("Stem text\nFigure: lesion.png caption words\n/abs/path/ecg.svg\nMore");
        assert_eq!(got.images, vec!["lesion.png", "/abs/path/ecg.svg"]);
        assert_eq!(got.text, "Stem text\n\nMore");
    }

    #[test]
    fn test_invalid_sources_rejected() {
        let mut images = Vec::new();
        maybe_push_image(&mut images, "not an image");
        maybe_push_image(&mut images, "https://example.com/page.html");
        maybe_push_image(&mut images, "");
        assert!(images.is_empty());
    }

    #[test]
    fn test_data_url_and_dedup() {
        let mut images = Vec::new();
        maybe_push_image(&mut images, "data:image/png;base64,AAAA");
        maybe_push_image(&mut images, "data:image/png;base64,AAAA");
        maybe_push_image(&mut images, "scan.jpeg,");
        assert_eq!(images, vec!["data:image/png;base64,AAAA", "scan.jpeg"]);
    }

    #[test]
    fn test_http_needs_image_extension() {
        let mut images = Vec::new();
        maybe_push_image(&mut images, "https://example.com/a/cxr.png?resize=2");
        assert_eq!(images.len(), 1);
    }
}
