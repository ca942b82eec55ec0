//! 文本规范化
//!
//! 所有后续阶段都消费这里产出的规范形式：
//! - `\r\n` / `\r` 统一为 `\n`
//! - 不间断空格、制表符折叠为单个空格
//! - 连续 2 个以上空格折叠为 1 个，行尾空白去除
//! - 连续多个空行折叠为 1 个空行
//! - 去掉首尾空白
//!
//! 纯函数、幂等、无失败路径。

/// 把任意行尾约定的原始文本折叠为规范形式
pub fn normalize_whitespace(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut pending_blank = false;
    let mut wrote_any = false;

    for raw_line in unified.split('\n') {
        let line = collapse_spaces(raw_line);

        if line.is_empty() {
            // 空行先挂起，多个连续空行只保留一个
            pending_blank = wrote_any;
            continue;
        }

        if wrote_any {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        out.push_str(&line);
        wrote_any = true;
        pending_blank = false;
    }

    out
}

/// 单行内：NBSP/制表符当作空格，连续空格折叠为一个，行尾空白去除
fn collapse_spaces(line: &str) -> String {
    let mut collapsed = String::with_capacity(line.len());
    let mut in_space = false;

    for c in line.chars() {
        if c == ' ' || c == '\u{00A0}' || c == '\t' {
            if !in_space {
                collapsed.push(' ');
            }
            in_space = true;
        } else {
            collapsed.push(c);
            in_space = false;
        }
    }

    collapsed.trim_end().to_string()
}
