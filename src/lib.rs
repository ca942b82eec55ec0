//! # Doc Quiz Parser
//!
//! 把无结构的学习文档文本解析成结构化选择题测验的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的分层架构：
//!
//! ### ① 解析层（Parser）
//! - `parser/` - 纯同步的文本到测验流水线，无 I/O、无共享状态、不抛错
//! - 规范化 → 区域切分 → 题目提取 → 块解析 → 答案解析 → 合并定型
//!
//! ### ② 数据模型层（Models）
//! - `models/` - Quiz / Question / ParsingStats，serde 序列化为约定的 JSON 形状
//!
//! ### ③ 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个文档或单批题目
//! - `TextExtractor` - 文档文本提取能力（TXT/MD；二进制格式归上游）
//! - `EnrichService` - 模型富化能力（回退链 + 批次拆分 + 墙钟预算）
//!
//! ### ④ 编排层（App）
//! - `app.rs` - 批量文档处理器，扫描目录、串起各阶段、汇总统计
//!
//! ## 模块结构

pub mod app;
pub mod config;
pub mod error;
pub mod models;
pub mod parser;
pub mod services;
pub mod utils;

// 重新导出常用类型
pub use app::App;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{ParsingStats, Question, QuestionOption, QuestionType, Quiz};
pub use parser::build_quiz_from_text;
pub use services::{EnrichReport, EnrichService, TextExtractor};
