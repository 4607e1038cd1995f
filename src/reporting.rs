//! # Reporting Module / 报告模块
//!
//! This module prints run summaries to the console, colored and localized.
//!
//! 此模块将运行摘要打印到控制台，支持彩色输出和国际化。

pub mod console;

// Re-export common reporting functions
pub use console::{print_results, render_results};
