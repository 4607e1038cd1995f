//! # Suite Runner Library / Suite Runner 库
//!
//! This library provides the core functionality for Suite Runner, a parallel
//! test-suite scheduler. Suites run in isolated worker processes under a CPU
//! budget; hung or crashed workers are detected and killed, and failed suites
//! are retried.
//!
//! 此库为 Suite Runner 提供核心功能，这是一个并行测试套件调度器。
//! 套件在 CPU 预算内的独立工作进程中运行；挂起或崩溃的工作进程会被检测并终止，
//! 失败的套件会被重试。
//!
//! ## Modules / 模块
//!
//! - `core` - Data model, result ledger, scheduler, worker and run controller
//! - `infra` - Native command execution and file system helpers
//! - `reporting` - Run summary printed to the console
//! - `cli` - Command-line interface and commands
//!
//! - `core` - 数据模型、结果账本、调度器、工作进程和运行控制器
//! - `infra` - 原生命令执行和文件系统辅助功能
//! - `reporting` - 打印到控制台的运行摘要
//! - `cli` - 命令行接口和命令

pub mod cli;
pub mod core;
pub mod infra;
pub mod reporting;

// Re-export commonly used items
pub use core::config;
pub use core::result;
pub use core::suite;

/// Initializes the application's internationalization (i18n) based on the system locale.
///
/// This function detects the user's system locale and sets the appropriate
/// language for the application's user interface. It attempts to match the full
/// locale (e.g., "zh-CN"), then just the language code (e.g., "en"), and
/// finally falls back to the default language ("en").
pub fn init() {
    let locale = sys_locale::get_locale().unwrap_or_else(|| "en".to_string());
    set_language(&locale);
}

/// Sets the UI language, falling back to the bare language code and then "en".
pub fn set_language(locale: &str) {
    let available_locales = rust_i18n::available_locales!();

    let lang = if available_locales.contains(&locale) {
        locale
    } else {
        locale
            .split('-')
            .next()
            .filter(|lang_code| available_locales.contains(lang_code))
            .unwrap_or("en")
    };

    rust_i18n::set_locale(lang);
}

// Initialize i18n
rust_i18n::i18n!("locales", fallback = "en");
