//! # Infrastructure Module / 基础设施模块
//!
//! This module provides infrastructure services for Suite Runner,
//! including native command execution, process signalling, file system
//! operations, and i18n support.
//!
//! 此模块为 Suite Runner 提供基础设施服务，
//! 包括原生命令执行、进程信号、文件系统操作和国际化支持。

pub mod command;
pub mod fs;

// Re-export i18n functions for easier access
pub use rust_i18n::t;
