//! # Core Module / 核心模块
//!
//! This module contains the core functionality of Suite Runner: the suite and
//! result data model, configuration, the worker protocol, the scheduler that
//! runs workers under a CPU budget, and the retrying run controller.
//!
//! 此模块包含 Suite Runner 的核心功能：套件与结果数据模型、配置、
//! 工作进程协议、在 CPU 预算内运行工作进程的调度器，以及带重试的运行控制器。

pub mod config;
pub mod controller;
pub mod drain;
pub mod error;
pub mod handle;
pub mod planner;
pub mod protocol;
pub mod result;
pub mod scheduler;
pub mod suite;
pub mod worker;

// Re-exports
pub use controller::{ExecutionStrategy, RunController, RunReport};
pub use result::{AggregateRun, ResultCode, RunStatus, SuiteResult};
pub use scheduler::{Scheduler, SchedulerSettings};
pub use suite::{Suite, TestCase, TestState};
