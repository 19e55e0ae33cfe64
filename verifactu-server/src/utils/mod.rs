//! 工具模块
//!
//! - [`AppError`] / [`ApiResponse`] / [`AppResult`] (from shared::error)
//! - [`logger`] 日志初始化与清理

pub mod logger;

pub use shared::error::{ApiResponse, AppError, AppResult, ErrorCode};
