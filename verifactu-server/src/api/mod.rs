//! API 路由模块
//!
//! - [`health`] - 健康检查
//! - [`invoices`] - 发票定稿、查询、二维码、提交
//! - [`orgs`] - 组织级哈希链校验、提交统计、证书信息

pub mod health;
pub mod invoices;
pub mod orgs;

pub use crate::utils::{ApiResponse, AppResult};
