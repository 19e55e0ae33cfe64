//! Verifactu 发票哈希链服务
//!
//! # 架构概述
//!
//! - **哈希链** (`chain`): 组织级 SHA-256 链，串行追加与全链校验
//! - **二维码** (`qr`): AEAT 校验 URL 及 PNG/SVG/ESC-POS 渲染
//! - **签名** (`signing`): 组织证书缓存与记录签名
//! - **提交** (`submission`): RegistroAlta 报文、重试、后台队列
//! - **HTTP API** (`api`): RESTful 接口
//!
//! # 模块结构
//!
//! ```text
//! verifactu-server/src/
//! ├── core/          # 配置、状态、后台任务、HTTP 服务器
//! ├── api/           # HTTP 路由和处理器
//! ├── chain/         # 规范字段、哈希、链写入、定时校验
//! ├── invoicing/     # 定稿流程
//! ├── qr/            # 校验 URL 与渲染
//! ├── signing/       # 证书与签名
//! ├── submission/    # AEAT 提交
//! ├── db/            # SQLite 仓储
//! └── utils/         # 日志
//! ```

pub mod api;
pub mod chain;
pub mod core;
pub mod db;
pub mod error;
pub mod invoicing;
pub mod qr;
pub mod signing;
pub mod submission;
pub mod utils;

// Re-export 公共类型
pub use chain::{ChainBuilder, GENESIS_HASH};
pub use core::{Config, Server, ServerState};
pub use error::{VerifactuError, VerifactuResult};
pub use invoicing::InvoiceService;
pub use submission::{AuthorityClient, SubmissionService};
pub use utils::{ApiResponse, AppError, AppResult, ErrorCode};

// Re-export logger functions
pub use utils::logger::{cleanup_old_logs, init_logger_with_file};

pub fn print_banner() {
    println!(
        r#"
 _    __          _ ____           __
| |  / /__  _____(_) __/___ ______/ /___  __
| | / / _ \/ ___/ / /_/ __ `/ ___/ __/ / / /
| |/ /  __/ /  / / __/ /_/ / /__/ /_/ /_/ /
|___/\___/_/  /_/_/  \__,_/\___/\__/\__,_/
    "#
    );
}
