//! Organization API 模块
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /api/orgs/{org_id}/chain/verify | GET | 全链校验 (`?strict=true` 断链返回 422) |
//! | /api/orgs/{org_id}/verifactu/status | GET | 提交状态统计 |
//! | /api/orgs/{org_id}/certificate | GET | 签名证书信息 |
//! | /api/orgs/{org_id}/certificate | DELETE | 丢弃缓存的证书 (换证后重新加载) |

mod handler;

use axum::{Router, routing::get};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/orgs/{org_id}", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/chain/verify", get(handler::verify_chain))
        .route("/verifactu/status", get(handler::status))
        .route(
            "/certificate",
            get(handler::certificate).delete(handler::reload_certificate),
        )
}
