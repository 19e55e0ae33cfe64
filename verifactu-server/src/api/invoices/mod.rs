//! Invoices API 模块
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /api/invoices | POST | 定稿 (哈希 + 二维码 + 签名) |
//! | /api/invoices/{id} | GET | 查询记录 |
//! | /api/invoices/{id}/qr | GET | 二维码内容 + data URL |
//! | /api/invoices/{id}/qr.png | GET | PNG |
//! | /api/invoices/{id}/qr.svg | GET | SVG |
//! | /api/invoices/{id}/qr.escpos | GET | 热敏打印机指令 |
//! | /api/invoices/{id}/submit | POST | 提交 AEAT (`?background=true` 仅入队) |
//! | /api/invoices/{id}/check | POST | 向 AEAT 查询登记状态 (已登记则对账为 accepted) |
//! | /api/qr/validate | POST | 校验扫描到的二维码 URL |

mod handler;

use axum::{
    Router,
    routing::{get, post},
};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .nest("/api/invoices", routes())
        .route("/api/qr/validate", post(handler::validate_qr))
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/", post(handler::finalize))
        .route("/{id}", get(handler::get_by_id))
        .route("/{id}/qr", get(handler::qr_payload))
        .route("/{id}/qr.png", get(handler::qr_png))
        .route("/{id}/qr.svg", get(handler::qr_svg))
        .route("/{id}/qr.escpos", get(handler::qr_escpos))
        .route("/{id}/submit", post(handler::submit))
        .route("/{id}/check", post(handler::check))
}
