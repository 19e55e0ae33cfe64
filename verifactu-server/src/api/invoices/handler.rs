//! Invoices API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use shared::models::{InvoiceDraft, InvoiceRecord};

use crate::core::ServerState;
use crate::qr::{self, SHORT_LEGEND, VerificationPayload};
use crate::submission::StatusCheck;
use crate::utils::{ApiResponse, AppResult};

/// POST /api/invoices
pub async fn finalize(
    State(state): State<ServerState>,
    Json(draft): Json<InvoiceDraft>,
) -> AppResult<ApiResponse<InvoiceRecord>> {
    let record = state.invoices.finalize(draft).await?;
    Ok(ApiResponse::success(record))
}

/// GET /api/invoices/{id}
pub async fn get_by_id(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse<InvoiceRecord>> {
    Ok(ApiResponse::success(state.invoices.get(id).await?))
}

#[derive(Debug, Serialize)]
pub struct QrView {
    pub payload: VerificationPayload,
    pub short_legend: &'static str,
    /// `data:image/png;base64,...`
    pub data_url: String,
}

/// GET /api/invoices/{id}/qr
pub async fn qr_payload(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse<QrView>> {
    let record = state.invoices.get(id).await?;
    let payload = qr::parse_verification_payload(&record.qr_payload)?;
    let data_url = qr::render_data_url(&record.qr_payload)?;
    Ok(ApiResponse::success(QrView {
        payload,
        short_legend: SHORT_LEGEND,
        data_url,
    }))
}

/// GET /api/invoices/{id}/qr.png
pub async fn qr_png(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let record = state.invoices.get(id).await?;
    let png = qr::render_png(&record.qr_payload)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png))
}

/// GET /api/invoices/{id}/qr.svg
pub async fn qr_svg(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let record = state.invoices.get(id).await?;
    let svg = qr::render_svg(&record.qr_payload)?;
    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg))
}

#[derive(Debug, Deserialize)]
pub struct EscPosQuery {
    /// Dots per module (1-16)
    #[serde(default = "default_module_size")]
    pub module_size: u8,
}

fn default_module_size() -> u8 {
    6
}

/// GET /api/invoices/{id}/qr.escpos
pub async fn qr_escpos(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
    Query(query): Query<EscPosQuery>,
) -> AppResult<impl IntoResponse> {
    let record = state.invoices.get(id).await?;
    let bytes = qr::render_escpos(&record.qr_payload, query.module_size)?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes))
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitQuery {
    /// Only enqueue; the worker submits later
    #[serde(default)]
    pub background: bool,
}

/// POST /api/invoices/{id}/submit
pub async fn submit(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
    Query(query): Query<SubmitQuery>,
) -> AppResult<ApiResponse<InvoiceRecord>> {
    if query.background {
        let record = state.invoices.get(id).await?;
        state.enqueue_submission(id);
        return Ok(ApiResponse::success_with_message("Submission queued", record));
    }
    Ok(ApiResponse::success(state.submissions.submit(id).await?))
}

/// POST /api/invoices/{id}/check
pub async fn check(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse<StatusCheck>> {
    Ok(ApiResponse::success(state.submissions.check(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ValidateQrRequest {
    pub url: String,
}

/// POST /api/qr/validate
pub async fn validate_qr(
    Json(req): Json<ValidateQrRequest>,
) -> AppResult<ApiResponse<VerificationPayload>> {
    Ok(ApiResponse::success(qr::parse_verification_payload(&req.url)?))
}
