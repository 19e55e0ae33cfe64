//! Organization API Handlers

use axum::extract::{Path, Query, State};
use serde::Deserialize;
use shared::models::{ChainVerification, StatusSummary};

use crate::core::ServerState;
use crate::signing::CertificateInfo;
use crate::utils::{ApiResponse, AppResult};

#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    /// A broken chain is an error (422) instead of a report
    #[serde(default)]
    pub strict: bool,
}

/// GET /api/orgs/{org_id}/chain/verify
pub async fn verify_chain(
    State(state): State<ServerState>,
    Path(org_id): Path<String>,
    Query(query): Query<VerifyQuery>,
) -> AppResult<ApiResponse<ChainVerification>> {
    let mut report = state.invoices.verify_chain(&org_id).await?;
    if query.strict {
        report = crate::chain::ensure_intact(report)?;
    }
    Ok(ApiResponse::success(report))
}

/// GET /api/orgs/{org_id}/verifactu/status
pub async fn status(
    State(state): State<ServerState>,
    Path(org_id): Path<String>,
) -> AppResult<ApiResponse<StatusSummary>> {
    Ok(ApiResponse::success(
        state.invoices.status_summary(&org_id).await?,
    ))
}

/// GET /api/orgs/{org_id}/certificate
pub async fn certificate(
    State(state): State<ServerState>,
    Path(org_id): Path<String>,
) -> AppResult<ApiResponse<CertificateInfo>> {
    Ok(ApiResponse::success(state.certs.info(&org_id)?))
}

/// DELETE /api/orgs/{org_id}/certificate
pub async fn reload_certificate(
    State(state): State<ServerState>,
    Path(org_id): Path<String>,
) -> AppResult<ApiResponse<()>> {
    crate::signing::certificate::validate_org_id(&org_id)?;
    state.certs.invalidate(&org_id);
    tracing::info!(org_id = %org_id, "Certificate cache invalidated");
    Ok(ApiResponse::ok())
}
