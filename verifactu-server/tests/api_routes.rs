//! HTTP surface through the full router

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::{MockAuthority, draft, install_cert, setup};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;
use verifactu_server::ErrorCode;
use verifactu_server::core::build_app;

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Vec<u8>, Option<String>) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec(), content_type)
}

async fn send_json(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body, _) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_database() {
    let env = setup(Arc::new(MockAuthority::accepting())).await;
    let (status, body) = send_json(build_app(env.state.clone()), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"]["status"], "ok");
}

#[tokio::test]
async fn test_finalize_then_fetch_and_render() {
    let env = setup(Arc::new(MockAuthority::accepting())).await;
    let app = build_app(env.state.clone());

    let payload = serde_json::to_value(draft("org-1", "0001", "121.00")).unwrap();
    let (status, body) = send_json(app.clone(), post_json("/api/invoices", payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    let id = body["data"]["id"].as_i64().unwrap();
    let hash = body["data"]["current_hash"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["chain_index"], 0);

    let (status, body) = send_json(app.clone(), get(&format!("/api/invoices/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["current_hash"], hash.as_str());

    let (status, body) = send_json(app.clone(), get(&format!("/api/invoices/{id}/qr"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["payload"]["nif"], "B12345678");
    assert_eq!(body["data"]["payload"]["amount"], "121.00");
    assert_eq!(body["data"]["payload"]["hash"], hash.as_str());
    assert!(
        body["data"]["data_url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,")
    );

    let (status, png, content_type) =
        send(app.clone(), get(&format!("/api/invoices/{id}/qr.png"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/png"));
    assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

    let (status, svg, content_type) =
        send(app.clone(), get(&format!("/api/invoices/{id}/qr.svg"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/svg+xml"));
    assert!(String::from_utf8(svg).unwrap().contains("<svg"));

    let (status, escpos, _) = send(
        app,
        get(&format!("/api/invoices/{id}/qr.escpos?module_size=4")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&escpos[..3], &[0x1D, 0x28, 0x6B]);
}

#[tokio::test]
async fn test_invalid_draft_returns_field_error() {
    let env = setup(Arc::new(MockAuthority::accepting())).await;
    let payload = serde_json::to_value(draft("org-1", "0001", "abc")).unwrap();

    let (status, body) =
        send_json(build_app(env.state.clone()), post_json("/api/invoices", payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], ErrorCode::InvoiceInvalidAmount.code());
    assert_eq!(body["details"]["field"], "total_amount");
}

#[tokio::test]
async fn test_unknown_invoice_is_not_found() {
    let env = setup(Arc::new(MockAuthority::accepting())).await;
    let (status, body) = send_json(build_app(env.state.clone()), get("/api/invoices/42")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], ErrorCode::InvoiceNotFound.code());
}

#[tokio::test]
async fn test_submit_endpoint_sync_and_background() {
    let authority = Arc::new(MockAuthority::accepting());
    let env = setup(authority.clone()).await;
    let app = build_app(env.state.clone());

    let first = env
        .state
        .invoices
        .finalize(draft("org-1", "0001", "10"))
        .await
        .unwrap();
    let (status, body) = send_json(
        app.clone(),
        Request::post(format!("/api/invoices/{}/submit", first.id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["submission_status"], "accepted");

    let second = env
        .state
        .invoices
        .finalize(draft("org-1", "0002", "10"))
        .await
        .unwrap();
    let (status, body) = send_json(
        app,
        Request::post(format!("/api/invoices/{}/submit?background=true", second.id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Submission queued");
    assert_eq!(body["data"]["submission_status"], "pending");
    assert_eq!(authority.calls(), 1);
}

#[tokio::test]
async fn test_org_endpoints() {
    let env = setup(Arc::new(MockAuthority::accepting())).await;
    let app = build_app(env.state.clone());

    env.state
        .invoices
        .finalize(draft("org-1", "0001", "10"))
        .await
        .unwrap();

    let (status, body) = send_json(app.clone(), get("/api/orgs/org-1/chain/verify")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], true);
    assert_eq!(body["data"]["length"], 1);

    let (status, body) = send_json(app.clone(), get("/api/orgs/org-1/verifactu/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pending"], 1);

    let (status, body) = send_json(app.clone(), get("/api/orgs/org-1/certificate")).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["code"], ErrorCode::CertificateMissing.code());

    install_cert(&env.state, "org-1", false);
    let (status, body) = send_json(app.clone(), get("/api/orgs/org-1/certificate")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tax_id"], "B12345678");
    assert_eq!(body["data"]["expired"], false);

    let (status, _) = send_json(
        app,
        Request::delete("/api/orgs/org-1/certificate")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_qr_validate_decodes_scanned_url() {
    let env = setup(Arc::new(MockAuthority::accepting())).await;
    let record = env
        .state
        .invoices
        .finalize(draft("org-1", "0001", "121"))
        .await
        .unwrap();
    let app = build_app(env.state.clone());

    let (status, body) = send_json(
        app.clone(),
        post_json("/api/qr/validate", json!({ "url": record.qr_payload })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["invoice_number"], "A-0001");
    assert_eq!(body["data"]["issue_date"], "01-03-2024");

    let (status, _) = send_json(
        app,
        post_json("/api/qr/validate", json!({ "url": "not a url" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_strict_chain_verify_rejects_tampered_chain() {
    let env = setup(Arc::new(MockAuthority::accepting())).await;
    let app = build_app(env.state.clone());
    for (number, total) in [("0001", "10"), ("0002", "20")] {
        env.state
            .invoices
            .finalize(draft("org-1", number, total))
            .await
            .unwrap();
    }

    let (status, body) =
        send_json(app.clone(), get("/api/orgs/org-1/chain/verify?strict=true")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["length"], 2);

    sqlx::query("DROP TRIGGER trg_invoice_record_immutable")
        .execute(&env.state.pool)
        .await
        .unwrap();
    sqlx::query("UPDATE invoice_record SET total_amount = '99.00' WHERE number = '0002'")
        .execute(&env.state.pool)
        .await
        .unwrap();

    // the plain report still answers 200 with valid = false
    let (status, body) = send_json(app.clone(), get("/api/orgs/org-1/chain/verify")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], false);
    assert_eq!(body["data"]["first_break"]["index"], 1);

    let (status, body) = send_json(app, get("/api/orgs/org-1/chain/verify?strict=true")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], ErrorCode::ChainIntegrityBroken.code());
}

#[tokio::test]
async fn test_check_endpoint_reports_registration() {
    let authority = Arc::new(MockAuthority::accepting());
    let env = setup(authority.clone()).await;
    let app = build_app(env.state.clone());
    let record = env
        .state
        .invoices
        .finalize(draft("org-1", "0001", "10"))
        .await
        .unwrap();

    let check = |id: i64| {
        Request::post(format!("/api/invoices/{id}/check"))
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = send_json(app.clone(), check(record.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["registration"]["state"], "not_registered");
    assert_eq!(body["data"]["reconciled"], false);

    authority.mark_registered(record.id, "CSV-ELSEWHERE");
    let (status, body) = send_json(app.clone(), check(record.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["registration"]["state"], "registered");
    assert_eq!(body["data"]["registration"]["csv"], "CSV-ELSEWHERE");
    assert_eq!(body["data"]["reconciled"], true);
    assert_eq!(body["data"]["record"]["submission_status"], "accepted");
    assert_eq!(authority.calls(), 0);

    let (status, body) = send_json(app, check(4242)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], ErrorCode::InvoiceNotFound.code());
}
