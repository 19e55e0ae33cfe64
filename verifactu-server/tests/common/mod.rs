//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use piano_cert::dev::{SigningProfile, issue_self_signed};
use shared::models::{InvoiceDraft, InvoiceType};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use verifactu_server::core::Config;
use verifactu_server::db::DbService;
use verifactu_server::submission::retry::RetryPolicy;
use verifactu_server::submission::{
    AuthorityClient, AuthorityResponse, QueryRequest, RegistrationStatus, SubmissionError,
    SubmissionRequest,
};
use verifactu_server::ServerState;

pub const ISSUER_TAX_ID: &str = "B12345678";

pub struct TestEnv {
    /// Keeps the work directory alive
    pub dir: TempDir,
    pub state: ServerState,
}

/// Unsigned records, no auto-submit, immediate retries
pub async fn setup(client: Arc<dyn AuthorityClient>) -> TestEnv {
    setup_with(client, |_| {}).await
}

pub async fn setup_with(
    client: Arc<dyn AuthorityClient>,
    configure: impl FnOnce(&mut Config),
) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::with_work_dir(dir.path().to_string_lossy().to_string());
    config.signing_required = false;
    config.auto_submit = false;
    configure(&mut config);
    config.ensure_work_dir_structure().unwrap();

    let db = DbService::new(&config.database_path().to_string_lossy())
        .await
        .unwrap();
    let mut state = ServerState::build(config, db.pool, client).unwrap();
    state.submissions = state
        .submissions
        .clone()
        .with_policy(RetryPolicy::immediate(3));
    TestEnv { dir, state }
}

pub fn draft(org_id: &str, number: &str, total: &str) -> InvoiceDraft {
    InvoiceDraft {
        org_id: org_id.to_string(),
        issuer_tax_id: ISSUER_TAX_ID.to_string(),
        issuer_name: "Pianos Ejemplo SL".to_string(),
        series: "A-".to_string(),
        number: number.to_string(),
        issue_date: "2024-03-01".to_string(),
        invoice_type: InvoiceType::F1,
        tax_amount: "21.00".to_string(),
        total_amount: total.to_string(),
        recipient_tax_id: Some("12345678Z".to_string()),
        recipient_name: Some("Cliente Ejemplo".to_string()),
        description: Some("Afinación piano de cola".to_string()),
    }
}

/// Write a self-signed certificate where the store looks for `org_id`
pub fn install_cert(state: &ServerState, org_id: &str, expired: bool) -> String {
    let mut profile = SigningProfile::new(ISSUER_TAX_ID, "Pianos Ejemplo SL");
    if expired {
        profile = profile.expired();
    }
    let pair = issue_self_signed(&profile).unwrap();
    pair.write_to_dir(&state.config.certs_dir().join(org_id))
        .unwrap();
    state.certs.invalidate(org_id);
    pair.cert_pem
}

/// In-memory authority with scripted replies
///
/// Once the script runs out every call is accepted. Accepted records are
/// remembered and reported as registered by status queries.
pub struct MockAuthority {
    replies: Mutex<VecDeque<Result<AuthorityResponse, SubmissionError>>>,
    calls: AtomicUsize,
    queries: AtomicUsize,
    keys: Mutex<Vec<String>>,
    bodies: Mutex<Vec<String>>,
    registered: Mutex<HashMap<i64, String>>,
    delay: Duration,
}

impl MockAuthority {
    pub fn accepting() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn scripted(replies: Vec<Result<AuthorityResponse, SubmissionError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
            keys: Mutex::new(Vec::new()),
            bodies: Mutex::new(Vec::new()),
            registered: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Envelopes received, submissions and queries alike
    pub fn bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }

    /// The authority holds the record although the caller never saw a reply
    pub fn mark_registered(&self, invoice_id: i64, csv: &str) {
        self.registered
            .lock()
            .unwrap()
            .insert(invoice_id, csv.to_string());
    }
}

#[async_trait]
impl AuthorityClient for MockAuthority {
    async fn submit(
        &self,
        request: &SubmissionRequest,
    ) -> Result<AuthorityResponse, SubmissionError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.keys.lock().unwrap().push(request.dedup_key.clone());
        self.bodies.lock().unwrap().push(request.body.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.replies.lock().unwrap().pop_front();
        let reply = scripted.unwrap_or_else(|| Ok(accepted(&format!("CSV{n:04}"))));
        if let Ok(resp) = &reply {
            let csv = resp.csv.clone().unwrap_or_default();
            self.mark_registered(request.invoice_id, &csv);
        }
        reply
    }

    async fn query(&self, request: &QueryRequest) -> Result<RegistrationStatus, SubmissionError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.bodies.lock().unwrap().push(request.body.clone());
        let csv = self.registered.lock().unwrap().get(&request.invoice_id).cloned();
        Ok(match csv {
            Some(csv) => RegistrationStatus::Registered {
                csv: Some(csv),
                with_errors: false,
            },
            None => RegistrationStatus::NotRegistered,
        })
    }
}

pub fn accepted(csv: &str) -> AuthorityResponse {
    AuthorityResponse {
        csv: Some(csv.to_string()),
        http_status: 200,
        with_errors: false,
        duplicate: false,
    }
}

pub fn transient(status: u16) -> SubmissionError {
    SubmissionError::Transient {
        status: Some(status),
        detail: format!("HTTP {status}"),
    }
}

pub fn rejected(code: &str, reason: &str) -> SubmissionError {
    SubmissionError::Rejected {
        status: Some(200),
        code: code.to_string(),
        reason: reason.to_string(),
    }
}
