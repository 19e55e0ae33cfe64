//! AEAT 客户端
//!
//! [`AuthorityClient`] 是提交服务唯一依赖的出站接口，测试可注入内存实现。
//! [`AeatHttpClient`] 通过 reqwest 发送 SOAP 报文，按组织证书缓存 mTLS 客户端。

use super::xml::{self, AuthorityReply, QueryReply};
use super::{
    AuthorityResponse, ClientIdentity, IDEMPOTENCY_HEADER, QueryRequest, RegistrationStatus,
    SubmissionError, SubmissionRequest,
};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

/// Longest response excerpt kept in attempt logs
const BODY_EXCERPT_LEN: usize = 256;

#[async_trait]
pub trait AuthorityClient: Send + Sync {
    /// One attempt; retries are the caller's business
    async fn submit(&self, request: &SubmissionRequest) -> Result<AuthorityResponse, SubmissionError>;

    /// `ConsultaFactura`: does the authority already hold this record?
    async fn query(&self, request: &QueryRequest) -> Result<RegistrationStatus, SubmissionError>;
}

pub struct AeatHttpClient {
    endpoint: String,
    timeout: Duration,
    /// Client without TLS identity
    anonymous: Client,
    /// Keyed by certificate fingerprint
    identified: DashMap<String, Client>,
}

impl AeatHttpClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SubmissionError> {
        let anonymous = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SubmissionError::Transient {
                status: None,
                detail: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            endpoint: endpoint.into(),
            timeout,
            anonymous,
            identified: DashMap::new(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn client_for(&self, identity: Option<&ClientIdentity>) -> Result<Client, SubmissionError> {
        let Some(identity) = identity else {
            return Ok(self.anonymous.clone());
        };
        if let Some(client) = self.identified.get(&identity.fingerprint) {
            return Ok(client.clone());
        }

        let tls_identity = reqwest::Identity::from_pem(identity.pem.as_bytes()).map_err(|e| {
            SubmissionError::Transient {
                status: None,
                detail: format!("Failed to create identity: {e}"),
            }
        })?;
        let client = Client::builder()
            .identity(tls_identity)
            .timeout(self.timeout)
            .build()
            .map_err(|e| SubmissionError::Transient {
                status: None,
                detail: format!("Failed to build HTTP client: {e}"),
            })?;

        tracing::debug!(fingerprint = %identity.fingerprint, "mTLS client created");
        self.identified
            .insert(identity.fingerprint.clone(), client.clone());
        Ok(client)
    }

    /// POST one envelope; returns the HTTP status and body text
    async fn post(
        &self,
        identity: Option<&ClientIdentity>,
        dedup_key: Option<&str>,
        body: &str,
    ) -> Result<(u16, String), SubmissionError> {
        let client = self.client_for(identity)?;

        let mut builder = client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", "\"\"");
        if let Some(key) = dedup_key {
            builder = builder.header(IDEMPOTENCY_HEADER, key);
        }

        let response = builder
            .body(body.to_owned())
            .send()
            .await
            .map_err(|e| SubmissionError::Unreachable {
                timed_out: e.is_timeout(),
                detail: if e.is_timeout() {
                    format!("timed out after {}s", self.timeout.as_secs())
                } else {
                    format!("request failed: {e}")
                },
            })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| SubmissionError::Transient {
            status: Some(status),
            detail: format!("failed to read response: {e}"),
        })?;
        Ok((status, text))
    }
}

#[async_trait]
impl AuthorityClient for AeatHttpClient {
    async fn submit(&self, request: &SubmissionRequest) -> Result<AuthorityResponse, SubmissionError> {
        let (status, body) = self
            .post(request.identity.as_ref(), Some(&request.dedup_key), &request.body)
            .await?;
        classify(status, &body)
    }

    async fn query(&self, request: &QueryRequest) -> Result<RegistrationStatus, SubmissionError> {
        let (status, body) = self
            .post(request.identity.as_ref(), None, &request.body)
            .await?;
        classify_query(status, &body)
    }
}

/// Map an HTTP exchange onto the submission outcome
///
/// - 5xx, 408, 429 and unreadable 2xx bodies are transient
/// - other 4xx and `Incorrecto` replies are terminal rejections
/// - duplicate-record replies count as accepted
pub fn classify(status: u16, body: &str) -> Result<AuthorityResponse, SubmissionError> {
    let accepted = |csv, with_errors, duplicate| AuthorityResponse {
        csv,
        http_status: status,
        with_errors,
        duplicate,
    };

    if status >= 500 || status == 408 || status == 429 {
        return Err(SubmissionError::Transient {
            status: Some(status),
            detail: format!("HTTP {status}: {}", excerpt(body)),
        });
    }

    let reply = xml::parse_response(body);
    match (status, reply) {
        (_, Some(AuthorityReply::Duplicate { csv })) => {
            Ok(accepted(csv, false, true))
        }
        (200..=299, Some(AuthorityReply::Accepted { csv, with_errors })) => {
            Ok(accepted(csv, with_errors, false))
        }
        (200..=499, Some(AuthorityReply::Rejected { code, reason })) => {
            Err(SubmissionError::Rejected {
                status: Some(status),
                code,
                reason,
            })
        }
        (400..=499, _) => Err(SubmissionError::Rejected {
            status: Some(status),
            code: status.to_string(),
            reason: excerpt(body),
        }),
        (200..=299, _) => Err(SubmissionError::Transient {
            status: Some(status),
            detail: format!("unrecognized response: {}", excerpt(body)),
        }),
        _ => Err(SubmissionError::Transient {
            status: Some(status),
            detail: format!("unexpected HTTP {status}"),
        }),
    }
}

/// Map a `ConsultaFactura` exchange onto the registration status
///
/// Same transient rules as [`classify`]; faults and other 4xx are rejections.
pub fn classify_query(status: u16, body: &str) -> Result<RegistrationStatus, SubmissionError> {
    if status >= 500 || status == 408 || status == 429 {
        return Err(SubmissionError::Transient {
            status: Some(status),
            detail: format!("HTTP {status}: {}", excerpt(body)),
        });
    }

    match (status, xml::parse_query_response(body)) {
        (200..=299, Some(QueryReply::Status(registration))) => Ok(registration),
        (200..=499, Some(QueryReply::Fault { code, reason })) => Err(SubmissionError::Rejected {
            status: Some(status),
            code,
            reason,
        }),
        (400..=499, _) => Err(SubmissionError::Rejected {
            status: Some(status),
            code: status.to_string(),
            reason: excerpt(body),
        }),
        _ => Err(SubmissionError::Transient {
            status: Some(status),
            detail: format!("unrecognized query response: {}", excerpt(body)),
        }),
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCEPTED: &str =
        "<R><CSV>A-1</CSV><EstadoEnvio>Correcto</EstadoEnvio><EstadoRegistro>Correcto</EstadoRegistro></R>";
    const REJECTED: &str = "<R><EstadoRegistro>Incorrecto</EstadoRegistro><CodigoErrorRegistro>1104</CodigoErrorRegistro><DescripcionErrorRegistro>Valor del campo NumSerieFactura incorrecto</DescripcionErrorRegistro></R>";
    const DUPLICATE: &str = "<R><EstadoRegistro>Incorrecto</EstadoRegistro><CodigoErrorRegistro>3000</CodigoErrorRegistro></R>";

    #[test]
    fn test_classify_accepted() {
        let resp = classify(200, ACCEPTED).unwrap();
        assert_eq!(resp.csv.as_deref(), Some("A-1"));
        assert!(!resp.duplicate);
        assert_eq!(resp.http_status, 200);
    }

    #[test]
    fn test_classify_rejection_is_terminal() {
        let err = classify(200, REJECTED).unwrap_err();
        assert!(!err.is_transient());
        assert!(matches!(err, SubmissionError::Rejected { code, .. } if code == "1104"));

        let err = classify(403, "Forbidden").unwrap_err();
        assert!(matches!(err, SubmissionError::Rejected { code, .. } if code == "403"));
    }

    #[test]
    fn test_classify_duplicate_counts_as_accepted() {
        let resp = classify(200, DUPLICATE).unwrap();
        assert!(resp.duplicate);
    }

    #[test]
    fn test_classify_transient() {
        for (status, body) in [(500, ""), (503, ACCEPTED), (429, ""), (200, "<html/>")] {
            let err = classify(status, body).unwrap_err();
            assert!(err.is_transient(), "{status}");
            assert_eq!(err.http_status(), Some(status));
        }
    }

    #[test]
    fn test_classify_query() {
        let found = "<R><ResultadoConsulta>ConDatos</ResultadoConsulta><CSV>A-7</CSV><EstadoRegistro>Correcto</EstadoRegistro></R>";
        assert_eq!(
            classify_query(200, found).unwrap(),
            RegistrationStatus::Registered {
                csv: Some("A-7".into()),
                with_errors: false
            }
        );
        assert_eq!(
            classify_query(200, "<R><ResultadoConsulta>SinDatos</ResultadoConsulta></R>").unwrap(),
            RegistrationStatus::NotRegistered
        );

        assert!(classify_query(503, found).unwrap_err().is_transient());
        assert!(classify_query(200, "<html/>").unwrap_err().is_transient());
        assert!(!classify_query(401, "Unauthorized").unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_not_an_http_failure() {
        // nothing listens on port 9 locally
        let client = AeatHttpClient::new("http://127.0.0.1:9/aeat", Duration::from_secs(2)).unwrap();
        let err = client.post(None, None, "<x/>").await.unwrap_err();
        assert!(matches!(err, SubmissionError::Unreachable { timed_out: false, .. }));
        assert!(err.is_transient());
        assert_eq!(err.http_status(), None);
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let long = "ñ".repeat(BODY_EXCERPT_LEN + 10);
        let short = excerpt(&long);
        assert!(short.ends_with("..."));
        assert_eq!(short.chars().count(), BODY_EXCERPT_LEN + 3);
    }
}
