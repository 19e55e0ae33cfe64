//! AEAT SOAP 报文
//!
//! - [`build_registro_alta`]: `RegFactuSistemaFacturacion / RegistroAlta`
//! - [`build_consulta_factura`]: `ConsultaFactura` (按 IDFactura 查询登记状态)
//! - [`sign_envelope`]: XMLDSig 封装签名 (SignedInfo + X509Data)
//! - [`parse_response`] / [`parse_query_response`]: `EstadoEnvio` / `EstadoRegistro` / 错误码提取

use super::RegistrationStatus;
use crate::chain::canonical::CanonicalFields;
use crate::core::config::SoftwareInfo;
use crate::error::{VerifactuError, VerifactuResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use piano_cert::{SignatureAlgorithm, SigningCertificate};
use sha2::{Digest, Sha256};
use shared::models::InvoiceRecord;
use std::fmt::Write as _;

const NS_SOAP: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const NS_SIST: &str = "https://www2.agenciatributaria.gob.es/static_files/common/internet/dep/aplicaciones/es/aeat/tike/cont/ws/SistemaFacturacion.xsd";
const NS_DS: &str = "http://www.w3.org/2000/09/xmldsig#";
const ALG_C14N: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
const ALG_ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const ALG_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// Signed element of a submission
pub const REGISTRO_ALTA: &str = "RegistroAlta";
/// Signed element of a status query
pub const CONSULTA_FACTURA: &str = "ConsultaFactura";

/// AEAT error code for an already registered invoice
pub const DUPLICATE_RECORD_CODE: &str = "3000";

/// Outcome decoded from a 2xx authority response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityReply {
    /// Correcto / AceptadoConErrores
    Accepted {
        csv: Option<String>,
        with_errors: bool,
    },
    /// Already registered by a previous (timed out) attempt
    Duplicate { csv: Option<String> },
    /// Incorrecto or SOAP fault
    Rejected { code: String, reason: String },
}

/// SOAP envelope registering one chained record
pub fn build_registro_alta(
    record: &InvoiceRecord,
    software: &SoftwareInfo,
) -> VerifactuResult<String> {
    let fields = CanonicalFields::from_record(record)?;
    let mut xml = String::with_capacity(4096);

    // write! into a String cannot fail
    let _ = write!(
        xml,
        r#"<?xml version="1.0" encoding="UTF-8"?><soapenv:Envelope xmlns:soapenv="{NS_SOAP}" xmlns:sist="{NS_SIST}"><soapenv:Header/><soapenv:Body><sist:RegFactuSistemaFacturacion><sist:Cabecera><sist:ObligadoEmision><sist:NombreRazon>{issuer_name}</sist:NombreRazon><sist:NIF>{nif}</sist:NIF></sist:ObligadoEmision></sist:Cabecera><sist:RegistroFactura><sist:RegistroAlta><sist:IDVersion>1.0</sist:IDVersion><sist:IDFactura><sist:IDEmisorFactura>{nif}</sist:IDEmisorFactura><sist:NumSerieFactura>{number}</sist:NumSerieFactura><sist:FechaExpedicionFactura>{date}</sist:FechaExpedicionFactura></sist:IDFactura><sist:NombreRazonEmisor>{issuer_name}</sist:NombreRazonEmisor><sist:TipoFactura>{kind}</sist:TipoFactura><sist:DescripcionOperacion>{description}</sist:DescripcionOperacion>"#,
        issuer_name = escape(&record.issuer_name),
        nif = escape(&fields.issuer_tax_id),
        number = escape(&fields.invoice_number),
        date = fields.issue_date_es(),
        kind = fields.invoice_type.as_str(),
        description = escape(record.description.as_deref().unwrap_or("Prestación de servicios")),
    );

    if let Some(recipient_nif) = record.recipient_tax_id.as_deref().filter(|s| !s.is_empty()) {
        let _ = write!(
            xml,
            "<sist:Destinatarios><sist:IDDestinatario><sist:NombreRazon>{}</sist:NombreRazon><sist:NIF>{}</sist:NIF></sist:IDDestinatario></sist:Destinatarios>",
            escape(record.recipient_name.as_deref().unwrap_or_default()),
            escape(recipient_nif),
        );
    }

    let _ = write!(
        xml,
        "<sist:CuotaTotal>{}</sist:CuotaTotal><sist:ImporteTotal>{}</sist:ImporteTotal><sist:Encadenamiento>",
        fields.tax_amount_str(),
        fields.total_amount_str(),
    );
    match record.previous_hash.as_deref() {
        None => xml.push_str("<sist:PrimerRegistro>S</sist:PrimerRegistro>"),
        Some(previous) => {
            let _ = write!(
                xml,
                "<sist:RegistroAnterior><sist:Huella>{}</sist:Huella></sist:RegistroAnterior>",
                escape(previous)
            );
        }
    }

    let _ = write!(
        xml,
        "</sist:Encadenamiento><sist:SistemaInformatico><sist:NombreRazon>{}</sist:NombreRazon><sist:NIF>{}</sist:NIF><sist:NombreSistemaInformatico>{}</sist:NombreSistemaInformatico><sist:IdSistemaInformatico>{}</sist:IdSistemaInformatico><sist:Version>{}</sist:Version><sist:NumeroInstalacion>{}</sist:NumeroInstalacion></sist:SistemaInformatico><sist:FechaHoraHusoGenRegistro>{}</sist:FechaHoraHusoGenRegistro><sist:TipoHuella>01</sist:TipoHuella><sist:Huella>{}</sist:Huella>",
        escape(&software.vendor_name),
        escape(&software.vendor_nif),
        escape(&software.name),
        escape(&software.id),
        escape(&software.version),
        escape(&software.installation_number),
        escape(&fields.generated_at),
        escape(&record.current_hash),
    );

    xml.push_str("</sist:RegistroAlta></sist:RegistroFactura></sist:RegFactuSistemaFacturacion></soapenv:Body></soapenv:Envelope>");
    Ok(xml)
}

/// `ConsultaFactura` envelope looking up one record by its IDFactura
pub fn build_consulta_factura(record: &InvoiceRecord) -> VerifactuResult<String> {
    let fields = CanonicalFields::from_record(record)?;
    Ok(format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><soapenv:Envelope xmlns:soapenv="{NS_SOAP}" xmlns:sist="{NS_SIST}"><soapenv:Header/><soapenv:Body><sist:ConsultaFactura><sist:Cabecera><sist:ObligadoEmision><sist:NombreRazon>{issuer_name}</sist:NombreRazon><sist:NIF>{nif}</sist:NIF></sist:ObligadoEmision></sist:Cabecera><sist:IDFactura><sist:IDEmisorFactura>{nif}</sist:IDEmisorFactura><sist:NumSerieFactura>{number}</sist:NumSerieFactura><sist:FechaExpedicionFactura>{date}</sist:FechaExpedicionFactura></sist:IDFactura></sist:ConsultaFactura></soapenv:Body></soapenv:Envelope>"#,
        issuer_name = escape(&record.issuer_name),
        nif = escape(&fields.issuer_tax_id),
        number = escape(&fields.invoice_number),
        date = fields.issue_date_es(),
    ))
}

/// Enveloped XMLDSig signature over the `sist:{element}` element
///
/// `DigestValue` is the SHA-256 of the element as serialized before signing,
/// `SignatureValue` covers the `SignedInfo` element. The signature is appended
/// as the last child of the element, with the leaf certificate in `X509Data`
/// (`KeyName` with the fingerprint when the certificate cannot export it).
pub async fn sign_envelope(
    xml: &str,
    element: &str,
    cert: &dyn SigningCertificate,
) -> VerifactuResult<String> {
    let open = format!("<sist:{element}>");
    let close = format!("</sist:{element}>");
    let (start, end) = match (xml.find(&open), xml.rfind(&close)) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => {
            return Err(VerifactuError::Signing(format!(
                "element sist:{element} not found in envelope"
            )));
        }
    };

    let digest = BASE64.encode(Sha256::digest(&xml.as_bytes()[start..end + close.len()]));
    let signed_info = signed_info(&digest, cert.algorithm());
    let signature = crate::signing::sign_bytes(signed_info.as_bytes(), cert).await?;

    let key_info = match cert.certificate_der() {
        Some(der) => format!(
            "<ds:X509Data><ds:X509Certificate>{}</ds:X509Certificate></ds:X509Data>",
            BASE64.encode(der)
        ),
        None => format!("<ds:KeyName>{}</ds:KeyName>", escape(cert.fingerprint())),
    };

    let mut signed = String::with_capacity(xml.len() + signed_info.len() + 2048);
    signed.push_str(&xml[..end]);
    let _ = write!(
        signed,
        r#"<ds:Signature xmlns:ds="{NS_DS}">{signed_info}<ds:SignatureValue>{}</ds:SignatureValue><ds:KeyInfo>{key_info}</ds:KeyInfo></ds:Signature>"#,
        BASE64.encode(signature),
    );
    signed.push_str(&xml[end..]);
    Ok(signed)
}

/// `SignedInfo` referencing the enclosing document through the enveloped transform
pub fn signed_info(digest_b64: &str, algorithm: SignatureAlgorithm) -> String {
    format!(
        r#"<ds:SignedInfo xmlns:ds="{NS_DS}"><ds:CanonicalizationMethod Algorithm="{ALG_C14N}"/><ds:SignatureMethod Algorithm="{}"/><ds:Reference URI=""><ds:Transforms><ds:Transform Algorithm="{ALG_ENVELOPED}"/></ds:Transforms><ds:DigestMethod Algorithm="{ALG_SHA256}"/><ds:DigestValue>{digest_b64}</ds:DigestValue></ds:Reference></ds:SignedInfo>"#,
        algorithm.xmldsig_uri()
    )
}

fn parse_fault(body: &str) -> Option<(String, String)> {
    let reason = find_tag(body, "faultstring")?;
    let code = find_tag(body, "faultcode").unwrap_or_else(|| "SOAP_FAULT".into());
    Some((code, reason))
}

/// Decode an authority response; `None` when the body is not recognizable
pub fn parse_response(body: &str) -> Option<AuthorityReply> {
    let csv = find_tag(body, "CSV");
    let error_code = find_tag(body, "CodigoErrorRegistro");
    let error_text = find_tag(body, "DescripcionErrorRegistro");

    if error_code.as_deref() == Some(DUPLICATE_RECORD_CODE) {
        return Some(AuthorityReply::Duplicate { csv });
    }

    if let Some((code, reason)) = parse_fault(body) {
        return Some(AuthorityReply::Rejected { code, reason });
    }

    let state = find_tag(body, "EstadoRegistro").or_else(|| find_tag(body, "EstadoEnvio"))?;
    match state.as_str() {
        "Correcto" => Some(AuthorityReply::Accepted {
            csv,
            with_errors: false,
        }),
        "AceptadoConErrores" | "ParcialmenteCorrecto" => Some(AuthorityReply::Accepted {
            csv,
            with_errors: true,
        }),
        "Incorrecto" => Some(AuthorityReply::Rejected {
            code: error_code.unwrap_or_else(|| "UNKNOWN".into()),
            reason: error_text.unwrap_or_else(|| "Incorrecto".into()),
        }),
        _ => None,
    }
}

/// Outcome decoded from a `ConsultaFactura` response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryReply {
    Status(RegistrationStatus),
    Fault { code: String, reason: String },
}

/// Decode a status query response; `None` when the body is not recognizable
///
/// `ResultadoConsulta` (`ConDatos` / `SinDatos`) wins; otherwise the
/// `EstadoRegistro` of the returned line decides.
pub fn parse_query_response(body: &str) -> Option<QueryReply> {
    if let Some((code, reason)) = parse_fault(body) {
        return Some(QueryReply::Fault { code, reason });
    }

    let csv = find_tag(body, "CSV");
    let state = find_tag(body, "EstadoRegistro");
    let with_errors = state.as_deref() == Some("AceptadoConErrores");
    let registered = RegistrationStatus::Registered { csv, with_errors };

    let status = match find_tag(body, "ResultadoConsulta").as_deref() {
        Some("SinDatos") => RegistrationStatus::NotRegistered,
        Some("ConDatos") => registered,
        _ => match state.as_deref()? {
            "Correcto" | "AceptadoConErrores" => registered,
            "Incorrecto"
                if find_tag(body, "CodigoErrorRegistro").as_deref()
                    == Some(DUPLICATE_RECORD_CODE) =>
            {
                registered
            }
            "Incorrecto" => RegistrationStatus::NotRegistered,
            _ => return None,
        },
    };
    Some(QueryReply::Status(status))
}

/// Text content of the first element whose local name is `name`
fn find_tag(xml: &str, name: &str) -> Option<String> {
    let mut rest = xml;
    while let Some(start) = rest.find('<') {
        rest = &rest[start + 1..];
        let end = rest.find('>')?;
        let tag = &rest[..end];
        if tag.starts_with('/') || tag.starts_with('?') || tag.starts_with('!') || tag.ends_with('/') {
            continue;
        }
        let qname = tag.split_whitespace().next().unwrap_or_default();
        let local = qname.rsplit(':').next().unwrap_or(qname);
        if local == name {
            let content = &rest[end + 1..];
            let close = content.find('<').unwrap_or(content.len());
            return Some(unescape(content[..close].trim()));
        }
    }
    None
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
