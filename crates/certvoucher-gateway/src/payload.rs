//! Normalization of the external authority's situation payload.
//!
//! Observed shapes, all of which must yield the same [`IssuerSituation`]:
//!
//! ```text
//! {"issuedAt": "...", "ownerDocument": "...", ...}             plain object
//! "{\"issuedAt\": \"...\", ...}"                              string-encoded body
//! {"status": "ok", "data": "{\"dataEmissao\": \"...\"}"}      envelope, inner string
//! {"result": {"nomeTitular": "...", "cpfCnpj": "..."}}        envelope, inner object
//! ```
//!
//! Field names vary between camelCase, snake_case and the authority's
//! Portuguese names; documents may be punctuated or numeric.

use certvoucher_types::IssuerSituation;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::error::GatewayError;

const ENVELOPE_KEYS: &[&str] = &["data", "result", "situacao", "payload"];
const ISSUED_AT_KEYS: &[&str] = &["issuedAt", "issued_at", "dataEmissao", "data_emissao"];
const OWNER_NAME_KEYS: &[&str] = &["ownerName", "owner_name", "nomeTitular", "nome"];
const OWNER_DOCUMENT_KEYS: &[&str] = &[
    "ownerDocument",
    "owner_document",
    "cpfCnpj",
    "documento",
    "cpf",
    "cnpj",
];
/// Keys that only ever carry the verdict of the query itself.
const QUERY_STATUS_KEYS: &[&str] = &["queryStatus", "query_status", "situacaoConsulta"];
/// Also used by the authority for the voucher's own state ("EMITIDO", ...),
/// so it is a query verdict only when it reads as one.
const GENERIC_STATUS_KEY: &str = "status";
const ERROR_KEYS: &[&str] = &["error", "erro"];
const SUCCESS_WORDS: &[&str] = &["success", "ok", "sucesso", "200"];
const FAILURE_WORDS: &[&str] = &["error", "erro", "failure", "fail", "falha", "not_found"];

/// String decoding / envelope levels tolerated before giving up.
const MAX_DEPTH: usize = 4;

/// Turn a raw situation payload into the canonical [`IssuerSituation`].
///
/// A payload that parses but carries a non-success status is returned as a
/// failed situation, not as an error.
///
/// # Errors
/// `MalformedPayload` when the body is not an object at any level, is nested
/// beyond reason, or carries an unparseable issuance timestamp.
pub fn normalize_payload(raw: Value) -> Result<IssuerSituation, GatewayError> {
    let (fields, status) = flatten(raw)?;

    if let Some(reason) = failure_reason(status.as_ref(), &fields) {
        return Ok(IssuerSituation::failed(reason));
    }

    let issued_at = match first_present(&fields, ISSUED_AT_KEYS) {
        Some(value) => parse_issued_at(value)?,
        None => None,
    };
    let owner_name = first_present(&fields, OWNER_NAME_KEYS).and_then(scalar_text);
    let owner_document = first_present(&fields, OWNER_DOCUMENT_KEYS).and_then(scalar_text);

    Ok(IssuerSituation::observed(
        issued_at,
        owner_name.as_deref(),
        owner_document.as_deref(),
    ))
}

/// Peel string encodings and envelopes until the level carrying the
/// identity fields. The first status seen on the way down is kept.
fn flatten(mut value: Value) -> Result<(Map<String, Value>, Option<Value>), GatewayError> {
    let mut status: Option<Value> = None;

    for _ in 0..MAX_DEPTH {
        value = match value {
            Value::String(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok((Map::new(), status));
                }
                serde_json::from_str(text).map_err(|e| {
                    GatewayError::malformed(format!("string-encoded payload is not JSON: {e}"))
                })?
            }
            Value::Null => return Ok((Map::new(), status)),
            Value::Object(mut map) => {
                if status.is_none() {
                    status = query_status(&map);
                }
                if carries_identity(&map) {
                    return Ok((map, status));
                }
                match ENVELOPE_KEYS.iter().find_map(|k| map.remove(*k)) {
                    Some(inner @ (Value::Object(_) | Value::String(_))) => inner,
                    _ => return Ok((map, status)),
                }
            }
            other => {
                return Err(GatewayError::malformed(format!(
                    "expected an object, got {}",
                    kind(&other)
                )));
            }
        };
    }

    Err(GatewayError::malformed(format!(
        "payload nested deeper than {MAX_DEPTH} levels"
    )))
}

/// The query verdict at this level, if the object states one.
fn query_status(map: &Map<String, Value>) -> Option<Value> {
    QUERY_STATUS_KEYS
        .iter()
        .find_map(|k| map.get(*k).filter(|v| !v.is_null()))
        .or_else(|| map.get(GENERIC_STATUS_KEY).filter(|v| reads_as_verdict(v)))
        .cloned()
}

fn reads_as_verdict(value: &Value) -> bool {
    match value {
        Value::Bool(_) | Value::Number(_) => true,
        Value::String(s) => {
            let word = s.trim().to_lowercase();
            SUCCESS_WORDS.contains(&word.as_str()) || FAILURE_WORDS.contains(&word.as_str())
        }
        _ => false,
    }
}

fn carries_identity(map: &Map<String, Value>) -> bool {
    ISSUED_AT_KEYS
        .iter()
        .chain(OWNER_NAME_KEYS)
        .chain(OWNER_DOCUMENT_KEYS)
        .any(|k| map.contains_key(*k))
}

fn failure_reason(status: Option<&Value>, fields: &Map<String, Value>) -> Option<String> {
    match status {
        None => first_present(fields, ERROR_KEYS)
            .and_then(scalar_text)
            .map(|msg| format!("issuer error: {msg}")),
        Some(Value::Bool(true)) => None,
        Some(Value::Bool(false)) => Some("issuer reported failure".into()),
        Some(Value::Number(n)) if n.as_u64() == Some(200) => None,
        Some(Value::String(s)) if SUCCESS_WORDS.contains(&s.trim().to_lowercase().as_str()) => {
            None
        }
        Some(other) => Some(format!(
            "issuer query status {}",
            scalar_text(other).unwrap_or_else(|| other.to_string())
        )),
    }
}

fn first_present<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| {
        fields.get(*k).filter(|v| match v {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_issued_at(value: &Value) -> Result<Option<DateTime<Utc>>, GatewayError> {
    match value {
        Value::String(s) => parse_timestamp(s)
            .map(Some)
            .ok_or_else(|| GatewayError::malformed(format!("unparseable issuance date {s:?}"))),
        // Epoch seconds or milliseconds.
        Value::Number(n) => {
            let raw = n
                .as_i64()
                .ok_or_else(|| GatewayError::malformed(format!("issuance epoch {n} out of range")))?;
            let parsed = if raw.abs() < 100_000_000_000 {
                DateTime::from_timestamp(raw, 0)
            } else {
                DateTime::from_timestamp_millis(raw)
            };
            parsed
                .map(Some)
                .ok_or_else(|| GatewayError::malformed(format!("issuance epoch {raw} out of range")))
        }
        other => Err(GatewayError::malformed(format!(
            "issuance date is {}",
            kind(other)
        ))),
    }
}

/// RFC 3339, ISO date-times without offset (taken as UTC), or plain dates
/// in `YYYY-MM-DD` / `DD/MM/YYYY` (midnight UTC).
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%d/%m/%Y %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
        }
    }
    None
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
