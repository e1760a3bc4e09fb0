//! Bearer-token claim decoding.
//!
//! Tokens are JWT-shaped (`header.payload.signature`). Only the payload is
//! read; the signature is the issuing backend's business. Anything that
//! doesn't decode is a `DecodeError`, which callers treat as "no session".

use std::collections::BTreeMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Claim names accepted as the subject, in priority order.
const SUBJECT_CLAIMS: [&str; 4] = ["sub", "id", "userId", "user_id"];

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Token is empty")]
    Empty,

    #[error("Token has no payload segment")]
    MissingPayload,

    #[error("Payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Payload has no exp claim")]
    MissingExpiry,

    #[error("Payload exp claim is not a number")]
    InvalidExpiry,
}

/// Decoded fields of a credential.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Claims {
    pub subject: String,
    pub roles: Vec<String>,
    /// Seconds since the Unix epoch
    pub expiry: i64,
    /// Every other claim, untouched
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: BTreeMap<String, Value>,
}

impl Claims {
    /// The expiry instant itself already counts as expired.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expiry.saturating_mul(1000) <= now_ms
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.expiry, 0).single()
    }

    /// Seconds left before expiry, floored at zero.
    pub fn seconds_until_expiry(&self, now_ms: i64) -> i64 {
        (self.expiry.saturating_mul(1000) - now_ms).max(0) / 1000
    }
}

/// An opaque token together with what it claims.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub token: String,
    pub claims: Claims,
}

impl Credential {
    pub fn parse(token: &str) -> Result<Self, DecodeError> {
        let claims = decode(token)?;
        Ok(Self {
            token: token.trim().to_string(),
            claims,
        })
    }
}

/// Decode the payload of a bearer token. No signature check, no network.
pub fn decode(token: &str) -> Result<Claims, DecodeError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(DecodeError::Empty);
    }

    let payload = token
        .split('.')
        .nth(1)
        .filter(|p| !p.is_empty())
        .ok_or(DecodeError::MissingPayload)?;

    // Tolerate padding and the standard alphabet, the way browser decoders do.
    let normalized: String = payload
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();
    let bytes = URL_SAFE_NO_PAD.decode(normalized)?;

    let value: Value = serde_json::from_slice(&bytes)?;
    let Value::Object(mut map) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let expiry = match map.remove("exp") {
        None | Some(Value::Null) => return Err(DecodeError::MissingExpiry),
        Some(v) => parse_expiry(&v).ok_or(DecodeError::InvalidExpiry)?,
    };

    let subject = take_subject(&mut map);
    let roles = match map.remove("roles") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|r| r.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(single)) => vec![single],
        _ => Vec::new(),
    };

    Ok(Claims {
        subject,
        roles,
        expiry,
        extra: map.into_iter().collect(),
    })
}

fn parse_expiry(value: &Value) -> Option<i64> {
    if let Some(secs) = value.as_i64() {
        return Some(secs);
    }
    value
        .as_f64()
        .filter(|f| f.is_finite())
        .map(|f| f.trunc() as i64)
}

fn take_subject(map: &mut Map<String, Value>) -> String {
    let Some(name) = SUBJECT_CLAIMS.iter().find(|k| map.contains_key(**k)) else {
        return String::new();
    };
    match map.remove(*name) {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Build an unsigned token around a JSON payload. Test helper for every
/// module that needs a credential.
#[cfg(test)]
pub(crate) fn token_for(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.signature", header, body)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_basic() {
        let token = token_for(&json!({
            "sub": "42",
            "roles": ["USER"],
            "exp": 1_900_000_000,
            "email": "a@b.c"
        }));
        let claims = decode(&token).unwrap();
        assert_eq!(claims.subject, "42");
        assert_eq!(claims.roles, vec!["USER"]);
        assert_eq!(claims.expiry, 1_900_000_000);
        assert_eq!(claims.extra.get("email"), Some(&json!("a@b.c")));
        assert!(claims.has_role("USER"));
        assert!(!claims.has_role("ADMIN"));
    }

    #[test]
    fn test_decode_subject_aliases() {
        let token = token_for(&json!({"id": 7, "exp": 10}));
        assert_eq!(decode(&token).unwrap().subject, "7");

        let token = token_for(&json!({"userId": "u-1", "exp": 10}));
        assert_eq!(decode(&token).unwrap().subject, "u-1");

        let token = token_for(&json!({"exp": 10}));
        assert_eq!(decode(&token).unwrap().subject, "");
    }

    #[test]
    fn test_decode_float_expiry_and_missing_roles() {
        let token = token_for(&json!({"sub": "x", "exp": 1700000000.75}));
        let claims = decode(&token).unwrap();
        assert_eq!(claims.expiry, 1_700_000_000);
        assert!(claims.roles.is_empty());
    }

    #[test]
    fn test_decode_padded_payload() {
        let body = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":50}"#);
        assert!(body.ends_with('='));
        let token = format!("h.{}.s", body);
        assert_eq!(decode(&token).unwrap().expiry, 50);
    }

    #[test]
    fn test_decode_payload_only_needs_second_segment() {
        let body = URL_SAFE_NO_PAD.encode(r#"{"exp":5}"#);
        assert!(decode(&format!("h.{}", body)).is_ok());
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode(""), Err(DecodeError::Empty)));
        assert!(matches!(decode("   "), Err(DecodeError::Empty)));
        assert!(matches!(decode("onlyonesegment"), Err(DecodeError::MissingPayload)));
        assert!(matches!(decode("a..c"), Err(DecodeError::MissingPayload)));
        assert!(matches!(decode("a.!!!.c"), Err(DecodeError::Base64(_))));

        let not_json = URL_SAFE_NO_PAD.encode("hello");
        assert!(matches!(decode(&format!("a.{}.c", not_json)), Err(DecodeError::Json(_))));

        let array = URL_SAFE_NO_PAD.encode("[1,2]");
        assert!(matches!(decode(&format!("a.{}.c", array)), Err(DecodeError::NotAnObject)));

        assert!(matches!(
            decode(&token_for(&json!({"sub": "x"}))),
            Err(DecodeError::MissingExpiry)
        ));
        assert!(matches!(
            decode(&token_for(&json!({"sub": "x", "exp": "tomorrow"}))),
            Err(DecodeError::InvalidExpiry)
        ));
    }

    #[test]
    fn test_expiry_boundary() {
        let claims = decode(&token_for(&json!({"exp": 100}))).unwrap();
        assert!(!claims.is_expired_at(99_999));
        assert!(claims.is_expired_at(100_000));
        assert!(claims.is_expired_at(100_001));
        assert_eq!(claims.seconds_until_expiry(90_000), 10);
        assert_eq!(claims.seconds_until_expiry(200_000), 0);
    }

    #[test]
    fn test_expires_at() {
        let claims = decode(&token_for(&json!({"exp": 1_700_000_000}))).unwrap();
        assert_eq!(
            claims.expires_at().unwrap().to_rfc3339(),
            "2023-11-14T22:13:20+00:00"
        );

        let claims = decode(&token_for(&json!({"exp": i64::MAX}))).unwrap();
        assert_eq!(claims.expires_at(), None);
    }

    #[test]
    fn test_credential_parse_trims() {
        let token = token_for(&json!({"exp": 100}));
        let credential = Credential::parse(&format!(" {} ", token)).unwrap();
        assert_eq!(credential.token, token);
    }
}
