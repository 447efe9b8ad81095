//! Signed, self-contained record of a session's answers, produced when the
//! device cannot reach the server at submission time.
//!
//! Format: `EXP1.<base64url(json payload)>.<hex hmac-sha256>` keyed by the
//! device fingerprint. Equal inputs always produce the same token.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::answer::LocalAnswerRecord;
use crate::utils::crypto::{hmac_sha256_hex, verify_hmac_sha256_hex};

pub const TOKEN_PREFIX: &str = "EXP1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofPayload {
    pub session_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub answers: Vec<LocalAnswerRecord>,
}

pub fn issue(
    session_id: Uuid,
    device_fingerprint: &str,
    issued_at: DateTime<Utc>,
    answers: &[LocalAnswerRecord],
) -> Result<String> {
    let mut answers = answers.to_vec();
    answers.sort_by_key(|a| a.question_id);

    let payload = ProofPayload {
        session_id,
        issued_at,
        answers,
    };
    let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?);
    let signed = format!("{}.{}", TOKEN_PREFIX, body);
    let signature = hmac_sha256_hex(device_fingerprint.as_bytes(), signed.as_bytes())?;
    Ok(format!("{}.{}", signed, signature))
}

/// Verifies the signature against `device_fingerprint` and returns the payload.
pub fn decode(token: &str, device_fingerprint: &str) -> Result<ProofPayload> {
    let mut parts = token.trim().splitn(3, '.');
    let (Some(prefix), Some(body), Some(signature)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::BadRequest("Malformed proof token".to_string()));
    };
    if prefix != TOKEN_PREFIX {
        return Err(Error::BadRequest(format!(
            "Unsupported proof token version '{}'",
            prefix
        )));
    }

    let signed = format!("{}.{}", prefix, body);
    if !verify_hmac_sha256_hex(device_fingerprint.as_bytes(), signed.as_bytes(), signature) {
        return Err(Error::Forbidden("Proof token signature mismatch".to_string()));
    }

    let raw = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|e| Error::BadRequest(format!("Malformed proof token body: {}", e)))?;
    Ok(serde_json::from_slice(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::answer::AnswerValue;

    fn answers(at: DateTime<Utc>) -> Vec<LocalAnswerRecord> {
        vec![
            LocalAnswerRecord::new(3, AnswerValue::Text { response: "TCP".into() }, at),
            LocalAnswerRecord::new(1, AnswerValue::Choice { option_id: 2 }, at),
        ]
    }

    #[test]
    fn deterministic_for_equal_inputs() {
        let at = Utc::now();
        let session = Uuid::new_v4();
        let mut reversed = answers(at);
        reversed.reverse();

        let a = issue(session, "fp-1", at, &answers(at)).unwrap();
        let b = issue(session, "fp-1", at, &reversed).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("EXP1."));
    }

    #[test]
    fn decode_checks_device_binding() {
        let at = Utc::now();
        let session = Uuid::new_v4();
        let token = issue(session, "fp-1", at, &answers(at)).unwrap();

        let payload = decode(&token, "fp-1").unwrap();
        assert_eq!(payload.session_id, session);
        assert_eq!(
            payload.answers.iter().map(|a| a.question_id).collect::<Vec<_>>(),
            vec![1, 3]
        );

        assert!(matches!(decode(&token, "fp-2"), Err(Error::Forbidden(_))));
        assert!(matches!(decode("EXP2.abc.def", "fp-1"), Err(Error::BadRequest(_))));
        assert!(matches!(decode("garbage", "fp-1"), Err(Error::BadRequest(_))));
    }
}
