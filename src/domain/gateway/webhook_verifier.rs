//! Gateway webhook signature verification.
//!
//! Header format: `t=<unix seconds>,v1=<hex HMAC-SHA256>`, where the MAC is
//! computed over `"<t>.<raw body>"` with the shared signing secret. The
//! timestamp must fall inside the tolerance window to block replays.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::domain::foundation::Timestamp;

use super::event::GatewayEvent;
use super::webhook_errors::WebhookError;

/// Default maximum age for a signed delivery.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Maximum allowed clock skew for future timestamps.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Parsed components of the signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    /// Parses `t=<timestamp>,v1=<signature>[,v1=<signature>...]`.
    ///
    /// Several `v1` entries are allowed so the secret can be rotated.
    /// Unknown keys are ignored.
    pub fn parse(header: &str) -> Result<Self, WebhookError> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or_else(|| WebhookError::MalformedSignature("invalid header format".to_string()))?;

            match key {
                "t" => {
                    timestamp = Some(value.parse().map_err(|_| {
                        WebhookError::MalformedSignature("invalid timestamp".to_string())
                    })?);
                }
                "v1" => {
                    v1_signatures.push(hex::decode(value).map_err(|_| {
                        WebhookError::MalformedSignature("invalid v1 signature hex".to_string())
                    })?);
                }
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| WebhookError::MalformedSignature("missing timestamp".to_string()))?;
        if v1_signatures.is_empty() {
            return Err(WebhookError::MalformedSignature("missing v1 signature".to_string()));
        }

        Ok(SignatureHeader {
            timestamp,
            v1_signatures,
        })
    }
}

/// Verifies gateway signatures with a shared secret.
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance_secs(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Verifies the signature and parses the envelope.
    ///
    /// Verification happens before any JSON parsing so unsigned input is
    /// never interpreted.
    pub fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: Timestamp,
    ) -> Result<GatewayEvent, WebhookError> {
        self.verify(payload, signature_header, now)?;

        serde_json::from_slice(payload).map_err(|e| WebhookError::ParseError(e.to_string()))
    }

    /// Verifies the signature only.
    pub fn verify(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: Timestamp,
    ) -> Result<(), WebhookError> {
        let header = SignatureHeader::parse(signature_header)?;

        self.validate_timestamp(header.timestamp, now)?;

        let expected = self.compute_signature(header.timestamp, payload)?;

        if header
            .v1_signatures
            .iter()
            .any(|candidate| constant_time_compare(&expected, candidate))
        {
            Ok(())
        } else {
            Err(WebhookError::InvalidSignature)
        }
    }

    /// Produces a header value for `payload` signed at `timestamp`.
    ///
    /// Used by gateway simulators and tests.
    pub fn sign(&self, timestamp: i64, payload: &[u8]) -> Result<String, WebhookError> {
        let signature = self.compute_signature(timestamp, payload)?;
        Ok(format!("t={},v1={}", timestamp, hex::encode(signature)))
    }

    fn validate_timestamp(&self, timestamp: i64, now: Timestamp) -> Result<(), WebhookError> {
        // `t` is attacker-controlled and not yet authenticated
        let age = now
            .as_unix_secs()
            .checked_sub(timestamp)
            .ok_or(WebhookError::TimestampOutOfRange)?;

        if age > self.tolerance_secs {
            return Err(WebhookError::TimestampOutOfRange);
        }

        if age < -MAX_CLOCK_SKEW_SECS {
            return Err(WebhookError::InvalidTimestamp);
        }

        Ok(())
    }

    fn compute_signature(&self, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, WebhookError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| WebhookError::InvalidSignature)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "whsec_test_secret_12345";

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(SecretString::new(TEST_SECRET.to_string()))
    }

    fn now() -> Timestamp {
        Timestamp::from_unix_secs(1_705_312_800).unwrap()
    }

    fn payload() -> String {
        r#"{"eventId":"evt_1","type":"payment.failed","subscriptionId":"sub_1","userId":"u1","invoiceRef":"in_1","amount":500,"currency":"USD","occurredAt":"2024-01-15T10:00:00Z"}"#
            .to_string()
    }

    // ══════════════════════════════════════════════════════════════
    // Header parsing
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn parse_header_with_v1() {
        let header = SignatureHeader::parse(&format!("t=1234567890,v1={}", "a".repeat(64))).unwrap();
        assert_eq!(header.timestamp, 1234567890);
        assert_eq!(header.v1_signatures.len(), 1);
        assert_eq!(header.v1_signatures[0].len(), 32);
    }

    #[test]
    fn parse_header_accepts_multiple_v1_and_unknown_keys() {
        let header = SignatureHeader::parse(&format!(
            "t=1,v1={},v1={},scheme=hmac",
            "a".repeat(64),
            "b".repeat(64)
        ))
        .unwrap();
        assert_eq!(header.v1_signatures.len(), 2);
    }

    #[test]
    fn parse_header_missing_parts_fails() {
        assert!(matches!(
            SignatureHeader::parse("t=1234567890"),
            Err(WebhookError::MalformedSignature(_))
        ));
        assert!(matches!(
            SignatureHeader::parse(&format!("v1={}", "a".repeat(64))),
            Err(WebhookError::MalformedSignature(_))
        ));
        assert!(matches!(
            SignatureHeader::parse("garbage"),
            Err(WebhookError::MalformedSignature(_))
        ));
    }

    #[test]
    fn parse_header_rejects_non_hex_signature() {
        assert!(matches!(
            SignatureHeader::parse("t=1,v1=zzzz"),
            Err(WebhookError::MalformedSignature(_))
        ));
    }

    #[test]
    fn malformed_header_is_unauthorized_not_bad_request() {
        let err = verifier()
            .verify(payload().as_bytes(), "t=1705312800,v1=zz", now())
            .unwrap_err();
        assert_eq!(err.status_code(), http::StatusCode::UNAUTHORIZED);
    }

    // ══════════════════════════════════════════════════════════════
    // Verification
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn valid_signature_parses_event() {
        let v = verifier();
        let body = payload();
        let header = v.sign(now().as_unix_secs(), body.as_bytes()).unwrap();

        let event = v.verify_and_parse(body.as_bytes(), &header, now()).unwrap();
        assert_eq!(event.event_id, "evt_1");
        assert_eq!(event.event_type, "payment.failed");
    }

    #[test]
    fn tampered_body_is_rejected() {
        let v = verifier();
        let body = payload();
        let header = v.sign(now().as_unix_secs(), body.as_bytes()).unwrap();
        let tampered = body.replace("500", "5");

        assert!(matches!(
            v.verify_and_parse(tampered.as_bytes(), &header, now()),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let other = WebhookVerifier::new(SecretString::new("whsec_other".to_string()));
        let body = payload();
        let header = other.sign(now().as_unix_secs(), body.as_bytes()).unwrap();

        assert!(matches!(
            verifier().verify(body.as_bytes(), &header, now()),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn rotated_secret_matches_any_v1() {
        let v = verifier();
        let body = payload();
        let ts = now().as_unix_secs();
        let good = v.sign(ts, body.as_bytes()).unwrap();
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1={},v1={}", ts, "0".repeat(64), good_sig);

        assert!(v.verify(body.as_bytes(), &header, now()).is_ok());
    }

    #[test]
    fn old_timestamp_is_rejected() {
        let v = verifier();
        let body = payload();
        let header = v.sign(now().as_unix_secs() - 301, body.as_bytes()).unwrap();

        assert!(matches!(
            v.verify(body.as_bytes(), &header, now()),
            Err(WebhookError::TimestampOutOfRange)
        ));
    }

    #[test]
    fn extreme_timestamps_are_rejected_without_overflow() {
        let v = verifier();
        for t in [i64::MIN, i64::MAX] {
            let header = format!("t={},v1={}", t, "0".repeat(64));
            assert!(matches!(
                v.verify(b"{}", &header, now()),
                Err(WebhookError::TimestampOutOfRange) | Err(WebhookError::InvalidTimestamp)
            ));
        }
        assert!(matches!(
            v.verify(b"{}", &format!("t={},v1=00", i64::MIN), now()),
            Err(WebhookError::TimestampOutOfRange)
        ));
    }

    #[test]
    fn tolerance_is_configurable() {
        let v = verifier().with_tolerance_secs(600);
        let body = payload();
        let header = v.sign(now().as_unix_secs() - 500, body.as_bytes()).unwrap();

        assert!(v.verify(body.as_bytes(), &header, now()).is_ok());
    }

    #[test]
    fn future_timestamp_beyond_skew_is_rejected() {
        let v = verifier();
        let body = payload();
        let header = v.sign(now().as_unix_secs() + 120, body.as_bytes()).unwrap();

        assert!(matches!(
            v.verify(body.as_bytes(), &header, now()),
            Err(WebhookError::InvalidTimestamp)
        ));
    }

    #[test]
    fn signed_garbage_is_parse_error() {
        let v = verifier();
        let body = b"not json";
        let header = v.sign(now().as_unix_secs(), body).unwrap();

        assert!(matches!(
            v.verify_and_parse(body, &header, now()),
            Err(WebhookError::ParseError(_))
        ));
    }
}
