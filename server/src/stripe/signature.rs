//! Webhook signature verification
//!
//! The `stripe-signature` header looks like `t=1700000000,v1=<hex>,v1=<hex>`.
//! Each `v1` is HMAC-SHA256 over `"<t>.<raw body>"` keyed with the endpoint
//! secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Default tolerance between the signed timestamp and now
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Missing signature header")]
    MissingHeader,
    #[error("Malformed signature header")]
    MalformedHeader,
    #[error("Signature timestamp outside tolerance")]
    TimestampOutOfTolerance,
    #[error("No signature matched the payload")]
    Mismatch,
}

/// Hex HMAC for `payload` signed at `timestamp`
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Check `header` against `payload`. `now` is unix seconds.
pub fn verify_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::MissingHeader)?;

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| SignatureError::MalformedHeader)?,
                );
            }
            Some(("v1", value)) => signatures.push(value),
            // other schemes (v0) are ignored
            Some(_) => {}
            None => return Err(SignatureError::MalformedHeader),
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }

    let tolerance = u64::try_from(tolerance_secs).unwrap_or(0);
    if now.abs_diff(timestamp) > tolerance {
        return Err(SignatureError::TimestampOutOfTolerance);
    }

    let expected = compute_signature(secret, timestamp, payload);
    let matched = signatures
        .iter()
        .any(|sig| bool::from(expected.as_bytes().ct_eq(sig.as_bytes())));

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;

    #[test]
    fn accepts_valid_signature() {
        let sig = compute_signature(SECRET, 1_700_000_000, BODY);
        let header = format!("t=1700000000,v1={sig}");
        assert_eq!(
            verify_signature(BODY, Some(&header), SECRET, 1_700_000_010, DEFAULT_TOLERANCE_SECS),
            Ok(())
        );
    }

    #[test]
    fn accepts_any_matching_v1_among_several() {
        let sig = compute_signature(SECRET, 1_700_000_000, BODY);
        let header = format!("t=1700000000,v0=legacy,v1=deadbeef,v1={sig}");
        assert!(verify_signature(BODY, Some(&header), SECRET, 1_700_000_000, 300).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let sig = compute_signature(SECRET, 1_700_000_000, BODY);
        let header = format!("t=1700000000,v1={sig}");
        assert_eq!(
            verify_signature(b"{}", Some(&header), SECRET, 1_700_000_000, 300),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_wrong_secret() {
        let sig = compute_signature("whsec_other", 1_700_000_000, BODY);
        let header = format!("t=1700000000,v1={sig}");
        assert_eq!(
            verify_signature(BODY, Some(&header), SECRET, 1_700_000_000, 300),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_old_timestamp() {
        let sig = compute_signature(SECRET, 1_700_000_000, BODY);
        let header = format!("t=1700000000,v1={sig}");
        assert_eq!(
            verify_signature(BODY, Some(&header), SECRET, 1_700_001_000, 300),
            Err(SignatureError::TimestampOutOfTolerance)
        );
    }

    #[test]
    fn rejects_missing_and_malformed_headers() {
        assert_eq!(
            verify_signature(BODY, None, SECRET, 0, 300),
            Err(SignatureError::MissingHeader)
        );
        assert_eq!(
            verify_signature(BODY, Some("garbage"), SECRET, 0, 300),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            verify_signature(BODY, Some("t=abc,v1=00"), SECRET, 0, 300),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            verify_signature(BODY, Some("t=0"), SECRET, 0, 300),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            verify_signature(
                BODY,
                Some("t=-9223372036854775808,v1=00"),
                SECRET,
                1_700_000_000,
                300
            ),
            Err(SignatureError::TimestampOutOfTolerance)
        );
    }
}
