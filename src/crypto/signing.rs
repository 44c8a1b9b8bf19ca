use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Optional scheme prefix some senders put in front of the hex digest
const SCHEME_PREFIX: &str = "sha256=";

/// Sign a webhook body: lowercase hex HMAC-SHA256 over `"{timestamp}.{body}"`
pub fn sign_payload(body: &[u8], timestamp: &str, secret: &str) -> String {
    hex::encode(compute_mac(body, timestamp, secret))
}

fn compute_mac(body: &[u8], timestamp: &str, secret: &str) -> Vec<u8> {
    // HMAC accepts keys of any length, including empty ones
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return Vec::new(),
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

/// Verify an inbound webhook signature.
///
/// Fails closed: a missing header or an undecodable signature is a rejection.
/// When `enabled` is false every delivery is accepted. An empty secret is not
/// special-cased; the HMAC is still computed and compared.
pub fn verify_signature(
    body: &[u8],
    signature: Option<&str>,
    timestamp: Option<&str>,
    secret: &str,
    enabled: bool,
) -> bool {
    if !enabled {
        return true;
    }

    let (signature, timestamp) = match (signature, timestamp) {
        (Some(s), Some(t)) if !s.trim().is_empty() && !t.trim().is_empty() => (s.trim(), t.trim()),
        _ => return false,
    };

    let digest = strip_scheme(signature);
    let provided = match hex::decode(digest) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let expected = compute_mac(body, timestamp, secret);
    constant_time_eq(&expected, &provided)
}

fn strip_scheme(signature: &str) -> &str {
    match signature.get(..SCHEME_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(SCHEME_PREFIX) => {
            &signature[SCHEME_PREFIX.len()..]
        }
        _ => signature,
    }
}

/// Check that a unix timestamp header is within `max_age_secs` of `now`
pub fn is_timestamp_fresh(timestamp: &str, now: i64, max_age_secs: i64) -> bool {
    match timestamp.trim().parse::<i64>() {
        Ok(ts) => u64::try_from(max_age_secs).map_or(false, |max| now.abs_diff(ts) <= max),
        Err(_) => false,
    }
}

/// Compare two byte strings without short-circuiting on the first difference
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() || a.is_empty() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Generate a random webhook secret
pub fn generate_webhook_secret() -> String {
    let random_bytes: [u8; 32] = rand::random();
    hex::encode(random_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"metadata":{"event_type":"orders.notification","event_id":"evt_1"}}"#;
    const SECRET: &str = "test_secret_123";

    #[test]
    fn test_valid_signature_verifies() {
        let signature = sign_payload(BODY, "1700000000", SECRET);
        assert!(verify_signature(
            BODY,
            Some(&signature),
            Some("1700000000"),
            SECRET,
            true
        ));
    }

    #[test]
    fn test_scheme_prefix_and_case_are_accepted() {
        let signature = sign_payload(BODY, "1700000000", SECRET);
        let prefixed = format!("sha256={}", signature.to_uppercase());
        assert!(verify_signature(
            BODY,
            Some(&prefixed),
            Some("1700000000"),
            SECRET,
            true
        ));
    }

    #[test]
    fn test_wrong_secret_or_timestamp_fails() {
        let signature = sign_payload(BODY, "1700000000", SECRET);

        assert!(!verify_signature(
            BODY,
            Some(&signature),
            Some("1700000000"),
            "wrong_secret",
            true
        ));
        assert!(!verify_signature(
            BODY,
            Some(&signature),
            Some("1700000001"),
            SECRET,
            true
        ));
    }

    #[test]
    fn test_tampered_body_fails() {
        let signature = sign_payload(BODY, "1700000000", SECRET);
        let tampered = br#"{"metadata":{"event_type":"orders.cancel","event_id":"evt_1"}}"#;
        assert!(!verify_signature(
            tampered,
            Some(&signature),
            Some("1700000000"),
            SECRET,
            true
        ));
    }

    #[test]
    fn test_missing_headers_fail_closed() {
        let signature = sign_payload(BODY, "1700000000", SECRET);
        assert!(!verify_signature(BODY, None, Some("1700000000"), SECRET, true));
        assert!(!verify_signature(BODY, Some(&signature), None, SECRET, true));
        assert!(!verify_signature(BODY, Some(""), Some("1700000000"), SECRET, true));
        assert!(!verify_signature(BODY, Some("not-hex"), Some("1700000000"), SECRET, true));
    }

    #[test]
    fn test_disabled_verification_accepts_everything() {
        assert!(verify_signature(BODY, None, None, SECRET, false));
    }

    #[test]
    fn test_empty_secret_is_still_checked() {
        let signature = sign_payload(BODY, "1700000000", "");
        assert!(verify_signature(BODY, Some(&signature), Some("1700000000"), "", true));
        assert!(!verify_signature(
            BODY,
            Some(&"0".repeat(64)),
            Some("1700000000"),
            "",
            true
        ));
    }

    #[test]
    fn test_timestamp_freshness() {
        assert!(is_timestamp_fresh("1000", 1100, 300));
        assert!(is_timestamp_fresh("1400", 1100, 300));
        assert!(!is_timestamp_fresh("500", 1100, 300));
        assert!(!is_timestamp_fresh("soon", 1100, 300));
    }

    #[test]
    fn test_extreme_timestamps_are_stale() {
        let now = 1_700_000_000;
        assert!(!is_timestamp_fresh(&i64::MIN.to_string(), now, 300));
        assert!(!is_timestamp_fresh(&i64::MAX.to_string(), now, 300));
        assert!(!is_timestamp_fresh("-9223372036854775808", i64::MAX, 300));
        assert!(!is_timestamp_fresh("1700000000", now, -1));
    }

    #[test]
    fn test_webhook_secret_generation() {
        let a = generate_webhook_secret();
        let b = generate_webhook_secret();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }
}
