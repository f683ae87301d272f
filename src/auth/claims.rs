//! Bearer token payload decoding
//!
//! Access tokens are JWTs (`header.payload.signature`). Only the payload is
//! read, to learn who the session belongs to and when it expires. The
//! signature is NOT verified: the backend verifies every token it receives,
//! and these claims are used for display and expiry checks only. Never treat
//! a decoded claim as proof of anything.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Fields read from an access token payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// `sub` claim
    pub subject: String,

    /// `is_admin` claim (false when absent)
    pub is_admin: bool,

    /// `exp` claim, epoch seconds
    pub expires_at: i64,
}

impl Claims {
    /// Whether the token is still unexpired at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.saturating_mul(1000) > now.timestamp_millis()
    }

    /// Time left until expiry; negative once expired. Saturates at the
    /// `Duration` bounds for absurd `exp` values.
    pub fn time_to_expiry(&self, now: DateTime<Utc>) -> chrono::Duration {
        let millis = self
            .expires_at
            .saturating_mul(1000)
            .saturating_sub(now.timestamp_millis());
        chrono::Duration::try_milliseconds(millis).unwrap_or(if millis < 0 {
            chrono::Duration::MIN
        } else {
            chrono::Duration::MAX
        })
    }

    pub fn expires_at_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expires_at, 0)
    }
}

/// Decode base64url, with or without padding
fn base64_decode_url(input: &str) -> Option<Vec<u8>> {
    use base64::{Engine as _, engine::general_purpose};

    // Base64url uses - instead of + and _ instead of /
    let standard_b64 = input.trim_end_matches('=').replace('-', "+").replace('_', "/");

    let padding = match standard_b64.len() % 4 {
        0 => "",
        2 => "==",
        3 => "=",
        _ => return None,
    };

    let padded = format!("{}{}", standard_b64, padding);

    general_purpose::STANDARD.decode(&padded).ok()
}

/// Decode the claims of an access token.
///
/// Returns `None` for anything malformed: wrong segment count, bad base64,
/// a payload that is not a JSON object, or missing `sub`/`exp`.
pub fn decode(token: &str) -> Option<Claims> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 || parts[1].is_empty() {
        return None;
    }

    let payload_bytes = base64_decode_url(parts[1])?;
    let payload: Value = serde_json::from_slice(&payload_bytes).ok()?;
    let payload = payload.as_object()?;

    let subject = match payload.get("sub")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    let expires_at = match payload.get("exp")? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64))?,
        _ => return None,
    };

    let is_admin = payload
        .get("is_admin")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Some(Claims {
        subject,
        is_admin,
        expires_at,
    })
}

/// Token builders for tests across the crate
#[cfg(test)]
pub(crate) mod testing {
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
    use chrono::Utc;
    use serde_json::json;

    /// Build an unsigned JWT around an arbitrary payload
    pub(crate) fn token_with_payload(payload: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{}.{}.signature", header, body)
    }

    /// Build a token for `sub` expiring `expires_in_secs` from now
    pub(crate) fn token(sub: &str, is_admin: bool, expires_in_secs: i64) -> String {
        token_with_payload(&json!({
            "sub": sub,
            "is_admin": is_admin,
            "exp": Utc::now().timestamp() + expires_in_secs,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{token, token_with_payload};
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_valid_token() {
        let exp = Utc::now().timestamp() + 600;
        let jwt = token_with_payload(&json!({"sub": "user-1", "is_admin": true, "exp": exp}));

        let claims = decode(&jwt).unwrap();
        assert_eq!(claims.subject, "user-1");
        assert!(claims.is_admin);
        assert_eq!(claims.expires_at, exp);
        assert!(claims.is_valid_at(Utc::now()));
    }

    #[test]
    fn test_missing_admin_flag_defaults_false() {
        let jwt = token_with_payload(&json!({"sub": "u", "exp": 4_000_000_000i64}));
        assert!(!decode(&jwt).unwrap().is_admin);
    }

    #[test]
    fn test_numeric_subject() {
        let jwt = token_with_payload(&json!({"sub": 123456789, "exp": 4_000_000_000i64}));
        assert_eq!(decode(&jwt).unwrap().subject, "123456789");
    }

    #[test]
    fn test_padded_payload_accepted() {
        use base64::{Engine as _, engine::general_purpose::URL_SAFE};
        let payload = URL_SAFE.encode(r#"{"sub":"p","exp":4000000000}"#);
        let jwt = format!("h.{}.s", payload);
        assert_eq!(decode(&jwt).unwrap().subject, "p");
    }

    #[test]
    fn test_malformed_inputs_return_none() {
        assert!(decode("").is_none());
        assert!(decode("onesegment").is_none());
        assert!(decode("two.segments").is_none());
        assert!(decode("a.b.c.d").is_none());
        assert!(decode("header.!!!not-base64!!!.sig").is_none());
        assert!(decode("header.a.sig").is_none());
        // Valid base64, not JSON
        assert!(decode("header.bm90IGpzb24.sig").is_none());
        // JSON but not an object
        assert!(decode(&token_with_payload(&json!([1, 2, 3]))).is_none());
        // Missing exp
        assert!(decode(&token_with_payload(&json!({"sub": "u"}))).is_none());
        // Wrong exp type
        assert!(decode(&token_with_payload(&json!({"sub": "u", "exp": "soon"}))).is_none());
    }

    #[test]
    fn test_expiry_checks() {
        let now = Utc::now();
        let expired = decode(&token("u", false, -60)).unwrap();
        assert!(!expired.is_valid_at(now));
        assert!(expired.time_to_expiry(now) <= chrono::Duration::zero());

        let fresh = decode(&token("u", false, 600)).unwrap();
        assert!(fresh.is_valid_at(now));
        let left = fresh.time_to_expiry(now);
        assert!(left > chrono::Duration::minutes(9) && left <= chrono::Duration::minutes(10));
        assert_eq!(fresh.expires_at_time().unwrap().timestamp(), fresh.expires_at);
    }

    #[test]
    fn test_extreme_exp_saturates() {
        let now = Utc::now();

        let huge_negative = decode(&token_with_payload(&json!({"sub": "u", "exp": -1e300}))).unwrap();
        assert_eq!(huge_negative.expires_at, i64::MIN);
        assert!(!huge_negative.is_valid_at(now));
        assert_eq!(huge_negative.time_to_expiry(now), chrono::Duration::MIN);

        let min = decode(&token_with_payload(&json!({"sub": "u", "exp": i64::MIN}))).unwrap();
        assert_eq!(min.time_to_expiry(now), chrono::Duration::MIN);

        let max = decode(&token_with_payload(&json!({"sub": "u", "exp": i64::MAX}))).unwrap();
        assert!(max.is_valid_at(now));
        assert!(max.time_to_expiry(now) > chrono::Duration::days(365));
        assert!(max.expires_at_time().is_none());
    }
}
