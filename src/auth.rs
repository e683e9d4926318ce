//! Bearer-token generation and verification.
//!
//! Tokens are opaque strings of the form `payload.signature` where `payload`
//! is the base64url (unpadded) encoding of `{"user_id": ..., "iat": ...}` and
//! `signature` is the first 16 hex characters of
//! `HMAC-SHA256(secret, payload)`. The token carries user identity only; it
//! never embeds project scope.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use ring::{constant_time, hmac};
use serde::{Deserialize, Serialize};

/// Signature length in hex characters.
const SIGNATURE_LEN: usize = 16;

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    user_id: String,
    iat: i64,
}

fn sign(secret: &str, payload: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let tag = hmac::sign(&key, payload.as_bytes());
    let mut hex_tag = hex::encode(tag.as_ref());
    hex_tag.truncate(SIGNATURE_LEN);
    hex_tag
}

/// Create a signed bearer token for `user_id`.
pub fn generate_token(secret: &str, user_id: &str) -> String {
    let claims = TokenClaims {
        user_id: user_id.to_string(),
        iat: Utc::now().timestamp(),
    };
    // TokenClaims serialization cannot fail; fall back to an empty payload
    // rather than panicking in a request path.
    let raw = serde_json::to_string(&claims).unwrap_or_default();
    let encoded = URL_SAFE_NO_PAD.encode(raw.as_bytes());
    let sig = sign(secret, &encoded);
    format!("{encoded}.{sig}")
}

/// Return the user_id embedded in `token`, or `None` if invalid.
///
/// Verification order: split off the signature, re-sign the payload, compare
/// in constant time, and only then decode the payload.
pub fn decode_token(secret: &str, token: &str) -> Option<String> {
    let (encoded, sig) = token.split_once('.')?;
    let expected = sign(secret, encoded);
    constant_time::verify_slices_are_equal(expected.as_bytes(), sig.as_bytes()).ok()?;

    // Tolerate clients that pad the base64 payload.
    let trimmed = encoded.trim_end_matches('=');
    let raw = URL_SAFE_NO_PAD.decode(trimmed.as_bytes()).ok()?;
    let claims: TokenClaims = serde_json::from_slice(&raw).ok()?;
    if claims.user_id.is_empty() {
        return None;
    }
    Some(claims.user_id)
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;

    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_token_round_trip() {
        let token = generate_token(SECRET, "alice");
        assert_eq!(decode_token(SECRET, &token), Some("alice".to_string()));
    }

    #[test]
    fn test_token_shape() {
        let token = generate_token(SECRET, "alice");
        let (payload, sig) = token.split_once('.').expect("payload.signature");
        assert_eq!(sig.len(), SIGNATURE_LEN);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!payload.contains('='));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = generate_token(SECRET, "alice");
        assert_eq!(decode_token("other-secret", &token), None);
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let token = generate_token(SECRET, "alice");
        let (payload, sig) = token.split_once('.').expect("payload.signature");
        let forged = URL_SAFE_NO_PAD.encode(br#"{"user_id":"mallory","iat":0}"#);
        assert_eq!(decode_token(SECRET, &format!("{forged}.{sig}")), None);
        assert_eq!(decode_token(SECRET, payload), None); // no signature at all
    }

    #[test]
    fn test_signature_bit_flip_rejected() {
        let token = generate_token(SECRET, "alice");
        let (payload, sig) = token.split_once('.').expect("payload.signature");
        for i in 0..sig.len() {
            let mut flipped: Vec<char> = sig.chars().collect();
            flipped[i] = if flipped[i] == '0' { '1' } else { '0' };
            let bad: String = flipped.into_iter().collect();
            assert_eq!(decode_token(SECRET, &format!("{payload}.{bad}")), None);
        }
    }

    #[test]
    fn test_padded_payload_accepted() {
        let token = generate_token(SECRET, "alice");
        let (payload, _) = token.split_once('.').expect("payload.signature");
        let padded = format!("{}{}", payload, "=".repeat(payload.len() % 4));
        // Signature is over the unpadded payload, so re-sign the padded form.
        let sig = sign(SECRET, &padded);
        assert_eq!(
            decode_token(SECRET, &format!("{padded}.{sig}")),
            Some("alice".to_string())
        );
    }

    #[test]
    fn test_empty_user_id_rejected() {
        let token = generate_token(SECRET, "");
        assert_eq!(decode_token(SECRET, &token), None);
    }

    quickcheck! {
        fn prop_round_trip(user_id: String) -> bool {
            if user_id.is_empty() {
                return true;
            }
            let token = generate_token(SECRET, &user_id);
            decode_token(SECRET, &token) == Some(user_id)
        }
    }
}
