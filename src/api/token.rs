//! Opaque signed tokens for the admin API
//!
//! Format: `base64url(JSON payload) + "." + hex(SHA-256(payload || secret))`.
//! The payload carries `sub`, `iat`, `exp` (24h) and a random `nonce`.
//! Verification checks the signature first, then expiry.

use base64::Engine;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::sig::ct_eq;

/// Token lifetime: 24 hours.
const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Token payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub nonce: String,
}

fn signature(payload: &[u8], secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Mint a token for `sub`.
pub fn mint(sub: &str, secret: &str) -> String {
    let now = Utc::now().timestamp();
    let mut nonce = [0u8; 8];
    rand::thread_rng().fill(&mut nonce);

    let claims = Claims {
        sub: sub.to_string(),
        iat: now,
        exp: now + TOKEN_TTL_SECS,
        nonce: hex::encode(nonce),
    };
    let payload = serde_json::to_vec(&claims).expect("claims always serialize");

    format!(
        "{}.{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&payload),
        signature(&payload, secret)
    )
}

/// Verify a token: signature, then expiry. Returns the claims on success.
pub fn verify(token: &str, secret: &str) -> Option<Claims> {
    let (encoded, sig) = token.split_once('.')?;
    let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(encoded)
        .ok()?;

    if !ct_eq(signature(&payload, secret).as_bytes(), sig.as_bytes()) {
        return None;
    }

    let claims: Claims = serde_json::from_slice(&payload).ok()?;
    if claims.exp < Utc::now().timestamp() {
        return None;
    }
    Some(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_verify_round_trip() {
        let token = mint("admin", "secret");
        let claims = verify(&token, "secret").unwrap();
        assert_eq!(claims.sub, "admin");
        assert!(claims.exp > claims.iat);
        assert_eq!(claims.nonce.len(), 16);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = mint("admin", "secret");
        assert!(verify(&token, "other").is_none());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let token = mint("admin", "secret");
        let (payload, sig) = token.split_once('.').unwrap();
        // Re-encode a different subject under the original signature
        let forged_claims = Claims {
            sub: "root".into(),
            iat: 0,
            exp: i64::MAX,
            nonce: "00".into(),
        };
        let forged_payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&forged_claims).unwrap());
        assert_ne!(forged_payload, payload);
        assert!(verify(&format!("{}.{}", forged_payload, sig), "secret").is_none());
    }

    #[test]
    fn test_expired_token_rejected() {
        // Build an already-expired payload signed with the real secret
        let claims = Claims {
            sub: "admin".into(),
            iat: 0,
            exp: 1,
            nonce: "00".into(),
        };
        let payload = serde_json::to_vec(&claims).unwrap();
        let token = format!(
            "{}.{}",
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&payload),
            signature(&payload, "secret")
        );
        assert!(verify(&token, "secret").is_none());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(verify("", "secret").is_none());
        assert!(verify("no-dot-here", "secret").is_none());
        assert!(verify("!!!.###", "secret").is_none());
    }
}
