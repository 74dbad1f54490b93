//! HS256 token minting and verification built from base64 and HMAC-SHA256.
//!
//! The encoding is fixed down to the byte: a constant header, a payload with
//! the fields `role`, `iss`, `iat`, `exp` in that order, and an unpadded
//! base64url signature over `header.payload`.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::constants::{TOKEN_ISSUER, TOKEN_LIFETIME_SECS};

type HmacSha256 = Hmac<Sha256>;

/// Header segment shared by every token.
pub const HEADER_JSON: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Role of the public API key.
pub const ANON_ROLE: &str = "anon";
/// Role of the privileged API key.
pub const SERVICE_ROLE: &str = "service_role";

/// Token payload, serialized in field order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Postgres role the gateway switches to.
    pub role: String,
    /// Issuer.
    pub iss: String,
    /// Issued at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
}

impl TokenClaims {
    /// Claims for `role` issued at `issued_at` with the standard lifetime.
    pub fn new(role: &str, issued_at: i64) -> Self {
        Self {
            role: role.to_string(),
            iss: TOKEN_ISSUER.to_string(),
            iat: issued_at,
            exp: issued_at + TOKEN_LIFETIME_SECS,
        }
    }
}

/// Why a token failed verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Not three segments.
    #[error("token must have three dot-separated segments")]
    Malformed,
    /// A segment is not base64url.
    #[error("token segment is not valid base64url")]
    Encoding,
    /// The header is not exactly HS256/JWT.
    #[error("token header is not HS256/JWT")]
    UnsupportedHeader,
    /// The payload is not claims JSON.
    #[error("token payload is not valid claims JSON")]
    Payload,
    /// The signature does not match the key.
    #[error("token signature does not match")]
    BadSignature,
    /// `exp` is not in the future.
    #[error("token expired at {exp}")]
    Expired {
        /// The claim's expiry.
        exp: i64,
    },
}

fn mac_for(key: &str) -> HmacSha256 {
    <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .expect("HMAC accepts keys of any length")
}

fn sign(key: &str, signing_input: &str) -> Vec<u8> {
    let mut mac = mac_for(key);
    mac.update(signing_input.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Mint `header.payload.signature` for the claims.
pub fn mint(claims: &TokenClaims, key: &str) -> Result<String, serde_json::Error> {
    let header = URL_SAFE_NO_PAD.encode(HEADER_JSON);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{header}.{payload}");
    let signature = URL_SAFE_NO_PAD.encode(sign(key, &signing_input));
    Ok(format!("{signing_input}.{signature}"))
}

/// Check signature (constant time), header and expiry; return the claims.
pub fn verify(token: &str, key: &str, now: i64) -> Result<TokenClaims, TokenError> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(TokenError::Malformed);
    };

    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| TokenError::Encoding)?;
    let mut mac = mac_for(key);
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| TokenError::BadSignature)?;

    let header = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| TokenError::Encoding)?;
    if header != HEADER_JSON.as_bytes() {
        return Err(TokenError::UnsupportedHeader);
    }

    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| TokenError::Encoding)?;
    let claims: TokenClaims =
        serde_json::from_slice(&payload).map_err(|_| TokenError::Payload)?;
    if claims.exp <= now {
        return Err(TokenError::Expired { exp: claims.exp });
    }
    Ok(claims)
}

/// The two API keys minted for every run; they share `iat` and `exp`.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// Token with [`ANON_ROLE`].
    pub anon: String,
    /// Token with [`SERVICE_ROLE`].
    pub service_role: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair").finish_non_exhaustive()
    }
}

impl TokenPair {
    /// Mint both keys with `key`.
    pub fn mint(key: &str, issued_at: i64) -> Result<Self, serde_json::Error> {
        Ok(Self {
            anon: mint(&TokenClaims::new(ANON_ROLE, issued_at), key)?,
            service_role: mint(
                &TokenClaims::new(SERVICE_ROLE, issued_at),
                key,
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "your-super-secret-jwt-token-with-at-least-32-characters-long";
    const IAT: i64 = 1_700_000_000;

    #[test]
    fn header_segment_is_fixed() {
        let token = mint(&TokenClaims::new(ANON_ROLE, IAT), KEY).unwrap();
        assert!(token.starts_with("eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9."));
        assert!(!token.contains('='));
    }

    #[test]
    fn payload_field_order_is_stable() {
        let token = mint(&TokenClaims::new(SERVICE_ROLE, IAT), KEY).unwrap();
        let payload = token.split('.').nth(1).unwrap();
        let json = String::from_utf8(URL_SAFE_NO_PAD.decode(payload).unwrap())
            .unwrap();
        assert_eq!(
            json,
            r#"{"role":"service_role","iss":"supabase","iat":1700000000,"exp":1857680000}"#
        );
    }

    #[test]
    fn signature_recomputes_from_own_segments() {
        let token = mint(&TokenClaims::new(ANON_ROLE, IAT), KEY).unwrap();
        let (signing_input, signature) = token.rsplit_once('.').unwrap();
        let expected = URL_SAFE_NO_PAD.encode(sign(KEY, signing_input));
        assert_eq!(signature, expected);

        let claims = verify(&token, KEY, IAT + 1).unwrap();
        assert_eq!(claims.exp - claims.iat, 157_680_000);
        assert_eq!(claims.role, "anon");
    }

    #[test]
    fn verify_rejects_tampering_wrong_key_and_expiry() {
        let token = mint(&TokenClaims::new(ANON_ROLE, IAT), KEY).unwrap();

        assert_eq!(
            verify(&token, "another-key", IAT),
            Err(TokenError::BadSignature)
        );

        let forged_payload = URL_SAFE_NO_PAD.encode(
            r#"{"role":"service_role","iss":"supabase","iat":1700000000,"exp":1857680000}"#,
        );
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = &forged_payload;
        assert_eq!(
            verify(&parts.join("."), KEY, IAT),
            Err(TokenError::BadSignature)
        );

        assert_eq!(
            verify(&token, KEY, IAT + TOKEN_LIFETIME_SECS),
            Err(TokenError::Expired {
                exp: IAT + TOKEN_LIFETIME_SECS
            })
        );
        assert_eq!(verify("a.b", KEY, IAT), Err(TokenError::Malformed));
    }

    #[test]
    fn pair_shares_issue_and_expiry() {
        let pair = TokenPair::mint(KEY, IAT).unwrap();
        let anon = verify(&pair.anon, KEY, IAT).unwrap();
        let service = verify(&pair.service_role, KEY, IAT).unwrap();
        assert_eq!(anon.iat, service.iat);
        assert_eq!(anon.exp, service.exp);
        assert_eq!(service.role, "service_role");
        assert_ne!(pair.anon, pair.service_role);
    }
}
