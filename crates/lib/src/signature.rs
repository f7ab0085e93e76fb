//! HMAC-SHA256 webhook signature verification.
//!
//! The platform signs each POST body with the app secret and sends
//! `X-Hub-Signature-256: sha256=<hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

const SCHEME_PREFIX: &str = "sha256=";

/// Why a POST failed authentication. Both map to 403.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("no signature provided")]
    MissingSignature,
    #[error("invalid signature")]
    InvalidSignature,
}

/// Verifies inbound bodies against the shared app secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC can take key of any size")
    }

    /// Hex-encoded HMAC-SHA256 of `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// True when `signature` (hex, no scheme prefix) matches the body. Comparison is constant-time.
    /// Hex digits are accepted in either case and surrounding whitespace is ignored; the
    /// decoded bytes must match exactly.
    pub fn verify(&self, body: &[u8], signature: &str) -> bool {
        let Ok(provided) = hex::decode(signature.trim()) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(body);
        mac.verify_slice(&provided).is_ok()
    }

    /// Check the raw header value (if any) against the body.
    pub fn authenticate(&self, header: Option<&str>, body: &[u8]) -> Result<(), AuthFailure> {
        let header = match header {
            Some(h) if !h.is_empty() => h,
            _ => {
                log::warn!("webhook: no signature header found");
                return Err(AuthFailure::MissingSignature);
            }
        };
        if self.verify(body, strip_scheme(header)) {
            Ok(())
        } else {
            log::warn!("webhook: signature verification failed");
            Err(AuthFailure::InvalidSignature)
        }
    }
}

/// Remove the `sha256=` prefix when present; otherwise the value is used as-is.
fn strip_scheme(header: &str) -> &str {
    header.strip_prefix(SCHEME_PREFIX).unwrap_or(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_secret_12345";

    #[test]
    fn sign_and_verify() {
        let v = SignatureVerifier::new(SECRET);
        let body = br#"{"object":"whatsapp_business_account"}"#;
        let sig = v.sign(body);
        assert_eq!(sig.len(), 64);
        assert!(v.verify(body, &sig));
        assert!(!SignatureVerifier::new("wrong_secret").verify(body, &sig));
        assert!(!v.verify(b"wrong payload", &sig));
    }

    #[test]
    fn single_bit_flips_fail() {
        let v = SignatureVerifier::new(SECRET);
        let body = b"hello world".to_vec();
        let sig = v.sign(&body);
        for i in 0..body.len() {
            let mut mutated = body.clone();
            mutated[i] ^= 0x01;
            assert!(!v.verify(&mutated, &sig), "body byte {} flipped", i);
        }
        let mut raw = hex::decode(&sig).unwrap();
        for i in 0..raw.len() {
            raw[i] ^= 0x80;
            assert!(!v.verify(&body, &hex::encode(&raw)));
            raw[i] ^= 0x80;
        }
    }

    #[test]
    fn header_prefix_is_stripped() {
        let v = SignatureVerifier::new(SECRET);
        let body = b"payload";
        let header = format!("sha256={}", v.sign(body));
        assert_eq!(v.authenticate(Some(&header), body), Ok(()));
        let bare = v.sign(body);
        assert_eq!(v.authenticate(Some(&bare), body), Ok(()));
    }

    #[test]
    fn hex_case_and_padding_are_tolerated() {
        let v = SignatureVerifier::new(SECRET);
        let body = b"payload";
        let upper = v.sign(body).to_uppercase();
        assert!(v.verify(body, &upper));
        assert!(v.verify(body, &format!(" {}\n", v.sign(body))));
        assert!(!v.verify(body, &v.sign(body)[..62]));
    }

    #[test]
    fn missing_and_short_headers() {
        let v = SignatureVerifier::new(SECRET);
        assert_eq!(v.authenticate(None, b"x"), Err(AuthFailure::MissingSignature));
        assert_eq!(v.authenticate(Some(""), b"x"), Err(AuthFailure::MissingSignature));
        assert_eq!(v.authenticate(Some("sha"), b"x"), Err(AuthFailure::InvalidSignature));
        assert_eq!(v.authenticate(Some("sha256="), b"x"), Err(AuthFailure::InvalidSignature));
        assert_eq!(v.authenticate(Some("sha256=zz"), b"x"), Err(AuthFailure::InvalidSignature));
    }
}
