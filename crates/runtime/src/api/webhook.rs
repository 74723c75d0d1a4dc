//! Webhook signature verification.
//!
//! The provider signs the raw request body with HMAC-SHA256 and sends the
//! hex digest in a header. Comparison is constant-time. Unverified requests
//! are rejected before any side effect.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::types::DispatchError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC digest. Provider-specific; confirm against
/// provider docs before enabling in production.
pub const SIGNATURE_HEADER: &str = "x-mail-signature";

/// Verify `signature_hex` against `HMAC-SHA256(secret, body)`.
pub fn verify_signature(
    secret: &[u8],
    signature_hex: &str,
    body: &[u8],
) -> Result<(), DispatchError> {
    let provided = hex::decode(signature_hex.trim())
        .map_err(|e| DispatchError::SignatureFailed(format!("invalid hex signature: {e}")))?;

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| DispatchError::SignatureFailed(format!("HMAC init failed: {e}")))?;
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    if computed.as_slice().ct_eq(&provided).unwrap_u8() != 1 {
        return Err(DispatchError::SignatureFailed(
            "signature mismatch".to_string(),
        ));
    }
    Ok(())
}

/// Compute the hex signature for a body (test and client-side helper).
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_signature_verifies() {
        let secret = b"webhook-secret";
        let body = br#"{"type":"message.created"}"#;
        let signature = sign(secret, body);
        assert!(verify_signature(secret, &signature, body).is_ok());
    }

    #[test]
    fn mismatched_signature_fails() {
        let secret = b"webhook-secret";
        let body = br#"{"type":"message.created"}"#;
        let other = sign(secret, b"different body");
        let err = verify_signature(secret, &other, body).unwrap_err();
        assert!(matches!(err, DispatchError::SignatureFailed(_)));
    }

    #[test]
    fn non_hex_signature_fails_cleanly() {
        let err = verify_signature(b"s", "not-hex!", b"body").unwrap_err();
        assert!(matches!(err, DispatchError::SignatureFailed(_)));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let signature = sign(b"secret-a", body);
        assert!(verify_signature(b"secret-b", &signature, body).is_err());
    }
}
