use hmac::{Hmac, Mac};
use sha1::Sha1;
use thiserror::Error;

pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-taiga-webhook-signature";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("No signature")]
    Missing,
    #[error("Invalid signature")]
    Invalid,
}

impl SignatureError {
    /// Body of the 401 response.
    pub fn response_text(&self) -> &'static str {
        match self {
            Self::Missing => "No signature",
            Self::Invalid => "Invalid signature",
        }
    }
}

/// Checks a hex HMAC-SHA1 of the raw request body.
pub fn verify_webhook_signature(
    secret: &str,
    body: &[u8],
    signature_header: Option<&str>,
) -> Result<(), SignatureError> {
    let signature = signature_header
        .map(str::trim)
        .filter(|signature| !signature.is_empty())
        .ok_or(SignatureError::Missing)?;
    let signature_bytes = decode_hex(signature).ok_or(SignatureError::Invalid)?;
    let mut mac =
        Hmac::<Sha1>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Invalid)?;
    mac.update(body);
    mac.verify_slice(&signature_bytes)
        .map_err(|_| SignatureError::Invalid)
}

/// Hex HMAC-SHA1 of `body`, as the tracker computes it.
pub fn sign_webhook_body(secret: &str, body: &[u8]) -> String {
    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    mac.finalize()
        .into_bytes()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    let raw = raw.as_bytes();
    if raw.len() % 2 != 0 {
        return None;
    }
    raw.chunks(2)
        .map(|pair| {
            let chunk = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(chunk, 16).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{sign_webhook_body, verify_webhook_signature, SignatureError};

    #[test]
    fn unit_sign_matches_known_hmac_sha1_vector() {
        assert_eq!(
            sign_webhook_body("key", b"The quick brown fox jumps over the lazy dog"),
            "de7c9b85b8b78aa6bc8a7a36f70a90701c9db4d9"
        );
    }

    #[test]
    fn functional_verify_accepts_signed_body_in_any_hex_case() {
        let body = br#"{"action":"change"}"#;
        let signature = sign_webhook_body("secret", body);
        assert_eq!(
            verify_webhook_signature("secret", body, Some(&signature)),
            Ok(())
        );
        assert_eq!(
            verify_webhook_signature("secret", body, Some(&signature.to_uppercase())),
            Ok(())
        );
    }

    #[test]
    fn regression_verify_distinguishes_missing_and_invalid() {
        let body = b"{}";
        assert_eq!(
            verify_webhook_signature("secret", body, None),
            Err(SignatureError::Missing)
        );
        assert_eq!(
            verify_webhook_signature("secret", body, Some("  ")),
            Err(SignatureError::Missing)
        );
        assert_eq!(
            verify_webhook_signature("secret", body, Some("zz")),
            Err(SignatureError::Invalid)
        );
        let wrong_key = sign_webhook_body("other", body);
        assert_eq!(
            verify_webhook_signature("secret", body, Some(&wrong_key)),
            Err(SignatureError::Invalid)
        );
        assert_eq!(
            verify_webhook_signature("secret", b"{ }", Some(&sign_webhook_body("secret", body))),
            Err(SignatureError::Invalid)
        );
    }
}
