use hmac::{Hmac, Mac};
use sha1::Sha1;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing or malformed signature header")]
    Malformed,
    #[error("unsupported signature scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("signature mismatch")]
    Mismatch,
}

/// Validates a GitHub `X-Hub-Signature` header (`sha1=<hex>`) against the
/// raw request body. Runs before any payload parsing; the comparison is
/// constant-time.
pub fn validate_signature(header: &str, body: &[u8], secret: &str) -> Result<(), SignatureError> {
    let Some((scheme, hex_digest)) = header.split_once('=') else {
        return Err(SignatureError::Malformed);
    };
    if scheme != "sha1" {
        return Err(SignatureError::UnsupportedScheme(scheme.to_owned()));
    }

    let expected = hex::decode(hex_digest).map_err(|_| SignatureError::Malformed)?;
    let mut mac =
        Hmac::<Sha1>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(body: &[u8], secret: &str) -> String {
        let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_is_accepted() {
        let body = br#"{"action":"labeled"}"#;
        let header = sign(body, "shared-secret");
        assert_eq!(validate_signature(&header, body, "shared-secret"), Ok(()));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let header = sign(br#"{"action":"labeled"}"#, "shared-secret");
        assert_eq!(
            validate_signature(&header, br#"{"action":"closed"}"#, "shared-secret"),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let body = b"payload";
        let header = sign(body, "secret-a");
        assert_eq!(
            validate_signature(&header, body, "secret-b"),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn sha256_scheme_is_not_accepted_here() {
        assert_eq!(
            validate_signature("sha256=abcdef", b"payload", "secret"),
            Err(SignatureError::UnsupportedScheme("sha256".to_owned()))
        );
    }

    #[test]
    fn headers_without_a_scheme_are_malformed() {
        assert_eq!(
            validate_signature("deadbeef", b"payload", "secret"),
            Err(SignatureError::Malformed)
        );
    }
}
