//! HMAC-SHA256 request signing (spec §4.1, C1).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac_for(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any size")
}

/// Sign `payload` with `secret`, returning `sha256=<lowercase hex>`.
///
/// The canonical signed bytes must be the exact bytes later persisted on
/// the `Message` row and sent as the request body — `Ingest` serializes
/// once and reuses the same buffer for both.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = mac_for(secret);
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Recompute the signature over `payload` with `secret` and compare it to
/// `signature` in constant time (via `hmac::Mac::verify_slice`).
pub fn verify(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(hex_part) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected_bytes) = hex::decode(hex_part) else {
        return false;
    };
    let mut mac = mac_for(secret);
    mac.update(payload);
    mac.verify_slice(&expected_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic_and_formatted() {
        let sig = sign("s3cretXX", br#"{"k":1}"#);
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
        assert_eq!(sig, sign("s3cretXX", br#"{"k":1}"#));
    }

    #[test]
    fn different_secret_or_payload_changes_signature() {
        let sig = sign("secret-a", b"payload");
        assert_ne!(sig, sign("secret-b", b"payload"));
        assert_ne!(sig, sign("secret-a", b"payloae"));
    }

    #[test]
    fn verify_round_trips() {
        let secret = "s3cretXX";
        let payload = br#"{"k":1}"#;
        let sig = sign(secret, payload);
        assert!(verify(secret, payload, &sig));

        let mut flipped = payload.to_vec();
        flipped[0] ^= 0x01;
        assert!(!verify(secret, &flipped, &sig));

        assert!(!verify("different-secret", payload, &sig));
    }
}
