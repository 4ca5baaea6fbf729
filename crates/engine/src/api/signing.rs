//! Request signing for the private exchange endpoints

use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

fn hmac_sha256(secret: &[u8], message: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Hex HMAC-SHA256, used by BingX over the raw query string
pub fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    hex::encode(hmac_sha256(secret.as_bytes(), message.as_bytes()))
}

/// Base64 HMAC-SHA256, used by KuCoin for the signature and the passphrase
pub fn hmac_sha256_base64(secret: &str, message: &str) -> String {
    general_purpose::STANDARD.encode(hmac_sha256(secret.as_bytes(), message.as_bytes()))
}

/// Blofin signs `path + method + timestamp + nonce + body` and base64-encodes the hex digest
pub fn blofin_signature(secret: &str, path: &str, method: &str, timestamp: &str, nonce: &str, body: &str) -> String {
    let prehash = format!("{path}{method}{timestamp}{nonce}{body}");
    general_purpose::STANDARD.encode(hmac_sha256_hex(secret, &prehash))
}

/// Kraken `API-Sign`: HMAC-SHA512 keyed with the decoded secret over
/// `path + SHA256(nonce + postdata)`
pub fn kraken_signature(secret_b64: &str, path: &str, nonce: &str, post_data: &str) -> Result<String, base64::DecodeError> {
    let secret = general_purpose::STANDARD.decode(secret_b64)?;

    let mut sha = Sha256::new();
    sha.update(nonce.as_bytes());
    sha.update(post_data.as_bytes());
    let digest = sha.finalize();

    let mut message = Vec::with_capacity(path.len() + digest.len());
    message.extend_from_slice(path.as_bytes());
    message.extend_from_slice(&digest);

    let mut mac = match HmacSha512::new_from_slice(&secret) {
        Ok(mac) => mac,
        Err(_) => return Ok(String::new()),
    };
    mac.update(&message);
    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Millisecond timestamp used by BingX, Blofin and KuCoin
pub fn timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOX: &str = "The quick brown fox jumps over the lazy dog";
    const FOX_SHA256: &str = "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8";

    #[test]
    fn test_hmac_sha256_hex_known_vector() {
        assert_eq!(hmac_sha256_hex("key", FOX), FOX_SHA256);
    }

    #[test]
    fn test_base64_matches_hex_digest() {
        let b64 = hmac_sha256_base64("key", FOX);
        let raw = general_purpose::STANDARD.decode(b64).unwrap();
        assert_eq!(hex::encode(raw), FOX_SHA256);
    }

    #[test]
    fn test_blofin_encodes_hex_string() {
        let sig = blofin_signature("key", "The quick", " brown", " fox jumps", " over the", " lazy dog");
        let decoded = general_purpose::STANDARD.decode(sig).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), FOX_SHA256);
    }

    #[test]
    fn test_kraken_signature_shape() {
        let secret = general_purpose::STANDARD.encode(b"kraken-secret");
        let a = kraken_signature(&secret, "/0/private/Balance", "1", "nonce=1").unwrap();
        let b = kraken_signature(&secret, "/0/private/Balance", "2", "nonce=2").unwrap();
        assert_eq!(general_purpose::STANDARD.decode(&a).unwrap().len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_kraken_rejects_non_base64_secret() {
        assert!(kraken_signature("not base64!!", "/0/private/Balance", "1", "nonce=1").is_err());
    }
}
