//! GitHub webhook signature verification using HMAC-SHA256.
//!
//! GitHub signs each delivery body with the shared webhook secret and sends
//! the result in `X-Hub-Signature-256` as `sha256=<hex>`. Verification must
//! happen before anything else looks at the payload.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Parses a `sha256=<hex>` header value into raw bytes.
///
/// Returns `None` for a missing prefix, another algorithm, or invalid hex.
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix("sha256=")?;
    hex::decode(hex_sig).ok()
}

/// Computes the HMAC-SHA256 of `payload` under `secret`
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats raw signature bytes as a `sha256=<hex>` header value
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}

/// Verifies a `sha256=<hex>` header against the payload and secret.
///
/// The comparison is constant-time (delegated to [`Mac::verify_slice`]).
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let expected = match parse_signature_header(signature_header) {
        Some(sig) => sig,
        None => return false,
    };

    let mut mac = match <HmacSha256 as Mac>::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);

    mac.verify_slice(&expected).is_ok()
}
