//! Webhook signature verification.
//!
//! GitHub signs the raw request body with HMAC-SHA256 and sends
//! `X-Hub-Signature-256: sha256=<hex>`. Verification runs over the exact
//! bytes received — any re-serialization would change them — and compares
//! in constant time via `Mac::verify_slice`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
const SIGNATURE_PREFIX: &str = "sha256=";

/// True iff `header` is a well-formed `sha256=<hex>` signature of `body`
/// under `secret`. Empty or malformed headers are simply invalid.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(hex_digest) = header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Produce the `sha256=<hex>` header value for `body` — used by tests and
/// by operators signing replay payloads.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}
