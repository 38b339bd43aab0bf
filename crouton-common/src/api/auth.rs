//! Request signature verification
//!
//! Senders sign the exact request body with HMAC-SHA256 under a shared
//! secret and send `X-Signature: sha256=<hex>`.
//!
//! Proxies sometimes add or strip a single trailing newline, so a body is
//! also accepted when the signature matches the same body with one
//! trailing `\n` toggled. The accepted class is exactly
//! `{body, body with one trailing newline toggled}`.
//!
//! Every failure (missing header, bad prefix, bad hex, wrong length,
//! empty secret, mismatch) is a rejection. Comparison is constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::{Choice, ConstantTimeEq};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Scheme prefix of the header value
pub const SIGNATURE_PREFIX: &str = "sha256=";

const MAC_LEN: usize = 32;

/// Reasons a signature was rejected
///
/// Only used for logging; callers see a single `signature_invalid` code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// No `X-Signature` header
    MissingHeader,
    /// Header does not start with `sha256=`
    BadScheme,
    /// Hex payload malformed or wrong length
    BadEncoding,
    /// Secret is empty or unusable
    NoSecret,
    /// Signature does not match either body variant
    Mismatch,
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureError::MissingHeader => write!(f, "missing signature header"),
            SignatureError::BadScheme => write!(f, "signature scheme must be sha256"),
            SignatureError::BadEncoding => write!(f, "signature is not 64 hex characters"),
            SignatureError::NoSecret => write!(f, "no signing secret configured"),
            SignatureError::Mismatch => write!(f, "signature mismatch"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// Verify `header` against `body`
///
/// Returns `false` for every failure mode.
pub fn verify(secret: &[u8], body: &[u8], header: Option<&str>) -> bool {
    check_signature(secret, body, header).is_ok()
}

/// Verify `header` against `body`, reporting why verification failed
pub fn check_signature(
    secret: &[u8],
    body: &[u8],
    header: Option<&str>,
) -> Result<(), SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::NoSecret);
    }

    let provided = decode_header(header.ok_or(SignatureError::MissingHeader)?)?;

    let exact = mac_over(secret, &[body])?;
    let toggled = match body.strip_suffix(b"\n") {
        Some(stripped) => mac_over(secret, &[stripped])?,
        None => mac_over(secret, &[body, b"\n"])?,
    };

    // Both comparisons always run
    let matched: Choice = exact[..].ct_eq(&provided[..]) | toggled[..].ct_eq(&provided[..]);
    if bool::from(matched) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Produce the `X-Signature` header value for `body`
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mac = match HmacSha256::new_from_slice(secret) {
        Ok(mut mac) => {
            mac.update(body);
            mac.finalize().into_bytes()
        }
        // HMAC accepts keys of any length
        Err(_) => return String::new(),
    };
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac))
}

fn decode_header(header: &str) -> Result<[u8; MAC_LEN], SignatureError> {
    let hex_part = header
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or(SignatureError::BadScheme)?;

    let mut out = [0u8; MAC_LEN];
    hex::decode_to_slice(hex_part, &mut out).map_err(|_| SignatureError::BadEncoding)?;
    Ok(out)
}

fn mac_over(secret: &[u8], parts: &[&[u8]]) -> Result<[u8; MAC_LEN], SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::NoSecret)?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}
