use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,
    #[error("signature header malformed")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

/// Parsed `t=...,v1=...` style header (Stripe) or `ts=...,v1=...` (Mercado Pago).
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SignatureHeader<'a> {
    pub timestamp: Option<&'a str>,
    pub signatures: Vec<&'a str>,
}

pub fn parse_signature_header(raw: &str) -> SignatureHeader<'_> {
    let mut header = SignatureHeader::default();
    for part in raw.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            match key.trim() {
                "t" | "ts" => header.timestamp = Some(value.trim()),
                "v1" => header.signatures.push(value.trim()),
                _ => {}
            }
        }
    }
    header
}

pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Verifies that one of `candidates` is the hex HMAC of `signed` under `secret`.
pub fn verify_hmac(secret: &str, signed: &[u8], candidates: &[&str]) -> Result<(), SignatureError> {
    let expected = hmac_sha256_hex(secret, signed);
    if !expected.is_empty()
        && candidates
            .iter()
            .any(|candidate| constant_time_eq(&expected, &candidate.to_ascii_lowercase()))
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
