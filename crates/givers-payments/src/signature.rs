//! Webhook Signature Verification
//!
//! The provider signs `t + "." + body` with HMAC-SHA256 and sends
//! `t=<unix-seconds>,v1=<hex>[,v1=<hex>...]`. Verification runs on the exact
//! bytes received; nothing is re-serialised.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{PaymentError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Maximum distance between the signed timestamp and now
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Parsed `t` / `v1` pairs of a signature header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureHeader<'a> {
    /// Timestamp exactly as sent; the MAC covers this text
    pub timestamp: &'a str,
    pub signatures: Vec<&'a str>,
}

impl<'a> SignatureHeader<'a> {
    /// Split the header into its recognised parts. Other schemes (`v0`, ...)
    /// and pairs without `=` are ignored.
    pub fn parse(header: &'a str) -> Result<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = Some(value),
                "v1" => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PaymentError::MalformedSignature("missing t".into()))?;
        if signatures.is_empty() {
            return Err(PaymentError::MalformedSignature("missing v1".into()));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }

    fn unix_seconds(&self) -> Result<i64> {
        self.timestamp
            .parse()
            .map_err(|_| PaymentError::MalformedSignature("t is not a unix timestamp".into()))
    }
}

fn mac_for(secret: &str, timestamp: &str, payload: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| PaymentError::ConfigMissing("PAYMENTS_WEBHOOK_SECRET"))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Verify `header` against `payload` as of `now`
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    if secret.is_empty() {
        return Err(PaymentError::ConfigMissing("PAYMENTS_WEBHOOK_SECRET"));
    }

    let parsed = SignatureHeader::parse(header)?;
    let age_secs = now
        .timestamp()
        .checked_sub(parsed.unix_seconds()?)
        .ok_or_else(|| PaymentError::MalformedSignature("t is out of range".into()))?;
    if age_secs.unsigned_abs() > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        return Err(PaymentError::ReplayTooOld { age_secs });
    }

    let mac = mac_for(secret, parsed.timestamp, payload)?;
    let matched = parsed
        .signatures
        .iter()
        .filter_map(|sig| hex::decode(sig).ok())
        .any(|expected| mac.clone().verify_slice(&expected).is_ok());

    if matched {
        Ok(())
    } else {
        Err(PaymentError::SignatureMismatch)
    }
}

/// Produce a header the provider would send for `payload` signed at `timestamp`
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String> {
    let timestamp = timestamp.to_string();
    let digest = mac_for(secret, &timestamp, payload)?.finalize().into_bytes();
    Ok(format!("t={timestamp},v1={}", hex::encode(digest)))
}
