//! Access token claim decoding.
//!
//! Tokens are decoded without signature verification; only identity and
//! expiry are read out of the payload.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims the session layer reads from an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub email: String,
    /// Expiry in seconds since the epoch
    pub exp: i64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("token is not a three-part JWT")]
    Malformed,

    #[error("token segment is not valid base64")]
    Encoding,

    #[error("token header is invalid: {0}")]
    Header(String),

    #[error("token claims are missing or invalid: {0}")]
    Claims(String),
}

impl From<jsonwebtoken::errors::Error> for DecodeError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidToken => DecodeError::Malformed,
            ErrorKind::Base64(_) | ErrorKind::Utf8(_) => DecodeError::Encoding,
            _ => DecodeError::Header(err.to_string()),
        }
    }
}

/// Decode the claims of `token`.
///
/// The header must parse as a JWT header of any algorithm; the payload is
/// read as unpadded base64url JSON.
pub fn decode_claims(token: &str) -> Result<Claims, DecodeError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(DecodeError::Malformed),
    };

    jsonwebtoken::decode_header(token)?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| DecodeError::Encoding)?;
    serde_json::from_slice(&bytes).map_err(|e| DecodeError::Claims(e.to_string()))
}

/// Whether a token with expiry `exp` (seconds) has expired at `now`.
///
/// `exp` is scaled to milliseconds and compared against `now` in epoch
/// milliseconds; the token is expired from `exp * 1000` onwards.
pub fn is_expired_at(exp: i64, now: DateTime<Utc>) -> bool {
    exp.saturating_mul(1000) <= now.timestamp_millis()
}

/// True iff `token` decodes and has not expired at `now`.
pub fn validate(token: &str, now: DateTime<Utc>) -> bool {
    if token.is_empty() {
        return false;
    }
    match decode_claims(token) {
        Ok(claims) => !is_expired_at(claims.exp, now),
        Err(e) => {
            tracing::debug!(error = %e, "Token failed validation");
            false
        }
    }
}
