//! The access/refresh token pair and its expiry claim.
//!
//! Tokens are JWTs. Only the payload segment is decoded, to read `exp`; the
//! signature is the server's business. A token whose claim cannot be read is
//! treated as expired.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }

    /// A pair with an empty half is no pair at all.
    pub fn is_complete(&self) -> bool {
        !self.access.is_empty() && !self.refresh.is_empty()
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"[redacted]")
            .field("refresh", &"[redacted]")
            .finish()
    }
}

/// On-disk shape. Either half may be missing in a damaged record.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoredTokens {
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub refresh: Option<String>,
}

impl StoredTokens {
    pub fn into_pair(self) -> Option<TokenPair> {
        match (self.access, self.refresh) {
            (Some(access), Some(refresh)) => {
                let pair = TokenPair { access, refresh };
                pair.is_complete().then_some(pair)
            }
            _ => None,
        }
    }
}

impl From<&TokenPair> for StoredTokens {
    fn from(pair: &TokenPair) -> Self {
        Self {
            access: Some(pair.access.clone()),
            refresh: Some(pair.refresh.clone()),
        }
    }
}

/// Read the `exp` claim of a JWT.
pub fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?;

    let secs = match exp.as_i64() {
        Some(secs) => secs,
        None => exp.as_f64().filter(|f| f.is_finite())? as i64,
    };
    DateTime::from_timestamp(secs, 0)
}

/// A token is expired once no more than `margin` of its lifetime is left.
pub fn is_expired_at(token: &str, now: DateTime<Utc>, margin: Duration) -> bool {
    match decode_expiry(token) {
        Some(exp) => exp - now <= margin,
        None => true,
    }
}

/// Time left before `token` expires, if it can be decoded.
pub fn time_until_expiry(token: &str, now: DateTime<Utc>) -> Option<Duration> {
    decode_expiry(token).map(|exp| exp - now)
}
