//! Signed staff tokens.
//!
//! A token is `hex(claims json) "." hex(HMAC-SHA256(secret, payload))`. The
//! claims are trusted as-is once the signature and expiry check out.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{AppError, AppResult};
use crate::model::Role;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i32,
    pub name: String,
    pub role: Role,
    pub exp: i64,
}

pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

fn invalid_token() -> AppError {
    AppError::Unauthorized("invalid token".to_string())
}

impl TokenSigner {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        TokenSigner {
            secret: secret.as_bytes().to_vec(),
            ttl,
        }
    }

    fn mac(&self) -> AppResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid token key: {e}")))
    }

    pub fn issue(&self, sub: i32, name: &str, role: Role, now: DateTime<Utc>) -> AppResult<String> {
        let claims = Claims {
            sub,
            name: name.to_string(),
            role,
            exp: (now + self.ttl).timestamp(),
        };
        let payload = hex::encode(serde_json::to_vec(&claims)?);

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{payload}.{signature}"))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> AppResult<Claims> {
        let (payload, signature) = token.split_once('.').ok_or_else(invalid_token)?;
        let signature = hex::decode(signature).map_err(|_| invalid_token())?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).map_err(|_| invalid_token())?;

        let bytes = hex::decode(payload).map_err(|_| invalid_token())?;
        let claims: Claims = serde_json::from_slice(&bytes).map_err(|_| invalid_token())?;

        if claims.exp <= now.timestamp() {
            return Err(AppError::Unauthorized("token expired".to_string()));
        }
        // students authenticate by pin only
        if !claims.role.is_staff() {
            return Err(invalid_token());
        }

        Ok(claims)
    }
}
