use std::fmt;

use axum::http::{HeaderMap, header::AUTHORIZATION};

use crate::error::{AppError, AppResult};
use crate::model::is_valid_pin;

/// What the caller presented, decided by the `Authorization` scheme:
/// `Bearer <token>` for staff, `Pin <4 digits>` for students.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Staff(String),
    StudentPin(String),
}

fn unauthorized(msg: &str) -> AppError {
    AppError::Unauthorized(msg.to_string())
}

impl Credential {
    pub fn from_headers(headers: &HeaderMap) -> AppResult<Self> {
        let value = headers
            .get(AUTHORIZATION)
            .ok_or_else(|| unauthorized("missing credentials"))?
            .to_str()
            .map_err(|_| unauthorized("malformed authorization header"))?;

        Self::parse(value)
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        let (scheme, secret) = value
            .trim()
            .split_once(' ')
            .ok_or_else(|| unauthorized("malformed authorization header"))?;
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(unauthorized("missing credentials"));
        }

        match scheme.to_ascii_lowercase().as_str() {
            "bearer" => Ok(Credential::Staff(secret.to_string())),
            "pin" => {
                if !is_valid_pin(secret) {
                    return Err(unauthorized("malformed student pin"));
                }
                Ok(Credential::StudentPin(secret.to_string()))
            }
            _ => Err(unauthorized("unsupported authorization scheme")),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Staff(_) => write!(f, "Staff(..)"),
            Credential::StudentPin(_) => write!(f, "StudentPin(..)"),
        }
    }
}
