use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Teacher)
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(AppError::Internal(anyhow::anyhow!("invalid role: {other}"))),
        }
    }
}

pub const STAFF: &[Role] = &[Role::Admin, Role::Teacher];
pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
pub const ANY_ROLE: &[Role] = &[Role::Admin, Role::Teacher, Role::Student];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStatus {
    Available,
    CheckedOut,
    InRepair,
    Lost,
}

impl CopyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyStatus::Available => "available",
            CopyStatus::CheckedOut => "checked_out",
            CopyStatus::InRepair => "in_repair",
            CopyStatus::Lost => "lost",
        }
    }
}

impl FromStr for CopyStatus {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "available" => Ok(CopyStatus::Available),
            "checked_out" => Ok(CopyStatus::CheckedOut),
            "in_repair" => Ok(CopyStatus::InRepair),
            "lost" => Ok(CopyStatus::Lost),
            other => Err(AppError::Internal(anyhow::anyhow!("invalid copy status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    CheckedOut,
    Returned,
    Overdue,
}

impl CheckoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStatus::CheckedOut => "checked_out",
            CheckoutStatus::Returned => "returned",
            CheckoutStatus::Overdue => "overdue",
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, CheckoutStatus::Returned)
    }
}

impl FromStr for CheckoutStatus {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "checked_out" => Ok(CheckoutStatus::CheckedOut),
            "returned" => Ok(CheckoutStatus::Returned),
            "overdue" => Ok(CheckoutStatus::Overdue),
            other => Err(AppError::Internal(anyhow::anyhow!("invalid checkout status: {other}"))),
        }
    }
}

/// A student PIN is exactly four ASCII digits.
pub fn is_valid_pin(pin: &str) -> bool {
    pin.len() == 4 && pin.bytes().all(|b| b.is_ascii_digit())
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(s: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid stored timestamp {s}: {e}")))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(s: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid stored date {s}: {e}")))
}

/// Trims a required text field, rejecting blank input.
pub fn required(field: &str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Trims an optional text field, mapping blank input to `None`.
pub fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
