use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockcart_core::{CartId, DomainError};

/// Kind of line mutation recorded in the audit trail.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Add,
    Set,
    Remove,
    AutoDrop,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Add => "add",
            AuditAction::Set => "set",
            AuditAction::Remove => "remove",
            AuditAction::AutoDrop => "auto_drop",
        }
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AuditAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(AuditAction::Add),
            "set" => Ok(AuditAction::Set),
            "remove" => Ok(AuditAction::Remove),
            "auto_drop" => Ok(AuditAction::AutoDrop),
            other => Err(DomainError::validation(format!(
                "unknown audit action '{other}'"
            ))),
        }
    }
}

/// Append-only record of one cart line mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartAuditEntry {
    pub cart_id: CartId,
    pub action: AuditAction,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
