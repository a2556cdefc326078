use crate::error::GatewayError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const PIN_LENGTH: usize = 4;

/// A 4-digit transaction PIN as typed on the keypad.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin(String);

impl Pin {
    pub fn parse(token: &str) -> Result<Self, GatewayError> {
        if token.len() == PIN_LENGTH && token.chars().all(|c| c.is_ascii_digit()) {
            Ok(Self(token.to_string()))
        } else {
            Err(GatewayError::ValidationError(format!(
                "PIN must be exactly {PIN_LENGTH} digits"
            )))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(****)")
    }
}

/// Result of checking a PIN against the stored credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinCheck {
    Valid,
    Invalid,
    Locked,
    NotSet,
}

/// Stored credential for one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinRecord {
    /// Hex SHA-256 of `salt || pin`.
    pub hash: String,
    /// Hex random salt, replaced on every write.
    pub salt: String,
    pub attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PinRecord {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}
