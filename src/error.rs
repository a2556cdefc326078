use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Corrupt session record for {phone}: {reason}")]
    CorruptSession { phone: String, reason: String },
    #[error("Ledger error: {0}")]
    LedgerError(#[from] LedgerError),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

/// Failures talking to the external ledger API.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("ledger request timed out")]
    Timeout,
    #[error("ledger returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("ledger connection failed: {0}")]
    Connection(String),
    #[error("unexpected ledger response: {0}")]
    Decode(String),
}

impl LedgerError {
    /// Text safe to show on a handset after a failed money movement.
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::Timeout => "Request timed out".to_string(),
            LedgerError::Status { message, .. } if !message.is_empty() => message.clone(),
            _ => "Service unavailable".to_string(),
        }
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LedgerError::Timeout
        } else if err.is_decode() {
            LedgerError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            LedgerError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            LedgerError::Connection(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
