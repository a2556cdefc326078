use super::phone::Msisdn;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    WalletTransfer,
    BankTransfer,
    BalanceCheckFee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Submitted,
    Failed,
    Settled,
    Reversed,
}

impl TransferStatus {
    /// Whether the amount counts against the customer's daily ceiling.
    pub fn counts_toward_limit(&self) -> bool {
        matches!(self, TransferStatus::Submitted | TransferStatus::Settled)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStatus::Submitted => "submitted",
            TransferStatus::Failed => "failed",
            TransferStatus::Settled => "settled",
            TransferStatus::Reversed => "reversed",
        };
        f.write_str(s)
    }
}

/// Final status pushed by the ledger's settlement webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Success,
    Failed,
    Reversed,
}

impl From<SettlementStatus> for TransferStatus {
    fn from(status: SettlementStatus) -> Self {
        match status {
            SettlementStatus::Success => TransferStatus::Settled,
            SettlementStatus::Failed => TransferStatus::Failed,
            SettlementStatus::Reversed => TransferStatus::Reversed,
        }
    }
}

/// Outcome of one leg of the fee split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "n/a")]
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Destination {
    Bank {
        bank_code: String,
        account_number: String,
        account_name: String,
    },
    Wallet {
        customer_id: String,
        account_number: String,
        account_name: String,
    },
    FeeWallet {
        customer_id: String,
    },
}

/// One attempted money movement, keyed by the session reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub reference: String,
    pub kind: TransferKind,
    pub carrier_session_id: Option<String>,
    pub customer_id: String,
    pub phone: Msisdn,
    pub amount: Decimal,
    pub fee: Decimal,
    pub vat: Decimal,
    pub total: Decimal,
    pub destination: Destination,
    pub transaction_reference: Option<String>,
    pub status: TransferStatus,
    pub message: Option<String>,
    pub raw_response: serde_json::Value,
    pub merchant_fee_status: FeeStatus,
    pub vat_fee_status: FeeStatus,
    pub webhook_received: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRecord {
    /// Applies a later write for the same reference. Identity, amounts and the
    /// original creation time are kept; outcome fields are replaced.
    pub fn merge_from(&mut self, newer: TransferRecord) {
        self.status = newer.status;
        self.message = newer.message;
        self.raw_response = newer.raw_response;
        if newer.transaction_reference.is_some() {
            self.transaction_reference = newer.transaction_reference;
        }
        self.merchant_fee_status = newer.merchant_fee_status;
        self.vat_fee_status = newer.vat_fee_status;
        self.webhook_received |= newer.webhook_received;
        self.updated_at = newer.updated_at;
    }

    /// Applies a settlement notification from the ledger.
    pub fn settle(
        &mut self,
        status: SettlementStatus,
        transaction_reference: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.status = status.into();
        if transaction_reference.is_some() {
            self.transaction_reference = transaction_reference;
        }
        self.webhook_received = true;
        self.updated_at = now;
    }
}
