//! Request and response shapes exchanged with the ledger port.

use super::money::Amount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A registered TagPay customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: String,
    pub name: Option<String>,
}

/// A wallet found by its 10-digit account number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAccount {
    pub customer_id: String,
    pub account_number: String,
    pub account_name: String,
    pub available_balance: Decimal,
}

/// Outbound interbank transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankTransferRequest {
    pub customer_id: String,
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
    pub amount: Amount,
    pub narration: String,
    pub reference: String,
}

/// Why a wallet-to-wallet movement is being made. Fee postings are
/// authorised with the merchant fee credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletTransferPurpose {
    Transfer,
    Fee,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransferRequest {
    pub from_customer_id: String,
    pub to_customer_id: String,
    pub amount: Amount,
    pub purpose: WalletTransferPurpose,
    pub reference: String,
}

/// The ledger's answer to a money movement.
///
/// `accepted == false` is a business rejection (insufficient funds, bad
/// account); transport failures surface as `LedgerError` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub accepted: bool,
    /// The ledger's own transaction reference, when it returned one.
    pub reference: Option<String>,
    pub message: Option<String>,
    pub raw: serde_json::Value,
}

impl TransferReceipt {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reference: None,
            message: Some(message.into()),
            raw: serde_json::Value::Null,
        }
    }
}
