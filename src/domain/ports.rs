use super::audit::{SettlementStatus, TransferRecord};
use super::bank::BankPage;
use super::ledger::{
    BankTransferRequest, Customer, TransferReceipt, WalletAccount, WalletTransferRequest,
};
use super::phone::Msisdn;
use super::pin::{Pin, PinCheck, PinRecord};
use super::session::Session;
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Storage for in-flight dialogs, one record per subscriber.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns `Err(GatewayError::CorruptSession)` when a stored record
    /// cannot be decoded.
    async fn load(&self, phone: &Msisdn) -> Result<Option<Session>>;
    async fn save(&self, session: Session) -> Result<()>;
    async fn delete(&self, phone: &Msisdn) -> Result<()>;
    /// Drops every session last seen before `cutoff`, returning how many went.
    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Durable history of attempted transfers, upserted by reference.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, record: TransferRecord) -> Result<()>;
    async fn find(&self, reference: &str) -> Result<Option<TransferRecord>>;
    /// Sum of bank-transfer amounts for `customer_id` created in `[from, to)`
    /// that still count against the daily ceiling.
    async fn daily_total(
        &self,
        customer_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Decimal>;
    /// Applies a settlement webhook. Returns `false` for an unknown reference.
    async fn mark_settlement(
        &self,
        reference: &str,
        status: SettlementStatus,
        transaction_reference: Option<String>,
    ) -> Result<bool>;
}

#[async_trait]
pub trait PinRecordStore: Send + Sync {
    async fn load(&self, phone: &Msisdn) -> Result<Option<PinRecord>>;
    async fn save(&self, phone: &Msisdn, record: PinRecord) -> Result<()>;
}

/// Verify/set/change capability for transaction PINs.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, phone: &Msisdn, pin: &Pin) -> Result<PinCheck>;
    async fn set(&self, phone: &Msisdn, pin: &Pin) -> Result<()>;
    async fn change(&self, phone: &Msisdn, pin: &Pin) -> Result<()>;
}

/// The external ledger that owns customers, wallets and money movement.
///
/// Every call is bounded by the adapter's timeout; a timeout comes back as
/// `LedgerError::Timeout`, never as a hang.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn resolve_customer(
        &self,
        phone: &Msisdn,
    ) -> std::result::Result<Option<Customer>, LedgerError>;
    async fn balance(&self, customer_id: &str) -> std::result::Result<Decimal, LedgerError>;
    async fn resolve_wallet(
        &self,
        account_number: &str,
    ) -> std::result::Result<Option<WalletAccount>, LedgerError>;
    /// Name enquiry against a destination bank.
    async fn resolve_account_name(
        &self,
        bank_code: &str,
        account_number: &str,
    ) -> std::result::Result<Option<String>, LedgerError>;
    async fn submit_bank_transfer(
        &self,
        request: &BankTransferRequest,
    ) -> std::result::Result<TransferReceipt, LedgerError>;
    async fn submit_wallet_transfer(
        &self,
        request: &WalletTransferRequest,
    ) -> std::result::Result<TransferReceipt, LedgerError>;
}

pub trait BankDirectory: Send + Sync {
    fn search(&self, term: &str, page: usize, page_size: usize) -> BankPage;
}

pub type SessionStoreHandle = Arc<dyn SessionStore>;
pub type AuditLogHandle = Arc<dyn AuditLog>;
pub type PinRecordStoreHandle = Arc<dyn PinRecordStore>;
pub type CredentialVerifierHandle = Arc<dyn CredentialVerifier>;
pub type LedgerHandle = Arc<dyn Ledger>;
pub type BankDirectoryHandle = Arc<dyn BankDirectory>;
