use crate::domain::audit::{SettlementStatus, TransferKind, TransferRecord};
use crate::domain::ledger::{
    BankTransferRequest, Customer, TransferReceipt, WalletAccount, WalletTransferRequest,
};
use crate::domain::phone::Msisdn;
use crate::domain::pin::PinRecord;
use crate::domain::ports::{AuditLog, Ledger, PinRecordStore, SessionStore};
use crate::domain::session::Session;
use crate::error::{GatewayError, LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

/// A thread-safe in-memory session store.
///
/// Sessions are kept JSON-encoded, exactly as the persistent store keeps
/// them, so an unreadable record behaves the same in tests as on disk.
#[derive(Default, Clone)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<Msisdn, Vec<u8>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores raw bytes for `phone`, bypassing encoding.
    pub async fn insert_raw(&self, phone: &Msisdn, bytes: Vec<u8>) {
        self.sessions.write().await.insert(phone.clone(), bytes);
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, phone: &Msisdn) -> Result<Option<Session>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(phone)
            .map(|bytes| {
                serde_json::from_slice(bytes).map_err(|e| GatewayError::CorruptSession {
                    phone: phone.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    async fn save(&self, session: Session) -> Result<()> {
        let bytes = serde_json::to_vec(&session)
            .map_err(|e| GatewayError::StorageError(format!("Serialization error: {e}")))?;
        self.sessions.write().await.insert(session.phone, bytes);
        Ok(())
    }

    async fn delete(&self, phone: &Msisdn) -> Result<()> {
        self.sessions.write().await.remove(phone);
        Ok(())
    }

    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        // Unreadable records are purged too; they can never be resumed.
        sessions.retain(|_, bytes| {
            serde_json::from_slice::<Session>(bytes)
                .map(|session| !session.is_idle_since(cutoff))
                .unwrap_or(false)
        });
        Ok(before - sessions.len())
    }
}

/// A thread-safe in-memory audit log with upsert-by-reference semantics.
#[derive(Default, Clone)]
pub struct InMemoryAuditLog {
    records: Arc<RwLock<HashMap<String, TransferRecord>>>,
    failures: Arc<AtomicU32>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` writes fail with a storage error.
    pub fn fail_next_writes(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn records(&self) -> Vec<TransferRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn record(&self, record: TransferRecord) -> Result<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(GatewayError::StorageError(
                "Audit log unavailable".to_string(),
            ));
        }

        let mut records = self.records.write().await;
        match records.get_mut(&record.reference) {
            Some(existing) => existing.merge_from(record),
            None => {
                records.insert(record.reference.clone(), record);
            }
        }
        Ok(())
    }

    async fn find(&self, reference: &str) -> Result<Option<TransferRecord>> {
        Ok(self.records.read().await.get(reference).cloned())
    }

    async fn daily_total(
        &self,
        customer_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Decimal> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| {
                r.customer_id == customer_id
                    && r.kind == TransferKind::BankTransfer
                    && r.status.counts_toward_limit()
                    && r.created_at >= from
                    && r.created_at < to
            })
            .map(|r| r.amount)
            .sum())
    }

    async fn mark_settlement(
        &self,
        reference: &str,
        status: SettlementStatus,
        transaction_reference: Option<String>,
    ) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(reference) {
            Some(record) => {
                record.settle(status, transaction_reference, Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// A thread-safe in-memory store for PIN credentials.
#[derive(Default, Clone)]
pub struct InMemoryPinStore {
    records: Arc<RwLock<HashMap<Msisdn, PinRecord>>>,
}

impl InMemoryPinStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PinRecordStore for InMemoryPinStore {
    async fn load(&self, phone: &Msisdn) -> Result<Option<PinRecord>> {
        Ok(self.records.read().await.get(phone).cloned())
    }

    async fn save(&self, phone: &Msisdn, record: PinRecord) -> Result<()> {
        self.records.write().await.insert(phone.clone(), record);
        Ok(())
    }
}

#[derive(Default)]
struct LedgerState {
    /// Keyed by digits-only phone number.
    customers: HashMap<String, Customer>,
    wallets: HashMap<String, WalletAccount>,
    balances: HashMap<String, Decimal>,
    account_names: HashMap<(String, String), String>,
    bank_transfers: Vec<BankTransferRequest>,
    wallet_transfers: Vec<WalletTransferRequest>,
    rejection: Option<String>,
    unavailable: bool,
    next_id: u64,
}

/// An in-process ledger for tests and local runs.
///
/// Records every money-movement call it receives and moves balances between
/// its own wallets. It can be told to reject transfers or to time out.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a customer reachable by `phone`, owning wallet `account_number`.
    pub async fn add_customer(
        &self,
        phone: &Msisdn,
        customer_id: &str,
        account_number: &str,
        name: &str,
        balance: Decimal,
    ) {
        let mut state = self.state.write().await;
        state.customers.insert(
            phone.digits().to_string(),
            Customer {
                customer_id: customer_id.to_string(),
                name: Some(name.to_string()),
            },
        );
        state.wallets.insert(
            account_number.to_string(),
            WalletAccount {
                customer_id: customer_id.to_string(),
                account_number: account_number.to_string(),
                account_name: name.to_string(),
                available_balance: balance,
            },
        );
        state.balances.insert(customer_id.to_string(), balance);
    }

    /// Makes `account_number` at `bank_code` answer name enquiries with `name`.
    pub async fn add_bank_account(&self, bank_code: &str, account_number: &str, name: &str) {
        self.state.write().await.account_names.insert(
            (bank_code.to_string(), account_number.to_string()),
            name.to_string(),
        );
    }

    /// Rejects every subsequent transfer with `message`, or accepts again on `None`.
    pub async fn reject_transfers(&self, message: Option<&str>) {
        self.state.write().await.rejection = message.map(str::to_string);
    }

    /// Makes every subsequent call fail with a timeout.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    pub async fn bank_transfers(&self) -> Vec<BankTransferRequest> {
        self.state.read().await.bank_transfers.clone()
    }

    pub async fn wallet_transfers(&self) -> Vec<WalletTransferRequest> {
        self.state.read().await.wallet_transfers.clone()
    }

    pub async fn balance_of(&self, customer_id: &str) -> Decimal {
        self.state
            .read()
            .await
            .balances
            .get(customer_id)
            .copied()
            .unwrap_or_default()
    }

    fn check_available(state: &LedgerState) -> std::result::Result<(), LedgerError> {
        if state.unavailable {
            Err(LedgerError::Timeout)
        } else {
            Ok(())
        }
    }

    fn debit(
        state: &mut LedgerState,
        customer_id: &str,
        amount: Decimal,
    ) -> std::result::Result<String, TransferReceipt> {
        if let Some(message) = &state.rejection {
            return Err(TransferReceipt::rejected(message.clone()));
        }
        let balance = state.balances.entry(customer_id.to_string()).or_default();
        if *balance < amount {
            return Err(TransferReceipt::rejected("Insufficient funds"));
        }
        *balance -= amount;
        state.next_id += 1;
        Ok(format!("TXN-{:06}", state.next_id))
    }

    fn accepted(transaction_reference: String, reference: &str) -> TransferReceipt {
        TransferReceipt {
            accepted: true,
            reference: Some(transaction_reference.clone()),
            message: Some("Transfer successful".to_string()),
            raw: serde_json::json!({
                "status": true,
                "reference": reference,
                "transactionReference": transaction_reference,
            }),
        }
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn resolve_customer(
        &self,
        phone: &Msisdn,
    ) -> std::result::Result<Option<Customer>, LedgerError> {
        let state = self.state.read().await;
        Self::check_available(&state)?;
        Ok(state.customers.get(phone.digits()).cloned())
    }

    async fn balance(&self, customer_id: &str) -> std::result::Result<Decimal, LedgerError> {
        let state = self.state.read().await;
        Self::check_available(&state)?;
        Ok(state.balances.get(customer_id).copied().unwrap_or_default())
    }

    async fn resolve_wallet(
        &self,
        account_number: &str,
    ) -> std::result::Result<Option<WalletAccount>, LedgerError> {
        let state = self.state.read().await;
        Self::check_available(&state)?;
        Ok(state.wallets.get(account_number).cloned().map(|mut wallet| {
            wallet.available_balance = state
                .balances
                .get(&wallet.customer_id)
                .copied()
                .unwrap_or_default();
            wallet
        }))
    }

    async fn resolve_account_name(
        &self,
        bank_code: &str,
        account_number: &str,
    ) -> std::result::Result<Option<String>, LedgerError> {
        let state = self.state.read().await;
        Self::check_available(&state)?;
        Ok(state
            .account_names
            .get(&(bank_code.to_string(), account_number.to_string()))
            .cloned())
    }

    async fn submit_bank_transfer(
        &self,
        request: &BankTransferRequest,
    ) -> std::result::Result<TransferReceipt, LedgerError> {
        let mut state = self.state.write().await;
        Self::check_available(&state)?;
        state.bank_transfers.push(request.clone());
        match Self::debit(&mut state, &request.customer_id, request.amount.value()) {
            Ok(id) => Ok(Self::accepted(id, &request.reference)),
            Err(rejection) => Ok(rejection),
        }
    }

    async fn submit_wallet_transfer(
        &self,
        request: &WalletTransferRequest,
    ) -> std::result::Result<TransferReceipt, LedgerError> {
        let mut state = self.state.write().await;
        Self::check_available(&state)?;
        state.wallet_transfers.push(request.clone());
        match Self::debit(&mut state, &request.from_customer_id, request.amount.value()) {
            Ok(id) => {
                *state
                    .balances
                    .entry(request.to_customer_id.clone())
                    .or_default() += request.amount.value();
                Ok(Self::accepted(id, &request.reference))
            }
            Err(rejection) => Ok(rejection),
        }
    }
}
