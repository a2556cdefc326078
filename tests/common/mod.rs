#![allow(dead_code)]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use chrono::{Duration, FixedOffset};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tagpay_ussd::application::audit::AuditEmitter;
use tagpay_ussd::application::credentials::PinVault;
use tagpay_ussd::application::engine::{Policy, UssdEngine};
use tagpay_ussd::application::sessions::SessionManager;
use tagpay_ussd::domain::fees::{DailyLimit, FeeSchedule};
use tagpay_ussd::domain::phone::Msisdn;
use tagpay_ussd::domain::pin::Pin;
use tagpay_ussd::domain::ports::{AuditLogHandle, CredentialVerifier, SessionStoreHandle};
use tagpay_ussd::infrastructure::bank_directory::StaticBankDirectory;
use tagpay_ussd::infrastructure::in_memory::{
    InMemoryAuditLog, InMemoryLedger, InMemoryPinStore, InMemorySessionStore,
};
use tagpay_ussd::interfaces::http::{AppState, router};
use tower::ServiceExt;

pub const ALICE: &str = "08031234567";
pub const BOB: &str = "08039999999";
pub const SECRET: &str = "carrier-secret";

pub struct TestApp {
    pub router: Router,
    pub ledger: InMemoryLedger,
    pub audit_log: InMemoryAuditLog,
    pub vault: Arc<PinVault>,
    pub engine: Arc<UssdEngine>,
    secret: Option<String>,
}

pub fn policy() -> Policy {
    Policy {
        fees: FeeSchedule::default(),
        daily_limit: DailyLimit::new(dec!(100000)),
        balance_check_fee: dec!(10),
        fee_wallet: "FEE-WALLET".to_string(),
        vat_wallet: "VAT-WALLET".to_string(),
        day_offset: FixedOffset::east_opt(3600).unwrap(),
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(None, Arc::new(InMemorySessionStore::new()), None).await
    }

    pub async fn with_secret() -> Self {
        Self::build(Some(SECRET.to_string()), Arc::new(InMemorySessionStore::new()), None).await
    }

    /// Builds the service over the given stores. The in-memory audit log is
    /// still used for ledger-side inspection when `audit` is `None`.
    pub async fn build(
        secret: Option<String>,
        sessions: SessionStoreHandle,
        audit: Option<AuditLogHandle>,
    ) -> Self {
        let ledger = InMemoryLedger::new();
        ledger
            .add_customer(&phone(ALICE), "CUST-A", "1000000001", "TOLU ADE", dec!(5000))
            .await;
        ledger
            .add_customer(&phone(BOB), "CUST-B", "1000000002", "BOLA AJAYI", dec!(20000))
            .await;
        ledger.add_bank_account("044", "0123456789", "ADA OBI").await;
        ledger.add_bank_account("058", "0987654321", "EMEKA NWOSU").await;

        let audit_log = InMemoryAuditLog::new();
        let audit_handle: AuditLogHandle = audit.unwrap_or_else(|| Arc::new(audit_log.clone()));
        let vault = Arc::new(PinVault::new(
            Arc::new(InMemoryPinStore::new()),
            3,
            Duration::minutes(30),
        ));
        let engine = Arc::new(UssdEngine::new(
            Arc::new(SessionManager::new(sessions, Duration::minutes(3))),
            Arc::new(ledger.clone()),
            vault.clone(),
            audit_handle.clone(),
            Arc::new(StaticBankDirectory::built_in()),
            policy(),
        ));
        let state = AppState::new(
            engine.clone(),
            AuditEmitter::new(audit_handle.clone()),
            audit_handle,
            secret.clone(),
        );

        Self {
            router: router(state),
            ledger,
            audit_log,
            vault,
            engine,
            secret,
        }
    }

    pub async fn set_pin(&self, raw_phone: &str, pin: &str) {
        self.vault
            .set(&phone(raw_phone), &Pin::parse(pin).unwrap())
            .await
            .unwrap();
    }

    pub async fn balance_of(&self, customer_id: &str) -> Decimal {
        self.ledger.balance_of(customer_id).await
    }

    /// Posts a carrier form callback and returns the status and body.
    pub async fn ussd(&self, raw_phone: &str, session_id: &str, text: &str) -> (StatusCode, String) {
        let body = format!(
            "sessionId={}&serviceCode=%2A123%23&phoneNumber={}&text={}",
            encode(session_id),
            encode(raw_phone),
            encode(text)
        );
        let mut request = Request::builder()
            .method("POST")
            .uri("/ussd")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(secret) = &self.secret {
            request = request.header("X-Gateway-Token", secret);
        }
        self.send(request.body(Body::from(body)).unwrap()).await
    }

    /// Convenience for a dialog step expected to succeed.
    pub async fn dial(&self, raw_phone: &str, text: &str) -> String {
        let (status, body) = self.ussd(raw_phone, "ATX-1", text).await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    /// Waits for detached audit writes to land.
    pub async fn wait_for_audit(&self, count: usize) {
        for _ in 0..100 {
            if self.audit_log.len().await >= count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("expected {count} audit records");
    }
}

pub fn phone(raw: &str) -> Msisdn {
    Msisdn::parse(raw).unwrap()
}

fn encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}
