//! HTTPS client for the TagPay core API.
//!
//! Lookups treat `404` and `{"status": false}` as "not found". Money-movement
//! calls always come back as a [`TransferReceipt`] carrying the raw response
//! body, so a rejection keeps the ledger's own message for the subscriber and
//! the audit log. Transport failures, including the request timeout, surface
//! as [`LedgerError`].

use crate::domain::ledger::{
    BankTransferRequest, Customer, TransferReceipt, WalletAccount, WalletTransferPurpose,
    WalletTransferRequest,
};
use crate::domain::phone::Msisdn;
use crate::domain::ports::Ledger;
use crate::error::{GatewayError, LedgerError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Connection settings for the TagPay API.
#[derive(Debug, Clone)]
pub struct TagPaySettings {
    pub base_url: String,
    /// Bearer token for lookups and customer transfers.
    pub token: String,
    /// Bearer token for fee postings.
    pub fee_token: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TagPayClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    fee_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    status: bool,
    message: Option<String>,
    customer: Option<CustomerBody>,
    wallet: Option<WalletBody>,
    account: Option<AccountBody>,
    transfer: Option<TransferBody>,
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerBody {
    #[serde(deserialize_with = "id_string")]
    id: String,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletBody {
    #[serde(default)]
    available_balance: Decimal,
    #[serde(default, deserialize_with = "optional_id_string")]
    customer_id: Option<String>,
    account_number: Option<String>,
    account_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountBody {
    account_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransferBody {
    reference: Option<String>,
}

#[derive(Serialize)]
struct Metadata {
    source: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BankTransferBody<'a> {
    account_number: &'a str,
    sort_code: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    narration: &'a str,
    account_name: &'a str,
    customer_id: &'a str,
    metadata: Metadata,
    reference: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WalletTransferBody<'a> {
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    from_customer_id: &'a str,
    to_customer_id: &'a str,
    reference: &'a str,
}

/// Customer ids arrive as numbers from some endpoints and strings from others.
fn id_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected id, found {other}"
        ))),
    }
}

fn optional_id_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected id, found {other}"
        ))),
    }
}

/// The `message` field of a JSON error body, or the body itself.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

fn receipt_from(status: StatusCode, body: &str) -> TransferReceipt {
    let raw = serde_json::from_str::<Value>(body).unwrap_or_else(|_| Value::String(body.to_string()));
    let envelope = serde_json::from_value::<Envelope>(raw.clone()).unwrap_or_default();

    if !status.is_success() {
        let message = envelope
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("Ledger returned HTTP {}", status.as_u16()));
        return TransferReceipt {
            accepted: false,
            reference: None,
            message: Some(message),
            raw,
        };
    }

    TransferReceipt {
        accepted: envelope.status,
        reference: envelope
            .transfer
            .and_then(|t| t.reference)
            .or(envelope.reference),
        message: envelope.message,
        raw,
    }
}

impl TagPayClient {
    pub fn new(settings: TagPaySettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| GatewayError::ConfigError(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: settings.token,
            fee_token: settings.fee_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn lookup(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> std::result::Result<Option<Envelope>, LedgerError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Status {
                status: status.as_u16(),
                message: upstream_message(&body),
            });
        }
        let envelope: Envelope = response.json().await?;
        debug!(path, found = envelope.status, "Ledger lookup");
        Ok(envelope.status.then_some(envelope))
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        token: &str,
        body: &B,
    ) -> std::result::Result<TransferReceipt, LedgerError> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        let receipt = receipt_from(status, &body);
        if !receipt.accepted {
            warn!(path, status = status.as_u16(), message = ?receipt.message, "Ledger rejected transfer");
        }
        Ok(receipt)
    }
}

#[async_trait]
impl Ledger for TagPayClient {
    async fn resolve_customer(
        &self,
        phone: &Msisdn,
    ) -> std::result::Result<Option<Customer>, LedgerError> {
        let envelope = self
            .lookup("customer/phone", &[("phoneNumber", phone.digits())])
            .await?;
        Ok(envelope.and_then(|e| e.customer).map(|c| {
            let name = match (c.first_name, c.last_name) {
                (Some(first), Some(last)) => Some(format!("{first} {last}")),
                (first, last) => first.or(last),
            };
            Customer {
                customer_id: c.id,
                name,
            }
        }))
    }

    async fn balance(&self, customer_id: &str) -> std::result::Result<Decimal, LedgerError> {
        let envelope = self
            .lookup("wallet/customer", &[("customerId", customer_id)])
            .await?;
        Ok(envelope
            .and_then(|e| e.wallet)
            .map(|w| w.available_balance)
            .unwrap_or_default())
    }

    async fn resolve_wallet(
        &self,
        account_number: &str,
    ) -> std::result::Result<Option<WalletAccount>, LedgerError> {
        let envelope = self
            .lookup("wallet/customer", &[("accountNumber", account_number)])
            .await?;
        Ok(envelope.and_then(|e| e.wallet).and_then(|w| {
            Some(WalletAccount {
                customer_id: w.customer_id?,
                account_number: w.account_number.unwrap_or_else(|| account_number.to_string()),
                account_name: w.account_name.unwrap_or_default(),
                available_balance: w.available_balance,
            })
        }))
    }

    async fn resolve_account_name(
        &self,
        bank_code: &str,
        account_number: &str,
    ) -> std::result::Result<Option<String>, LedgerError> {
        let envelope = self
            .lookup(
                "transfer/account/details",
                &[("sortCode", bank_code), ("accountNumber", account_number)],
            )
            .await?;
        Ok(envelope
            .and_then(|e| e.account)
            .and_then(|a| a.account_name)
            .filter(|name| !name.trim().is_empty()))
    }

    async fn submit_bank_transfer(
        &self,
        request: &BankTransferRequest,
    ) -> std::result::Result<TransferReceipt, LedgerError> {
        let body = BankTransferBody {
            account_number: &request.account_number,
            sort_code: &request.bank_code,
            amount: request.amount.value(),
            narration: &request.narration,
            account_name: &request.account_name,
            customer_id: &request.customer_id,
            metadata: Metadata { source: "USSD" },
            reference: &request.reference,
        };
        self.post("transfer/bank/customer", &self.token, &body).await
    }

    async fn submit_wallet_transfer(
        &self,
        request: &WalletTransferRequest,
    ) -> std::result::Result<TransferReceipt, LedgerError> {
        let token = match request.purpose {
            WalletTransferPurpose::Transfer => &self.token,
            WalletTransferPurpose::Fee => &self.fee_token,
        };
        let body = WalletTransferBody {
            amount: request.amount.value(),
            from_customer_id: &request.from_customer_id,
            to_customer_id: &request.to_customer_id,
            reference: &request.reference,
        };
        self.post("transfer/wallet", token, &body).await
    }
}
