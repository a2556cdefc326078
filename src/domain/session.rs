//! Per-subscriber conversation state.
//!
//! Each step of the menu tree is a variant of [`Step`] carrying exactly the
//! fields that have been collected by the time the dialog reaches it. A handler
//! matched on `Step::BankPin { .. }` can rely on the bank, account and quote
//! being present; nothing is read from an open-ended bag.

use super::bank::Bank;
use super::fees::TransferQuote;
use super::money::Amount;
use super::phone::Msisdn;
use super::pin::Pin;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subscriber identity resolved on the first page of a dialog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub customer_id: String,
    /// Balance snapshot taken when the dialog started.
    pub balance: Decimal,
}

/// Recipient of an internal wallet-to-wallet transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecipient {
    pub customer_id: String,
    pub account_number: String,
    pub account_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "kebab-case")]
pub enum Step {
    Start,
    MainMenu,
    BalanceConfirm,
    TagpayAccount,
    TagpayAmount {
        recipient: WalletRecipient,
    },
    TagpayPin {
        recipient: WalletRecipient,
        amount: Amount,
    },
    BankMenu,
    BankSearch,
    BankSearchSelect {
        query: String,
        page: usize,
        has_next: bool,
        results: Vec<Bank>,
    },
    BankAccount {
        bank: Bank,
    },
    BankAmount {
        bank: Bank,
        account_number: String,
    },
    BankPin {
        bank: Bank,
        account_number: String,
        account_name: String,
        quote: TransferQuote,
    },
    ManagePinMenu,
    SetPin,
    SetPinConfirm {
        first: Pin,
    },
    ChangePinOld,
    ChangePinNew,
    ChangePinConfirm {
        first: Pin,
    },
}

impl Step {
    /// State name as it appears in logs and stored records.
    pub fn name(&self) -> &'static str {
        match self {
            Step::Start => "start",
            Step::MainMenu => "main-menu",
            Step::BalanceConfirm => "balance-confirm",
            Step::TagpayAccount => "tagpay-account",
            Step::TagpayAmount { .. } => "tagpay-amount",
            Step::TagpayPin { .. } => "tagpay-pin",
            Step::BankMenu => "bank-menu",
            Step::BankSearch => "bank-search",
            Step::BankSearchSelect { .. } => "bank-search-select",
            Step::BankAccount { .. } => "bank-account",
            Step::BankAmount { .. } => "bank-amount",
            Step::BankPin { .. } => "bank-pin",
            Step::ManagePinMenu => "manage-pin-menu",
            Step::SetPin => "set-pin",
            Step::SetPinConfirm { .. } => "set-pin-confirm",
            Step::ChangePinOld => "change-pin-old",
            Step::ChangePinNew => "change-pin-new",
            Step::ChangePinConfirm { .. } => "change-pin-confirm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub phone: Msisdn,
    pub carrier_session_id: Option<String>,
    /// Idempotency key for every money movement made in this dialog.
    pub reference: String,
    pub profile: Option<Profile>,
    pub step: Step,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Session {
    pub fn new(phone: Msisdn, carrier_session_id: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            phone,
            carrier_session_id,
            reference: Uuid::new_v4().to_string(),
            profile: None,
            step: Step::Start,
            created_at: now,
            last_seen: now,
        }
    }

    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_seen < cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn phone() -> Msisdn {
        Msisdn::parse("08031234567").unwrap()
    }

    #[test]
    fn test_new_session_starts_fresh() {
        let now = Utc::now();
        let a = Session::new(phone(), Some("AT-1".to_string()), now);
        let b = Session::new(phone(), None, now);
        assert_eq!(a.step, Step::Start);
        assert!(a.profile.is_none());
        assert_ne!(a.reference, b.reference);
        assert!(Uuid::parse_str(&a.reference).is_ok());
    }

    #[test]
    fn test_step_tag_matches_name() {
        let steps = vec![
            Step::MainMenu,
            Step::BankAccount {
                bank: Bank::new("GTBank", "058"),
            },
            Step::ChangePinConfirm {
                first: Pin::parse("1234").unwrap(),
            },
        ];
        for step in steps {
            let json = serde_json::to_value(&step).unwrap();
            assert_eq!(json["step"], step.name());
        }
    }

    #[test]
    fn test_session_record_survives_storage_encoding() {
        let mut session = Session::new(phone(), None, Utc::now());
        session.profile = Some(Profile {
            customer_id: "cus_1".to_string(),
            balance: dec!(5000),
        });
        session.step = Step::TagpayPin {
            recipient: WalletRecipient {
                customer_id: "cus_2".to_string(),
                account_number: "0123456789".to_string(),
                account_name: "ADA OBI".to_string(),
            },
            amount: Amount::new(dec!(250)).unwrap(),
        };
        let bytes = serde_json::to_vec(&session).unwrap();
        let decoded: Session = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, session);
    }

    #[test]
    fn test_unknown_step_does_not_decode() {
        let mut json = serde_json::to_value(Session::new(phone(), None, Utc::now())).unwrap();
        json["step"]["step"] = serde_json::Value::String("airtime-amount".to_string());
        assert!(serde_json::from_value::<Session>(json).is_err());
    }
}
