//! Literal handset texts. Wording and line breaks are part of the carrier
//! contract; change them only together with the gateway configuration.

use crate::domain::bank::{Bank, BankPage};
use crate::domain::fees::TransferQuote;
use crate::domain::money::{Amount, CURRENCY, display};
use rust_decimal::Decimal;
use std::fmt;

pub const PREVIOUS: &str = "98";
pub const NEXT: &str = "99";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Continue,
    End,
}

/// A complete USSD response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: ReplyKind,
    pub text: String,
}

impl Reply {
    pub fn con(text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Continue,
            text: text.into(),
        }
    }

    pub fn end(text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::End,
            text: text.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind == ReplyKind::End
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ReplyKind::Continue => write!(f, "CON {}", self.text),
            ReplyKind::End => write!(f, "END {}", self.text),
        }
    }
}

pub const NOT_REGISTERED: &str = "You are not registered on TagPay";
pub const INVALID_PHONE: &str = "Invalid phone number";
pub const SESSION_EXPIRED: &str = "Session expired. Please dial again.";
pub const SYSTEM_ERROR: &str = "System error. Please try again later.";
pub const INVALID_OPTION: &str = "Invalid option";
pub const AIRTIME_UNAVAILABLE: &str = "Airtime/Data purchase is coming soon";

pub const BALANCE_INSUFFICIENT: &str = "Insufficient funds to check balance";
pub const BALANCE_FEE_FAILED: &str = "Could not process balance check fee. Try again later.";
pub const BALANCE_CANCELLED: &str = "Balance check cancelled.";
pub const BALANCE_REPROMPT: &str = "Invalid choice. Press 1 to proceed or 2 to cancel.";

pub const ENTER_WALLET_ACCOUNT: &str = "Enter recipient TagPay account number";
pub const INVALID_WALLET_ACCOUNT: &str = "Enter a valid 10-digit TagPay account number";
pub const INVALID_RECIPIENT: &str = "Invalid recipient";
pub const ENTER_AMOUNT: &str = "Enter amount";
pub const INVALID_AMOUNT: &str = "Enter a valid amount";
pub const INSUFFICIENT_BALANCE: &str = "Insufficient balance";

pub const ENTER_BANK_NAME: &str = "Enter bank name to search";
pub const INVALID_BANK: &str = "Invalid bank selection";
pub const NO_BANKS: &str = "No banks found";
pub const INVALID_BANK_ACCOUNT: &str = "Enter a valid 10-digit account number";
pub const UNRESOLVED_ACCOUNT: &str = "Unable to resolve account";

pub const TRANSFER_SUBMITTED: &str = "Transaction submitted and is being processed";

pub const PIN_MENU: &str = "Manage PIN\n1. Set PIN\n2. Change PIN";
pub const INVALID_SELECTION: &str = "Invalid selection";
pub const ENTER_NEW_PIN: &str = "Enter new 4-digit PIN";
pub const ENTER_OLD_PIN: &str = "Enter old PIN";
pub const CONFIRM_PIN: &str = "Confirm new PIN";
pub const PIN_FORMAT: &str = "PIN must be exactly 4 digits";
pub const PIN_MISMATCH: &str = "PIN mismatch. Enter new PIN again";
pub const PIN_SET: &str = "PIN set successfully";
pub const PIN_CHANGED: &str = "PIN changed successfully";
pub const PIN_INVALID: &str = "Invalid PIN";
pub const PIN_INCORRECT: &str = "Incorrect PIN";
pub const PIN_LOCKED: &str = "Your PIN is locked. Try again later";
pub const PIN_NOT_SET: &str = "You have not set a PIN. Dial again and choose Manage PIN";

pub fn main_menu() -> String {
    [
        "Welcome to TagPay",
        "1. Transfer to TagPay",
        "2. Transfer to Bank",
        "3. Check Balance",
        "4. Airtime/Data",
        "5. Manage PIN",
    ]
    .join("\n")
}

pub fn bank_menu(quick_picks: &[Bank]) -> String {
    let mut menu = String::from("Select Bank\n1. Search Bank");
    for (i, bank) in quick_picks.iter().enumerate() {
        menu.push_str(&format!("\n{}. {}", i + 2, bank.name));
    }
    menu
}

pub fn bank_results(page: &BankPage) -> String {
    let mut menu = String::from("Select Bank");
    for (i, bank) in page.banks.iter().enumerate() {
        menu.push_str(&format!("\n{}. {}", i + 1, bank.name));
    }
    if page.has_prev {
        menu.push_str(&format!("\n{PREVIOUS}. Previous"));
    }
    if page.has_next {
        menu.push_str(&format!("\n{NEXT}. Next"));
    }
    menu
}

pub fn balance_confirm(fee: Decimal) -> String {
    format!(
        "You are about to check your balance. A fee of {CURRENCY} {} will be deducted.\nPress 1 to proceed\nPress 2 to cancel",
        display(fee)
    )
}

pub fn balance(balance: Decimal) -> String {
    format!("Hello! Your balance is {CURRENCY} {}", display(balance))
}

pub fn wallet_confirm(amount: Amount, name: &str) -> String {
    format!("Send {CURRENCY} {amount} to {name}\nEnter PIN")
}

pub fn bank_account_prompt(bank: &Bank) -> String {
    format!("Enter recipient account number for {}", bank.name)
}

pub fn daily_limit_reached(remaining: Decimal) -> String {
    format!(
        "Daily transfer limit reached. You can transfer up to {CURRENCY} {} today.",
        display(remaining)
    )
}

pub fn bank_shortfall(quote: &TransferQuote) -> String {
    format!(
        "Insufficient balance. Total: {CURRENCY} {} (Amount: {CURRENCY} {}, Fee: {CURRENCY} {}, VAT: {CURRENCY} {})",
        display(quote.total),
        quote.amount,
        display(quote.fee),
        display(quote.vat)
    )
}

pub fn bank_confirm(quote: &TransferQuote, name: &str) -> String {
    format!(
        "Send {CURRENCY} {} to {name}\nFee: {CURRENCY} {}\nVAT: {CURRENCY} {}\nEnter PIN",
        quote.amount,
        display(quote.fee),
        display(quote.vat)
    )
}

pub fn transfer_failed(message: Option<&str>) -> String {
    match message.map(str::trim).filter(|m| !m.is_empty()) {
        Some(message) => format!("Transfer failed: {message}"),
        None => "Transfer failed".to_string(),
    }
}
