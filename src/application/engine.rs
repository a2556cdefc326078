use super::screens::{self, NEXT, PREVIOUS, Reply};
use super::sessions::SessionManager;
use super::tokenizer::Keystrokes;
use crate::domain::audit::{Destination, FeeStatus, TransferKind, TransferRecord, TransferStatus};
use crate::domain::bank::{Bank, quick_picks};
use crate::domain::fees::{DailyLimit, FeeSchedule, LimitExceeded, TransferQuote};
use crate::domain::ledger::{
    BankTransferRequest, TransferReceipt, WalletTransferPurpose, WalletTransferRequest,
};
use crate::domain::money::Amount;
use crate::domain::phone::Msisdn;
use crate::domain::pin::{Pin, PinCheck};
use crate::domain::ports::{
    AuditLogHandle, BankDirectoryHandle, CredentialVerifierHandle, LedgerHandle,
};
use crate::domain::session::{Profile, Session, Step, WalletRecipient};
use crate::error::{GatewayError, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const ACCOUNT_NUMBER_LENGTH: usize = 10;
pub const BANK_PAGE_SIZE: usize = 4;

/// Money rules applied by the dialog.
#[derive(Debug, Clone)]
pub struct Policy {
    pub fees: FeeSchedule,
    pub daily_limit: DailyLimit,
    pub balance_check_fee: Decimal,
    /// Customer id of the wallet that collects merchant fees.
    pub fee_wallet: String,
    /// Customer id of the wallet that collects VAT.
    pub vat_wallet: String,
    /// Offset of the local calendar day used for the daily ceiling.
    pub day_offset: FixedOffset,
}

impl Policy {
    /// UTC bounds `[from, to)` of the local calendar day containing `now`.
    pub fn day_bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let local_midnight = now
            .with_timezone(&self.day_offset)
            .date_naive()
            .and_time(NaiveTime::MIN);
        let offset = Duration::seconds(i64::from(self.day_offset.local_minus_utc()));
        let from = Utc.from_utc_datetime(&(local_midnight - offset));
        (from, from + Duration::days(1))
    }
}

/// One carrier callback.
#[derive(Debug, Clone, Default)]
pub struct UssdRequest {
    pub phone: String,
    pub text: Option<String>,
    pub carrier_session_id: Option<String>,
}

/// The reply for the carrier plus audit records to write once it is sent.
#[derive(Debug, Clone)]
pub struct Handled {
    pub reply: Reply,
    pub audit: Vec<TransferRecord>,
}

enum Transition {
    Continue(Step, String),
    End(String),
}

/// The USSD state machine.
///
/// Each callback is processed under the subscriber's lock: the session is
/// resumed or created, the step for the last keystroke runs, and the session
/// is either saved at its next step or destroyed with a terminal reply.
pub struct UssdEngine {
    sessions: Arc<SessionManager>,
    ledger: LedgerHandle,
    credentials: CredentialVerifierHandle,
    audit_log: AuditLogHandle,
    banks: BankDirectoryHandle,
    policy: Policy,
}

impl UssdEngine {
    pub fn new(
        sessions: Arc<SessionManager>,
        ledger: LedgerHandle,
        credentials: CredentialVerifierHandle,
        audit_log: AuditLogHandle,
        banks: BankDirectoryHandle,
        policy: Policy,
    ) -> Self {
        Self {
            sessions,
            ledger,
            credentials,
            audit_log,
            banks,
            policy,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Processes one callback. Never fails: any error ends the session with a
    /// generic terminal reply.
    pub async fn handle(&self, request: UssdRequest) -> Handled {
        let phone = match Msisdn::parse(&request.phone) {
            Ok(phone) => phone,
            Err(e) => {
                warn!(error = %e, "Rejected callback");
                return Handled {
                    reply: Reply::end(screens::INVALID_PHONE),
                    audit: Vec::new(),
                };
            }
        };

        let _guard = self.sessions.lock(&phone).await;
        let keys = Keystrokes::parse(request.text.as_deref());
        let mut audit = Vec::new();
        let reply = match self
            .advance(&phone, request.carrier_session_id, keys.current(), &mut audit)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                error!(%phone, error = %e, "Step failed");
                if let Err(e) = self.sessions.end(&phone).await {
                    error!(%phone, error = %e, "Failed to end session after error");
                }
                Reply::end(screens::SYSTEM_ERROR)
            }
        };
        Handled { reply, audit }
    }

    async fn advance(
        &self,
        phone: &Msisdn,
        carrier_session_id: Option<String>,
        input: &str,
        audit: &mut Vec<TransferRecord>,
    ) -> Result<Reply> {
        let mut session = match self.sessions.start(phone, carrier_session_id).await {
            Ok(session) => session,
            Err(GatewayError::CorruptSession { reason, .. }) => {
                warn!(%phone, %reason, "Discarding unreadable session");
                self.sessions.end(phone).await?;
                return Ok(Reply::end(screens::SESSION_EXPIRED));
            }
            Err(e) => return Err(e),
        };

        let step = std::mem::replace(&mut session.step, Step::Start);
        let from = step.name();
        let transition = self.dispatch(&mut session, step, input, audit).await?;

        match transition {
            Transition::Continue(next, text) => {
                debug!(%phone, from, to = next.name(), "Step advanced");
                session.step = next;
                self.sessions.update(session).await?;
                Ok(Reply::con(text))
            }
            Transition::End(text) => {
                debug!(%phone, from, "Dialog finished");
                self.sessions.end(phone).await?;
                Ok(Reply::end(text))
            }
        }
    }

    async fn dispatch(
        &self,
        session: &mut Session,
        step: Step,
        input: &str,
        audit: &mut Vec<TransferRecord>,
    ) -> Result<Transition> {
        let profile = match session.profile.clone() {
            Some(profile) => profile,
            None if matches!(step, Step::Start) => return self.start(session).await,
            None => {
                warn!(phone = %session.phone, step = step.name(), "Session has no customer profile");
                return Ok(Transition::End(screens::SESSION_EXPIRED.to_string()));
            }
        };

        match step {
            Step::Start => self.start(session).await,
            Step::MainMenu => Ok(self.main_menu(input)),
            Step::BalanceConfirm => self.balance_confirm(session, &profile, input, audit).await,

            Step::TagpayAccount => self.wallet_account(&profile, input).await,
            Step::TagpayAmount { recipient } => Ok(Self::wallet_amount(&profile, recipient, input)),
            Step::TagpayPin { recipient, amount } => {
                self.wallet_pin(session, &profile, recipient, amount, input, audit)
                    .await
            }

            Step::BankMenu => Ok(Self::bank_menu(input)),
            Step::BankSearch => Ok(self.bank_search(input)),
            Step::BankSearchSelect {
                query,
                page,
                has_next,
                results,
            } => Ok(self.bank_search_select(query, page, has_next, results, input)),
            Step::BankAccount { bank } => Ok(Self::bank_account(bank, input)),
            Step::BankAmount {
                bank,
                account_number,
            } => self.bank_amount(&profile, bank, account_number, input).await,
            Step::BankPin {
                bank,
                account_number,
                account_name,
                quote,
            } => {
                self.bank_pin(
                    session,
                    &profile,
                    (bank, account_number, account_name),
                    quote,
                    input,
                    audit,
                )
                .await
            }

            Step::ManagePinMenu => Ok(Self::manage_pin_menu(input)),
            Step::SetPin => Ok(Self::new_pin(input, Step::SetPin, |first| {
                Step::SetPinConfirm { first }
            })),
            Step::SetPinConfirm { first } => {
                self.confirm_pin(&session.phone, first, input, false).await
            }
            Step::ChangePinOld => self.change_pin_old(&session.phone, input).await,
            Step::ChangePinNew => Ok(Self::new_pin(input, Step::ChangePinNew, |first| {
                Step::ChangePinConfirm { first }
            })),
            Step::ChangePinConfirm { first } => {
                self.confirm_pin(&session.phone, first, input, true).await
            }
        }
    }

    async fn start(&self, session: &mut Session) -> Result<Transition> {
        let Some(customer) = self.ledger.resolve_customer(&session.phone).await? else {
            info!(phone = %session.phone, "Unregistered subscriber");
            return Ok(Transition::End(screens::NOT_REGISTERED.to_string()));
        };
        let balance = self.ledger.balance(&customer.customer_id).await?;
        session.profile = Some(Profile {
            customer_id: customer.customer_id,
            balance,
        });
        Ok(Transition::Continue(Step::MainMenu, screens::main_menu()))
    }

    fn main_menu(&self, input: &str) -> Transition {
        match input {
            "1" => Transition::Continue(
                Step::TagpayAccount,
                screens::ENTER_WALLET_ACCOUNT.to_string(),
            ),
            "2" => Transition::Continue(Step::BankMenu, screens::bank_menu(&quick_picks())),
            "3" => Transition::Continue(
                Step::BalanceConfirm,
                screens::balance_confirm(self.policy.balance_check_fee),
            ),
            "4" => Transition::End(screens::AIRTIME_UNAVAILABLE.to_string()),
            "5" => Transition::Continue(Step::ManagePinMenu, screens::PIN_MENU.to_string()),
            _ => Transition::End(screens::INVALID_OPTION.to_string()),
        }
    }

    async fn balance_confirm(
        &self,
        session: &Session,
        profile: &Profile,
        input: &str,
        audit: &mut Vec<TransferRecord>,
    ) -> Result<Transition> {
        match input {
            "1" => {}
            "2" => return Ok(Transition::End(screens::BALANCE_CANCELLED.to_string())),
            _ => {
                return Ok(Transition::Continue(
                    Step::BalanceConfirm,
                    screens::BALANCE_REPROMPT.to_string(),
                ));
            }
        }

        let fee = self.policy.balance_check_fee;
        let Ok(charge) = Amount::new(fee) else {
            return Ok(Transition::End(screens::balance(profile.balance)));
        };
        if profile.balance < fee {
            return Ok(Transition::End(screens::BALANCE_INSUFFICIENT.to_string()));
        }

        let receipt = self
            .wallet_transfer(WalletTransferRequest {
                from_customer_id: profile.customer_id.clone(),
                to_customer_id: self.policy.fee_wallet.clone(),
                amount: charge,
                purpose: WalletTransferPurpose::Fee,
                reference: session.reference.clone(),
            })
            .await;
        let fee_status = if receipt.accepted {
            FeeStatus::Success
        } else {
            FeeStatus::Failed
        };
        let mut record = self.record(
            session,
            profile,
            TransferKind::BalanceCheckFee,
            (Decimal::ZERO, fee, Decimal::ZERO),
            Destination::FeeWallet {
                customer_id: self.policy.fee_wallet.clone(),
            },
            &receipt,
        );
        record.merchant_fee_status = fee_status;
        audit.push(record);

        if receipt.accepted {
            Ok(Transition::End(screens::balance(profile.balance - fee)))
        } else {
            Ok(Transition::End(screens::BALANCE_FEE_FAILED.to_string()))
        }
    }

    async fn wallet_account(&self, profile: &Profile, input: &str) -> Result<Transition> {
        if !is_account_number(input) {
            return Ok(Transition::Continue(
                Step::TagpayAccount,
                screens::INVALID_WALLET_ACCOUNT.to_string(),
            ));
        }
        match self.ledger.resolve_wallet(input).await? {
            Some(wallet) if wallet.customer_id != profile.customer_id => Ok(Transition::Continue(
                Step::TagpayAmount {
                    recipient: WalletRecipient {
                        customer_id: wallet.customer_id,
                        account_number: wallet.account_number,
                        account_name: wallet.account_name,
                    },
                },
                screens::ENTER_AMOUNT.to_string(),
            )),
            _ => Ok(Transition::End(screens::INVALID_RECIPIENT.to_string())),
        }
    }

    fn wallet_amount(profile: &Profile, recipient: WalletRecipient, input: &str) -> Transition {
        let Ok(amount) = Amount::parse(input) else {
            return Transition::Continue(
                Step::TagpayAmount { recipient },
                screens::INVALID_AMOUNT.to_string(),
            );
        };
        if amount.value() > profile.balance {
            return Transition::End(screens::INSUFFICIENT_BALANCE.to_string());
        }
        let text = screens::wallet_confirm(amount, &recipient.account_name);
        Transition::Continue(Step::TagpayPin { recipient, amount }, text)
    }

    async fn wallet_pin(
        &self,
        session: &Session,
        profile: &Profile,
        recipient: WalletRecipient,
        amount: Amount,
        input: &str,
        audit: &mut Vec<TransferRecord>,
    ) -> Result<Transition> {
        let Ok(pin) = Pin::parse(input) else {
            return Ok(Transition::Continue(
                Step::TagpayPin { recipient, amount },
                screens::PIN_FORMAT.to_string(),
            ));
        };
        if let Some(text) = self.refuse_pin(&session.phone, &pin, screens::PIN_INVALID).await? {
            return Ok(Transition::End(text));
        }

        let receipt = self
            .wallet_transfer(WalletTransferRequest {
                from_customer_id: profile.customer_id.clone(),
                to_customer_id: recipient.customer_id.clone(),
                amount,
                purpose: WalletTransferPurpose::Transfer,
                reference: session.reference.clone(),
            })
            .await;
        audit.push(self.record(
            session,
            profile,
            TransferKind::WalletTransfer,
            (amount.value(), Decimal::ZERO, Decimal::ZERO),
            Destination::Wallet {
                customer_id: recipient.customer_id,
                account_number: recipient.account_number,
                account_name: recipient.account_name,
            },
            &receipt,
        ));
        Ok(Transition::End(Self::outcome_text(&receipt)))
    }

    fn bank_menu(input: &str) -> Transition {
        if input == "1" {
            return Transition::Continue(Step::BankSearch, screens::ENTER_BANK_NAME.to_string());
        }
        let picks = quick_picks();
        let bank = input
            .parse::<usize>()
            .ok()
            .and_then(|choice| choice.checked_sub(2))
            .and_then(|index| picks.get(index).cloned());
        match bank {
            Some(bank) => {
                let text = screens::bank_account_prompt(&bank);
                Transition::Continue(Step::BankAccount { bank }, text)
            }
            None => Transition::End(screens::INVALID_BANK.to_string()),
        }
    }

    fn bank_search(&self, input: &str) -> Transition {
        self.render_bank_page(input.trim().to_string(), 0)
    }

    fn bank_search_select(
        &self,
        query: String,
        page: usize,
        has_next: bool,
        results: Vec<Bank>,
        input: &str,
    ) -> Transition {
        match input {
            PREVIOUS => self.render_bank_page(query, page.saturating_sub(1)),
            NEXT => self.render_bank_page(query, if has_next { page + 1 } else { page }),
            _ => {
                let bank = input
                    .parse::<usize>()
                    .ok()
                    .and_then(|choice| choice.checked_sub(1))
                    .and_then(|index| results.get(index).cloned());
                match bank {
                    Some(bank) => {
                        let text = screens::bank_account_prompt(&bank);
                        Transition::Continue(Step::BankAccount { bank }, text)
                    }
                    None => Transition::End(screens::INVALID_BANK.to_string()),
                }
            }
        }
    }

    fn render_bank_page(&self, query: String, page: usize) -> Transition {
        let found = self.banks.search(&query, page, BANK_PAGE_SIZE);
        if found.is_empty() {
            return Transition::End(screens::NO_BANKS.to_string());
        }
        let text = screens::bank_results(&found);
        Transition::Continue(
            Step::BankSearchSelect {
                query,
                page: found.page,
                has_next: found.has_next,
                results: found.banks,
            },
            text,
        )
    }

    fn bank_account(bank: Bank, input: &str) -> Transition {
        if !is_account_number(input) {
            return Transition::Continue(
                Step::BankAccount { bank },
                screens::INVALID_BANK_ACCOUNT.to_string(),
            );
        }
        Transition::Continue(
            Step::BankAmount {
                bank,
                account_number: input.to_string(),
            },
            screens::ENTER_AMOUNT.to_string(),
        )
    }

    async fn bank_amount(
        &self,
        profile: &Profile,
        bank: Bank,
        account_number: String,
        input: &str,
    ) -> Result<Transition> {
        let Ok(amount) = Amount::parse(input) else {
            return Ok(Transition::Continue(
                Step::BankAmount {
                    bank,
                    account_number,
                },
                screens::INVALID_AMOUNT.to_string(),
            ));
        };

        let (from, to) = self.policy.day_bounds(Utc::now());
        let spent_today = self
            .audit_log
            .daily_total(&profile.customer_id, from, to)
            .await?;
        if let Err(LimitExceeded { remaining }) = self.policy.daily_limit.check(spent_today, amount)
        {
            info!(customer_id = %profile.customer_id, %spent_today, %amount, "Daily limit reached");
            return Ok(Transition::End(screens::daily_limit_reached(remaining)));
        }

        let quote = self.policy.fees.quote(amount);
        if !quote.affordable_with(profile.balance) {
            return Ok(Transition::End(screens::bank_shortfall(&quote)));
        }

        let account_name = match self
            .ledger
            .resolve_account_name(&bank.code, &account_number)
            .await
        {
            Ok(Some(name)) => name,
            Ok(None) => return Ok(Transition::End(screens::UNRESOLVED_ACCOUNT.to_string())),
            Err(e) => {
                warn!(bank = %bank.code, error = %e, "Name enquiry failed");
                return Ok(Transition::End(screens::UNRESOLVED_ACCOUNT.to_string()));
            }
        };

        let text = screens::bank_confirm(&quote, &account_name);
        Ok(Transition::Continue(
            Step::BankPin {
                bank,
                account_number,
                account_name,
                quote,
            },
            text,
        ))
    }

    async fn bank_pin(
        &self,
        session: &Session,
        profile: &Profile,
        (bank, account_number, account_name): (Bank, String, String),
        quote: TransferQuote,
        input: &str,
        audit: &mut Vec<TransferRecord>,
    ) -> Result<Transition> {
        let Ok(pin) = Pin::parse(input) else {
            return Ok(Transition::Continue(
                Step::BankPin {
                    bank,
                    account_number,
                    account_name,
                    quote,
                },
                screens::PIN_FORMAT.to_string(),
            ));
        };
        if let Some(text) = self.refuse_pin(&session.phone, &pin, screens::PIN_INVALID).await? {
            return Ok(Transition::End(text));
        }

        let request = BankTransferRequest {
            customer_id: profile.customer_id.clone(),
            bank_code: bank.code.clone(),
            account_number: account_number.clone(),
            account_name: account_name.clone(),
            amount: quote.amount,
            narration: format!("USSD Transfer to {account_name}"),
            reference: session.reference.clone(),
        };
        let receipt = match self.ledger.submit_bank_transfer(&request).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(reference = %request.reference, error = %e, "Bank transfer call failed");
                TransferReceipt::rejected(e.user_message())
            }
        };
        info!(
            reference = %request.reference,
            accepted = receipt.accepted,
            amount = %quote.amount,
            "Bank transfer submitted"
        );

        let (merchant_fee_status, vat_fee_status) = if receipt.accepted {
            self.post_fee_split(session, profile, &quote).await
        } else {
            (FeeStatus::NotApplicable, FeeStatus::NotApplicable)
        };

        let mut record = self.record(
            session,
            profile,
            TransferKind::BankTransfer,
            (quote.amount.value(), quote.fee, quote.vat),
            Destination::Bank {
                bank_code: bank.code,
                account_number,
                account_name,
            },
            &receipt,
        );
        record.merchant_fee_status = merchant_fee_status;
        record.vat_fee_status = vat_fee_status;
        audit.push(record);

        Ok(Transition::End(Self::outcome_text(&receipt)))
    }

    /// Moves the merchant fee and VAT off the customer's wallet after a
    /// successful bank transfer. Failures are recorded, never surfaced.
    async fn post_fee_split(
        &self,
        session: &Session,
        profile: &Profile,
        quote: &TransferQuote,
    ) -> (FeeStatus, FeeStatus) {
        let merchant = self
            .post_fee(
                profile,
                &self.policy.fee_wallet,
                quote.fee,
                format!("{}-fee", session.reference),
            )
            .await;
        let vat = self
            .post_fee(
                profile,
                &self.policy.vat_wallet,
                quote.vat,
                format!("{}-vat", session.reference),
            )
            .await;
        (merchant, vat)
    }

    async fn post_fee(
        &self,
        profile: &Profile,
        to_customer_id: &str,
        fee: Decimal,
        reference: String,
    ) -> FeeStatus {
        let Ok(amount) = Amount::new(fee) else {
            return FeeStatus::NotApplicable;
        };
        let receipt = self
            .wallet_transfer(WalletTransferRequest {
                from_customer_id: profile.customer_id.clone(),
                to_customer_id: to_customer_id.to_string(),
                amount,
                purpose: WalletTransferPurpose::Fee,
                reference,
            })
            .await;
        if receipt.accepted {
            FeeStatus::Success
        } else {
            FeeStatus::Failed
        }
    }

    fn manage_pin_menu(input: &str) -> Transition {
        match input {
            "1" => Transition::Continue(Step::SetPin, screens::ENTER_NEW_PIN.to_string()),
            "2" => Transition::Continue(Step::ChangePinOld, screens::ENTER_OLD_PIN.to_string()),
            _ => Transition::End(screens::INVALID_SELECTION.to_string()),
        }
    }

    /// First entry of a new PIN; a malformed entry stays on `entry`.
    fn new_pin(input: &str, entry: Step, confirm: impl FnOnce(Pin) -> Step) -> Transition {
        match Pin::parse(input) {
            Ok(first) => Transition::Continue(confirm(first), screens::CONFIRM_PIN.to_string()),
            Err(_) => Transition::Continue(entry, screens::PIN_FORMAT.to_string()),
        }
    }

    async fn confirm_pin(
        &self,
        phone: &Msisdn,
        first: Pin,
        input: &str,
        changing: bool,
    ) -> Result<Transition> {
        let entry_step = if changing {
            Step::ChangePinNew
        } else {
            Step::SetPin
        };
        match Pin::parse(input) {
            Ok(second) if second == first => {
                if changing {
                    self.credentials.change(phone, &first).await?;
                    Ok(Transition::End(screens::PIN_CHANGED.to_string()))
                } else {
                    self.credentials.set(phone, &first).await?;
                    Ok(Transition::End(screens::PIN_SET.to_string()))
                }
            }
            _ => Ok(Transition::Continue(
                entry_step,
                screens::PIN_MISMATCH.to_string(),
            )),
        }
    }

    async fn change_pin_old(&self, phone: &Msisdn, input: &str) -> Result<Transition> {
        let Ok(pin) = Pin::parse(input) else {
            return Ok(Transition::Continue(
                Step::ChangePinOld,
                screens::PIN_FORMAT.to_string(),
            ));
        };
        if let Some(text) = self.refuse_pin(phone, &pin, screens::PIN_INCORRECT).await? {
            return Ok(Transition::End(text));
        }
        Ok(Transition::Continue(
            Step::ChangePinNew,
            screens::ENTER_NEW_PIN.to_string(),
        ))
    }

    /// Returns the terminal text when `pin` does not unlock the account.
    async fn refuse_pin(&self, phone: &Msisdn, pin: &Pin, wrong: &str) -> Result<Option<String>> {
        let text = match self.credentials.verify(phone, pin).await? {
            PinCheck::Valid => return Ok(None),
            PinCheck::Invalid => wrong,
            PinCheck::Locked => screens::PIN_LOCKED,
            PinCheck::NotSet => screens::PIN_NOT_SET,
        };
        info!(%phone, "PIN rejected");
        Ok(Some(text.to_string()))
    }

    async fn wallet_transfer(&self, request: WalletTransferRequest) -> TransferReceipt {
        match self.ledger.submit_wallet_transfer(&request).await {
            Ok(receipt) => {
                info!(
                    reference = %request.reference,
                    accepted = receipt.accepted,
                    amount = %request.amount,
                    "Wallet transfer submitted"
                );
                receipt
            }
            Err(e) => {
                warn!(reference = %request.reference, error = %e, "Wallet transfer call failed");
                TransferReceipt::rejected(e.user_message())
            }
        }
    }

    fn outcome_text(receipt: &TransferReceipt) -> String {
        if receipt.accepted {
            screens::TRANSFER_SUBMITTED.to_string()
        } else {
            screens::transfer_failed(receipt.message.as_deref())
        }
    }

    fn record(
        &self,
        session: &Session,
        profile: &Profile,
        kind: TransferKind,
        (amount, fee, vat): (Decimal, Decimal, Decimal),
        destination: Destination,
        receipt: &TransferReceipt,
    ) -> TransferRecord {
        let now = Utc::now();
        TransferRecord {
            reference: session.reference.clone(),
            kind,
            carrier_session_id: session.carrier_session_id.clone(),
            customer_id: profile.customer_id.clone(),
            phone: session.phone.clone(),
            amount,
            fee,
            vat,
            total: amount + fee + vat,
            destination,
            transaction_reference: receipt.reference.clone(),
            status: if receipt.accepted {
                TransferStatus::Submitted
            } else {
                TransferStatus::Failed
            },
            message: receipt.message.clone(),
            raw_response: receipt.raw.clone(),
            merchant_fee_status: FeeStatus::NotApplicable,
            vat_fee_status: FeeStatus::NotApplicable,
            webhook_received: false,
            created_at: now,
            updated_at: now,
        }
    }
}

fn is_account_number(input: &str) -> bool {
    input.len() == ACCOUNT_NUMBER_LENGTH && input.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::credentials::PinVault;
    use crate::domain::audit::fixtures::bank_record;
    use crate::domain::ports::{AuditLog, CredentialVerifier};
    use crate::infrastructure::bank_directory::StaticBankDirectory;
    use crate::infrastructure::in_memory::{
        InMemoryAuditLog, InMemoryLedger, InMemoryPinStore, InMemorySessionStore,
    };
    use rust_decimal_macros::dec;

    const PHONE: &str = "08031234567";
    const CUSTOMER: &str = "CUST-1";

    struct Harness {
        engine: UssdEngine,
        ledger: InMemoryLedger,
        audit_log: InMemoryAuditLog,
        sessions: InMemorySessionStore,
        vault: Arc<PinVault>,
    }

    impl Harness {
        async fn new(balance: Decimal) -> Self {
            let ledger = InMemoryLedger::new();
            ledger
                .add_customer(&phone(), CUSTOMER, "1000000001", "TOLU ADE", balance)
                .await;
            ledger
                .add_customer(
                    &Msisdn::parse("08039999999").unwrap(),
                    "CUST-2",
                    "1000000002",
                    "BOLA AJAYI",
                    dec!(0),
                )
                .await;
            ledger.add_bank_account("044", "0123456789", "ADA OBI").await;

            let sessions = InMemorySessionStore::new();
            let audit_log = InMemoryAuditLog::new();
            let vault = Arc::new(PinVault::new(
                Arc::new(InMemoryPinStore::new()),
                3,
                Duration::minutes(30),
            ));
            let engine = UssdEngine::new(
                Arc::new(SessionManager::new(
                    Arc::new(sessions.clone()),
                    Duration::minutes(3),
                )),
                Arc::new(ledger.clone()),
                vault.clone(),
                Arc::new(audit_log.clone()),
                Arc::new(StaticBankDirectory::built_in()),
                policy(),
            );
            Self {
                engine,
                ledger,
                audit_log,
                sessions,
                vault,
            }
        }

        async fn dial(&self, text: &str) -> Handled {
            self.engine
                .handle(UssdRequest {
                    phone: PHONE.to_string(),
                    text: Some(text.to_string()),
                    carrier_session_id: Some("ATX-1".to_string()),
                })
                .await
        }

        async fn reply(&self, text: &str) -> String {
            self.dial(text).await.reply.to_string()
        }

        async fn set_pin(&self, pin: &str) {
            self.vault
                .set(&phone(), &Pin::parse(pin).unwrap())
                .await
                .unwrap();
        }

        async fn step(&self) -> Option<&'static str> {
            self.engine
                .sessions()
                .get(&phone())
                .await
                .unwrap()
                .map(|session| session.step.name())
        }
    }

    fn phone() -> Msisdn {
        Msisdn::parse(PHONE).unwrap()
    }

    fn policy() -> Policy {
        Policy {
            fees: FeeSchedule::default(),
            daily_limit: DailyLimit::new(dec!(100000)),
            balance_check_fee: dec!(10),
            fee_wallet: "FEE-WALLET".to_string(),
            vat_wallet: "VAT-WALLET".to_string(),
            day_offset: FixedOffset::east_opt(3600).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_unregistered_subscriber_leaves_no_session() {
        let harness = Harness::new(dec!(0)).await;
        let reply = harness
            .engine
            .handle(UssdRequest {
                phone: "08020000000".to_string(),
                text: Some(String::new()),
                carrier_session_id: None,
            })
            .await
            .reply;

        assert_eq!(reply.to_string(), "END You are not registered on TagPay");
        assert_eq!(harness.sessions.len().await, 0);
    }

    #[tokio::test]
    async fn test_empty_phone_is_rejected() {
        let harness = Harness::new(dec!(0)).await;
        let reply = harness.engine.handle(UssdRequest::default()).await.reply;
        assert_eq!(reply.to_string(), "END Invalid phone number");
    }

    #[tokio::test]
    async fn test_first_callback_shows_main_menu() {
        let harness = Harness::new(dec!(5000)).await;
        let reply = harness.reply("").await;
        assert_eq!(reply, format!("CON {}", screens::main_menu()));
        assert_eq!(harness.step().await, Some("main-menu"));
    }

    #[tokio::test]
    async fn test_invalid_menu_option_ends_and_next_dial_starts_over() {
        let harness = Harness::new(dec!(5000)).await;
        harness.dial("").await;
        assert_eq!(harness.reply("7").await, "END Invalid option");
        assert_eq!(harness.step().await, None);

        // Same carrier dialog retried: a fresh session at the start step.
        assert!(harness.reply("7").await.starts_with("CON Welcome to TagPay"));
    }

    #[tokio::test]
    async fn test_bank_transfer_confirmation_and_fee_split() {
        let harness = Harness::new(dec!(5000)).await;
        harness.set_pin("1234").await;
        harness.dial("").await;
        harness.dial("2").await;
        assert_eq!(
            harness.reply("2*2").await,
            "CON Enter recipient account number for Access Bank"
        );
        assert_eq!(harness.reply("2*2*0123456789").await, "CON Enter amount");
        assert_eq!(
            harness.reply("2*2*0123456789*3000").await,
            "CON Send NGN 3000 to ADA OBI\nFee: NGN 10\nVAT: NGN 0.75\nEnter PIN"
        );

        let handled = harness.dial("2*2*0123456789*3000*1234").await;
        assert_eq!(
            handled.reply.to_string(),
            "END Transaction submitted and is being processed"
        );
        assert_eq!(harness.step().await, None);

        let session_reference = handled.audit[0].reference.clone();
        let transfers = harness.ledger.bank_transfers().await;
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].reference, session_reference);
        assert_eq!(transfers[0].bank_code, "044");
        assert_eq!(transfers[0].narration, "USSD Transfer to ADA OBI");

        let fees = harness.ledger.wallet_transfers().await;
        assert_eq!(fees.len(), 2);
        assert_eq!(fees[0].reference, format!("{session_reference}-fee"));
        assert_eq!(fees[0].to_customer_id, "FEE-WALLET");
        assert_eq!(fees[0].amount.value(), dec!(10));
        assert_eq!(fees[1].reference, format!("{session_reference}-vat"));
        assert_eq!(fees[1].to_customer_id, "VAT-WALLET");
        assert_eq!(fees[1].amount.value(), dec!(0.75));
        assert_eq!(harness.ledger.balance_of(CUSTOMER).await, dec!(1989.25));

        let record = &handled.audit[0];
        assert_eq!(record.kind, TransferKind::BankTransfer);
        assert_eq!(record.status, TransferStatus::Submitted);
        assert_eq!(record.total, dec!(3010.75));
        assert_eq!(record.merchant_fee_status, FeeStatus::Success);
        assert_eq!(record.vat_fee_status, FeeStatus::Success);
        assert_eq!(record.carrier_session_id.as_deref(), Some("ATX-1"));
    }

    #[tokio::test]
    async fn test_bank_transfer_shortfall_itemizes_total() {
        let harness = Harness::new(dec!(3000)).await;
        harness.dial("").await;
        harness.dial("2").await;
        harness.dial("2*2").await;
        harness.dial("2*2*0123456789").await;
        assert_eq!(
            harness.reply("2*2*0123456789*3000").await,
            "END Insufficient balance. Total: NGN 3010.75 (Amount: NGN 3000, Fee: NGN 10, VAT: NGN 0.75)"
        );
        assert!(harness.ledger.bank_transfers().await.is_empty());
    }

    #[tokio::test]
    async fn test_daily_limit_reports_exact_headroom() {
        let harness = Harness::new(dec!(50000)).await;
        harness
            .audit_log
            .record(bank_record("earlier", CUSTOMER, dec!(98000)))
            .await
            .unwrap();
        harness.dial("").await;
        harness.dial("2").await;
        harness.dial("2*2").await;
        harness.dial("2*2*0123456789").await;
        assert_eq!(
            harness.reply("2*2*0123456789*5000").await,
            "END Daily transfer limit reached. You can transfer up to NGN 2000 today."
        );
        assert!(harness.ledger.bank_transfers().await.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_amount_reprompts_after_earlier_transfer() {
        let harness = Harness::new(dec!(50000)).await;
        harness
            .audit_log
            .record(bank_record("earlier", CUSTOMER, dec!(1000)))
            .await
            .unwrap();
        harness.dial("").await;
        harness.dial("2").await;
        harness.dial("2*2").await;
        harness.dial("2*2*0123456789").await;
        assert_eq!(
            harness.reply("2*2*0123456789*79228162514264337593543950335").await,
            "CON Enter a valid amount"
        );
        assert_eq!(harness.step().await, Some("bank-amount"));
        assert!(harness.ledger.bank_transfers().await.is_empty());
    }

    #[tokio::test]
    async fn test_field_errors_reprompt_without_advancing() {
        let harness = Harness::new(dec!(5000)).await;
        harness.dial("").await;
        harness.dial("2").await;
        harness.dial("2*2").await;
        assert_eq!(
            harness.reply("2*2*12345").await,
            "CON Enter a valid 10-digit account number"
        );
        assert_eq!(harness.step().await, Some("bank-account"));
        harness.dial("2*2*12345*0123456789").await;
        assert_eq!(
            harness.reply("2*2*12345*0123456789*abc").await,
            "CON Enter a valid amount"
        );
        assert_eq!(harness.step().await, Some("bank-amount"));
    }

    #[tokio::test]
    async fn test_bank_search_pagination_is_bounded() {
        let harness = Harness::new(dec!(5000)).await;
        harness.dial("").await;
        harness.dial("2").await;
        assert_eq!(harness.reply("2*1").await, "CON Enter bank name to search");

        let first = harness.reply("2*1*bank").await;
        assert!(first.starts_with("CON Select Bank\n1. ACCESS BANK"));
        assert!(first.ends_with("99. Next"));
        assert!(!first.contains("98. Previous"));

        // Previous from the first page stays on it.
        assert_eq!(harness.reply("2*1*bank*98").await, first);

        let second = harness.reply("2*1*bank*98*99").await;
        assert!(second.contains("1. FIRST BANK OF NIGERIA"));
        assert!(second.contains("98. Previous"));

        assert_eq!(
            harness.reply("2*1*bank*98*99*1").await,
            "CON Enter recipient account number for FIRST BANK OF NIGERIA"
        );
    }

    #[tokio::test]
    async fn test_bank_search_without_match_ends() {
        let harness = Harness::new(dec!(5000)).await;
        harness.dial("").await;
        harness.dial("2").await;
        harness.dial("2*1").await;
        assert_eq!(harness.reply("2*1*nowhere").await, "END No banks found");
    }

    #[tokio::test]
    async fn test_wrong_pin_blocks_transfer() {
        let harness = Harness::new(dec!(5000)).await;
        harness.set_pin("1234").await;
        harness.dial("").await;
        harness.dial("1").await;
        harness.dial("1*1000000002").await;
        assert_eq!(
            harness.reply("1*1000000002*500").await,
            "CON Send NGN 500 to BOLA AJAYI\nEnter PIN"
        );
        let handled = harness.dial("1*1000000002*500*9999").await;
        assert_eq!(handled.reply.to_string(), "END Invalid PIN");
        assert!(handled.audit.is_empty());
        assert!(harness.ledger.wallet_transfers().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_pin_is_reported() {
        let harness = Harness::new(dec!(5000)).await;
        harness.dial("").await;
        harness.dial("1").await;
        harness.dial("1*1000000002").await;
        harness.dial("1*1000000002*500").await;
        assert_eq!(
            harness.reply("1*1000000002*500*1234").await,
            "END You have not set a PIN. Dial again and choose Manage PIN"
        );
    }

    #[tokio::test]
    async fn test_wallet_transfer_moves_funds() {
        let harness = Harness::new(dec!(5000)).await;
        harness.set_pin("1234").await;
        harness.dial("").await;
        harness.dial("1").await;
        harness.dial("1*1000000002").await;
        harness.dial("1*1000000002*500").await;
        let handled = harness.dial("1*1000000002*500*1234").await;

        assert_eq!(
            handled.reply.to_string(),
            "END Transaction submitted and is being processed"
        );
        assert_eq!(handled.audit[0].kind, TransferKind::WalletTransfer);
        assert_eq!(harness.ledger.balance_of("CUST-2").await, dec!(500));
        assert_eq!(harness.ledger.balance_of(CUSTOMER).await, dec!(4500));
    }

    #[tokio::test]
    async fn test_wallet_transfer_to_self_is_refused() {
        let harness = Harness::new(dec!(5000)).await;
        harness.dial("").await;
        harness.dial("1").await;
        assert_eq!(harness.reply("1*1000000001").await, "END Invalid recipient");
    }

    #[tokio::test]
    async fn test_wallet_amount_above_balance() {
        let harness = Harness::new(dec!(100)).await;
        harness.dial("").await;
        harness.dial("1").await;
        harness.dial("1*1000000002").await;
        assert_eq!(harness.reply("1*1000000002*500").await, "END Insufficient balance");
    }

    #[tokio::test]
    async fn test_rejected_transfer_reports_ledger_message() {
        let harness = Harness::new(dec!(5000)).await;
        harness.set_pin("1234").await;
        harness
            .ledger
            .reject_transfers(Some("Beneficiary bank unavailable"))
            .await;
        harness.dial("").await;
        harness.dial("2").await;
        harness.dial("2*2").await;
        harness.dial("2*2*0123456789").await;
        harness.dial("2*2*0123456789*3000").await;
        let handled = harness.dial("2*2*0123456789*3000*1234").await;

        assert_eq!(
            handled.reply.to_string(),
            "END Transfer failed: Beneficiary bank unavailable"
        );
        let record = &handled.audit[0];
        assert_eq!(record.status, TransferStatus::Failed);
        assert_eq!(record.merchant_fee_status, FeeStatus::NotApplicable);
        assert!(harness.ledger.wallet_transfers().await.is_empty());
    }

    #[tokio::test]
    async fn test_balance_check_charges_fee() {
        let harness = Harness::new(dec!(5000)).await;
        harness.dial("").await;
        assert_eq!(
            harness.reply("3").await,
            "CON You are about to check your balance. A fee of NGN 10 will be deducted.\nPress 1 to proceed\nPress 2 to cancel"
        );
        assert_eq!(
            harness.reply("3*5").await,
            "CON Invalid choice. Press 1 to proceed or 2 to cancel."
        );
        let handled = harness.dial("3*5*1").await;
        assert_eq!(
            handled.reply.to_string(),
            "END Hello! Your balance is NGN 4990"
        );
        assert_eq!(handled.audit[0].kind, TransferKind::BalanceCheckFee);
        assert_eq!(handled.audit[0].merchant_fee_status, FeeStatus::Success);
        assert_eq!(harness.ledger.balance_of("FEE-WALLET").await, dec!(10));
    }

    #[tokio::test]
    async fn test_balance_check_cancel_and_insufficient() {
        let harness = Harness::new(dec!(5)).await;
        harness.dial("").await;
        harness.dial("3").await;
        assert_eq!(
            harness.reply("3*1").await,
            "END Insufficient funds to check balance"
        );

        harness.dial("").await;
        harness.dial("3").await;
        assert_eq!(harness.reply("3*2").await, "END Balance check cancelled.");
    }

    #[tokio::test]
    async fn test_set_pin_requires_matching_confirmation() {
        let harness = Harness::new(dec!(5000)).await;
        harness.dial("").await;
        assert_eq!(
            harness.reply("5").await,
            "CON Manage PIN\n1. Set PIN\n2. Change PIN"
        );
        assert_eq!(harness.reply("5*1").await, "CON Enter new 4-digit PIN");
        assert_eq!(harness.reply("5*1*1234").await, "CON Confirm new PIN");
        assert_eq!(
            harness.reply("5*1*1234*4321").await,
            "CON PIN mismatch. Enter new PIN again"
        );
        assert_eq!(harness.step().await, Some("set-pin"));
        assert_eq!(
            harness.vault.verify(&phone(), &Pin::parse("1234").unwrap()).await.unwrap(),
            PinCheck::NotSet
        );

        harness.dial("5*1*1234*4321*1234").await;
        assert_eq!(
            harness.reply("5*1*1234*4321*1234*1234").await,
            "END PIN set successfully"
        );
        assert_eq!(
            harness.vault.verify(&phone(), &Pin::parse("1234").unwrap()).await.unwrap(),
            PinCheck::Valid
        );
    }

    #[tokio::test]
    async fn test_change_pin_checks_old_pin() {
        let harness = Harness::new(dec!(5000)).await;
        harness.set_pin("1234").await;
        harness.dial("").await;
        harness.dial("5").await;
        assert_eq!(harness.reply("5*2").await, "CON Enter old PIN");
        assert_eq!(harness.reply("5*2*0000").await, "END Incorrect PIN");

        harness.dial("").await;
        harness.dial("5").await;
        harness.dial("5*2").await;
        assert_eq!(harness.reply("5*2*1234").await, "CON Enter new 4-digit PIN");
        harness.dial("5*2*1234*5678").await;
        assert_eq!(
            harness.reply("5*2*1234*5678*5678").await,
            "END PIN changed successfully"
        );
        assert_eq!(
            harness.vault.verify(&phone(), &Pin::parse("5678").unwrap()).await.unwrap(),
            PinCheck::Valid
        );
    }

    #[tokio::test]
    async fn test_airtime_is_not_available() {
        let harness = Harness::new(dec!(5000)).await;
        harness.dial("").await;
        assert_eq!(
            harness.reply("4").await,
            "END Airtime/Data purchase is coming soon"
        );
    }

    #[tokio::test]
    async fn test_ledger_outage_at_start_is_a_system_error() {
        let harness = Harness::new(dec!(5000)).await;
        harness.ledger.set_unavailable(true).await;
        assert_eq!(
            harness.reply("").await,
            "END System error. Please try again later."
        );
        assert_eq!(harness.sessions.len().await, 0);
    }

    #[tokio::test]
    async fn test_unreadable_session_is_treated_as_expired() {
        let harness = Harness::new(dec!(5000)).await;
        harness
            .sessions
            .insert_raw(&phone(), b"{\"not\":\"a session\"}".to_vec())
            .await;
        assert_eq!(
            harness.reply("1").await,
            "END Session expired. Please dial again."
        );
        assert_eq!(harness.sessions.len().await, 0);
    }

    #[test]
    fn test_day_bounds_follow_local_midnight() {
        let policy = policy();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 23, 30, 0).unwrap();
        let (from, to) = policy.day_bounds(now);
        // 23:30 UTC is 00:30 on the 11th in UTC+1.
        assert_eq!(from, Utc.with_ymd_and_hms(2024, 3, 10, 23, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2024, 3, 11, 23, 0, 0).unwrap());
    }

    #[test]
    fn test_account_number_shape() {
        assert!(is_account_number("0123456789"));
        assert!(!is_account_number("012345678"));
        assert!(!is_account_number("01234567a9"));
    }
}
