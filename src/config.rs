//! Runtime settings, read from CLI flags with environment fallbacks.

use crate::application::engine::Policy;
use crate::domain::fees::{DailyLimit, FeeSchedule, FeeTiers};
use crate::error::{GatewayError, Result};
use crate::infrastructure::bank_directory::StaticBankDirectory;
use crate::infrastructure::tagpay::TagPaySettings;
use crate::interfaces::csv::bank_reader::BankReader;
use chrono::FixedOffset;
use clap::Args;
use rust_decimal::Decimal;
use std::fs::File;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Args)]
pub struct DirectoryArgs {
    /// CSV file with a `name,code` header. Defaults to the built-in table.
    #[arg(long = "banks", env = "USSD_BANKS_FILE")]
    pub banks_file: Option<PathBuf>,
}

impl DirectoryArgs {
    pub fn load(&self) -> Result<StaticBankDirectory> {
        let Some(path) = &self.banks_file else {
            return Ok(StaticBankDirectory::built_in());
        };
        let file = File::open(path)?;
        let banks = BankReader::new(file).banks().collect::<Result<Vec<_>>>()?;
        let directory = StaticBankDirectory::new(banks);
        if directory.is_empty() {
            return Err(GatewayError::ConfigError(format!(
                "bank directory {} has no usable entries",
                path.display()
            )));
        }
        Ok(directory)
    }
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    #[arg(long, env = "USSD_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    #[arg(long, env = "LEDGER_BASE_URL")]
    pub ledger_url: String,

    #[arg(long, env = "LEDGER_TOKEN", hide_env_values = true)]
    pub ledger_token: String,

    /// Token used for fee postings. Defaults to the ledger token.
    #[arg(long, env = "LEDGER_FEE_TOKEN", hide_env_values = true)]
    pub fee_token: Option<String>,

    #[arg(long, default_value_t = 15)]
    pub ledger_timeout_secs: u64,

    #[command(flatten)]
    pub directory: DirectoryArgs,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Required value of the `X-Gateway-Token` header on inbound calls.
    #[arg(long, env = "USSD_INBOUND_SECRET", hide_env_values = true)]
    pub inbound_secret: Option<String>,

    /// Fee bands as `<below>:<fee>` pairs.
    #[arg(long, default_value = "5000:10,50000:25")]
    pub fee_tiers: FeeTiers,

    /// Fee for amounts at or above the last band.
    #[arg(long, default_value = "50")]
    pub fee_max: Decimal,

    #[arg(long, default_value = "7.5")]
    pub vat_percent: Decimal,

    #[arg(long, default_value = "100000")]
    pub daily_limit: Decimal,

    #[arg(long, default_value = "10")]
    pub balance_check_fee: Decimal,

    /// Customer id of the wallet collecting merchant fees.
    #[arg(long, env = "USSD_FEE_WALLET")]
    pub fee_wallet: String,

    /// Customer id of the wallet collecting VAT. Defaults to the fee wallet.
    #[arg(long, env = "USSD_VAT_WALLET")]
    pub vat_wallet: Option<String>,

    #[arg(long, default_value_t = 180, value_parser = clap::value_parser!(i64).range(1..=86_400))]
    pub session_ttl_secs: i64,

    #[arg(long, default_value_t = 3)]
    pub pin_max_attempts: u32,

    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(i64).range(0..=10_080))]
    pub pin_lockout_mins: i64,

    /// Offset from UTC of the day used for the daily limit.
    #[arg(long, default_value_t = 60, allow_negative_numbers = true)]
    pub day_offset_minutes: i32,
}

impl ServeArgs {
    pub fn policy(&self) -> Result<Policy> {
        if self.balance_check_fee < Decimal::ZERO {
            return Err(GatewayError::ConfigError(
                "balance check fee cannot be negative".to_string(),
            ));
        }
        if self.daily_limit <= Decimal::ZERO {
            return Err(GatewayError::ConfigError(
                "daily limit must be positive".to_string(),
            ));
        }
        let day_offset = self
            .day_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                GatewayError::ConfigError(format!(
                    "day offset of {} minutes is out of range",
                    self.day_offset_minutes
                ))
            })?;

        Ok(Policy {
            fees: FeeSchedule::new(self.fee_tiers.0.clone(), self.fee_max, self.vat_percent)?,
            daily_limit: DailyLimit::new(self.daily_limit),
            balance_check_fee: self.balance_check_fee,
            fee_wallet: self.fee_wallet.clone(),
            vat_wallet: self
                .vat_wallet
                .clone()
                .unwrap_or_else(|| self.fee_wallet.clone()),
            day_offset,
        })
    }

    pub fn ledger_settings(&self) -> TagPaySettings {
        TagPaySettings {
            base_url: self.ledger_url.trim_end_matches('/').to_string(),
            token: self.ledger_token.clone(),
            fee_token: self
                .fee_token
                .clone()
                .unwrap_or_else(|| self.ledger_token.clone()),
            timeout: Duration::from_secs(self.ledger_timeout_secs.max(1)),
        }
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_secs)
    }

    pub fn pin_lockout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.pin_lockout_mins)
    }
}
