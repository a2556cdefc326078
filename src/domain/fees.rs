//! Transfer pricing and daily-limit accounting.
//!
//! Everything here is pure: the engine feeds in amounts and the running daily
//! total, and gets back a quote or a rejection. No I/O, no clock.

use super::money::Amount;
use crate::error::GatewayError;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Flat fee charged on amounts strictly below `below`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTier {
    pub below: Decimal,
    pub fee: Decimal,
}

/// Amount-banded fee schedule plus VAT charged on the fee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeSchedule {
    tiers: Vec<FeeTier>,
    top_fee: Decimal,
    vat_percent: Decimal,
}

impl FeeSchedule {
    /// Builds a schedule, rejecting configurations where the fee would not be a
    /// non-decreasing step function of the amount.
    pub fn new(
        tiers: Vec<FeeTier>,
        top_fee: Decimal,
        vat_percent: Decimal,
    ) -> Result<Self, GatewayError> {
        if vat_percent < Decimal::ZERO {
            return Err(GatewayError::ConfigError(
                "VAT percent cannot be negative".to_string(),
            ));
        }
        let mut previous: Option<FeeTier> = None;
        for tier in &tiers {
            if tier.fee < Decimal::ZERO || tier.below <= Decimal::ZERO {
                return Err(GatewayError::ConfigError(format!(
                    "Invalid fee tier {}:{}",
                    tier.below, tier.fee
                )));
            }
            if let Some(prev) = previous
                && (tier.below <= prev.below || tier.fee < prev.fee)
            {
                return Err(GatewayError::ConfigError(format!(
                    "Fee tiers must ascend: {}:{} follows {}:{}",
                    tier.below, tier.fee, prev.below, prev.fee
                )));
            }
            previous = Some(*tier);
        }
        if let Some(last) = previous
            && top_fee < last.fee
        {
            return Err(GatewayError::ConfigError(format!(
                "Top fee {top_fee} is below the last tier fee {}",
                last.fee
            )));
        }
        Ok(Self {
            tiers,
            top_fee,
            vat_percent,
        })
    }

    /// Fee for an external bank transfer of `amount`.
    pub fn fee(&self, amount: Decimal) -> Decimal {
        self.tiers
            .iter()
            .find(|tier| amount < tier.below)
            .map(|tier| tier.fee)
            .unwrap_or(self.top_fee)
    }

    /// VAT on a fee, rounded half away from zero to two places.
    pub fn vat(&self, fee: Decimal) -> Decimal {
        (fee * self.vat_percent / dec!(100))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    pub fn quote(&self, amount: Amount) -> TransferQuote {
        let fee = self.fee(amount.value());
        let vat = self.vat(fee);
        TransferQuote {
            amount,
            fee,
            vat,
            total: amount
                .value()
                .checked_add(fee)
                .and_then(|sum| sum.checked_add(vat))
                .unwrap_or(Decimal::MAX),
        }
    }

    pub fn vat_percent(&self) -> Decimal {
        self.vat_percent
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            tiers: vec![
                FeeTier {
                    below: dec!(5000),
                    fee: dec!(10),
                },
                FeeTier {
                    below: dec!(50000),
                    fee: dec!(25),
                },
            ],
            top_fee: dec!(50),
            vat_percent: dec!(7.5),
        }
    }
}

/// Parsed form of `5000:10,50000:25`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeTiers(pub Vec<FeeTier>);

impl FromStr for FeeTiers {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| {
                let (below, fee) = part
                    .split_once(':')
                    .ok_or_else(|| format!("Expected <below>:<fee>, got {part:?}"))?;
                let below = Decimal::from_str(below.trim()).map_err(|e| e.to_string())?;
                let fee = Decimal::from_str(fee.trim()).map_err(|e| e.to_string())?;
                Ok(FeeTier { below, fee })
            })
            .collect::<Result<Vec<_>, String>>()
            .map(FeeTiers)
    }
}

/// Everything a subscriber pays for one bank transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferQuote {
    pub amount: Amount,
    pub fee: Decimal,
    pub vat: Decimal,
    pub total: Decimal,
}

impl TransferQuote {
    pub fn affordable_with(&self, balance: Decimal) -> bool {
        balance >= self.total
    }
}

/// Rejection raised when a transfer would break the daily ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitExceeded {
    pub remaining: Decimal,
}

/// Per-customer ceiling on external transfers in one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyLimit {
    ceiling: Decimal,
}

impl DailyLimit {
    pub fn new(ceiling: Decimal) -> Self {
        Self { ceiling }
    }

    pub fn ceiling(&self) -> Decimal {
        self.ceiling
    }

    /// A running total that cannot be summed counts as over the ceiling.
    pub fn check(&self, spent_today: Decimal, amount: Amount) -> Result<(), LimitExceeded> {
        let over = spent_today
            .checked_add(amount.value())
            .is_none_or(|total| total > self.ceiling);
        if over {
            Err(LimitExceeded {
                remaining: (self.ceiling - spent_today).max(Decimal::ZERO),
            })
        } else {
            Ok(())
        }
    }
}
