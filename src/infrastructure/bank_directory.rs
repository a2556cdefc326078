use crate::domain::bank::{Bank, BankPage};
use crate::domain::ports::BankDirectory;
use std::collections::HashSet;

/// Banks offered when no directory file is configured.
const BUILT_IN: &[(&str, &str)] = &[
    ("ACCESS BANK", "044"),
    ("CITIBANK NIGERIA", "023"),
    ("ECOBANK NIGERIA", "050"),
    ("FIDELITY BANK", "070"),
    ("FIRST BANK OF NIGERIA", "011"),
    ("FIRST CITY MONUMENT BANK", "214"),
    ("GLOBUS BANK", "00103"),
    ("GUARANTY TRUST BANK", "058"),
    ("HERITAGE BANK", "030"),
    ("JAIZ BANK", "301"),
    ("KEYSTONE BANK", "082"),
    ("KUDA MICROFINANCE BANK", "50211"),
    ("MONIEPOINT MICROFINANCE BANK", "50515"),
    ("OPAY", "999992"),
    ("PALMPAY", "999991"),
    ("POLARIS BANK", "076"),
    ("PROVIDUS BANK", "101"),
    ("STANBIC IBTC BANK", "221"),
    ("STANDARD CHARTERED BANK", "068"),
    ("STERLING BANK", "232"),
    ("SUNTRUST BANK", "100"),
    ("TITAN TRUST BANK", "102"),
    ("UNION BANK OF NIGERIA", "032"),
    ("UNITED BANK FOR AFRICA", "033"),
    ("UNITY BANK", "215"),
    ("WEMA BANK", "035"),
    ("ZENITH BANK", "057"),
];

/// Read-only, searchable bank table held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticBankDirectory {
    banks: Vec<Bank>,
}

impl StaticBankDirectory {
    /// Builds a directory from raw entries: names and codes are trimmed,
    /// names upper-cased, entries without both dropped, the first entry for
    /// a code kept, and the result sorted by name.
    pub fn new(entries: impl IntoIterator<Item = Bank>) -> Self {
        let mut seen = HashSet::new();
        let mut banks: Vec<Bank> = entries
            .into_iter()
            .map(|bank| Bank::new(bank.name.trim().to_uppercase(), bank.code.trim()))
            .filter(|bank| !bank.name.is_empty() && !bank.code.is_empty())
            .filter(|bank| seen.insert(bank.code.clone()))
            .collect();
        banks.sort_by(|a, b| a.name.cmp(&b.name));
        Self { banks }
    }

    pub fn built_in() -> Self {
        Self::new(BUILT_IN.iter().map(|(name, code)| Bank::new(*name, *code)))
    }

    pub fn len(&self) -> usize {
        self.banks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.is_empty()
    }
}

impl BankDirectory for StaticBankDirectory {
    fn search(&self, term: &str, page: usize, page_size: usize) -> BankPage {
        let needle = term.trim().to_lowercase();
        let matches: Vec<&Bank> = self
            .banks
            .iter()
            .filter(|bank| needle.is_empty() || bank.name.to_lowercase().contains(&needle))
            .collect();

        let page_size = page_size.max(1);
        let start = page.saturating_mul(page_size);
        BankPage {
            banks: matches
                .iter()
                .skip(start)
                .take(page_size)
                .map(|bank| (*bank).clone())
                .collect(),
            page,
            has_next: start.saturating_add(page_size) < matches.len(),
            has_prev: page > 0,
            total: matches.len(),
        }
    }
}
