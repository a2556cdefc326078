use serde::{Deserialize, Serialize};

/// A destination bank as listed in the bank directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bank {
    pub name: String,
    /// Sort code expected by the ledger's transfer and name-enquiry calls.
    pub code: String,
}

impl Bank {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
        }
    }
}

/// One page of a directory search.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BankPage {
    pub banks: Vec<Bank>,
    pub page: usize,
    pub has_next: bool,
    pub has_prev: bool,
    pub total: usize,
}

impl BankPage {
    pub fn is_empty(&self) -> bool {
        self.banks.is_empty()
    }
}

/// Banks offered directly on the bank-transfer menu, in menu order.
pub fn quick_picks() -> [Bank; 3] {
    [
        Bank::new("Access Bank", "044"),
        Bank::new("GTBank", "058"),
        Bank::new("Zenith Bank", "057"),
    ]
}
