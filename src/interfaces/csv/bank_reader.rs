use crate::domain::bank::Bank;
use crate::error::{GatewayError, Result};
use std::io::Read;

/// Reads the bank directory from a CSV source with a `name,code` header.
///
/// Fields are trimmed, so hand-edited files with padding load cleanly.
pub struct BankReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> BankReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes one `Bank` per row.
    pub fn banks(self) -> impl Iterator<Item = Result<Bank>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(GatewayError::from))
    }
}
