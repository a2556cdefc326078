/// Separator carriers use between keystrokes in the cumulative `text` field.
pub const SEPARATOR: char = '*';

/// Keystrokes entered so far in one dialog, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Keystrokes(Vec<String>);

impl Keystrokes {
    /// Splits the carrier's cumulative input. `None` and `""` both mean the
    /// first page of a dialog.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Self::default(),
            Some(text) => Self(
                text.split(SEPARATOR)
                    .map(|token| token.trim().to_string())
                    .collect(),
            ),
        }
    }

    /// Input for the current step: the last token, or `""` on the first page.
    pub fn current(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }
}
