//! Numeric entry of the calibration weight.

use crate::error::{AppResult, KioskError};

/// One keypad button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// 0 to 9; larger values are ignored
    Digit(u8),
    /// Decimal point, accepted once
    Point,
    /// Remove the last character
    Delete,
    /// Submit the entry
    Confirm,
}

/// Text buffer behind the on-screen keypad.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keypad {
    buffer: String,
}

impl Keypad {
    /// Empty keypad.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entry as shown to the operator.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Discard the entry.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Apply a key press.
    ///
    /// Editing keys return `Ok(None)`. `Confirm` returns the entered weight, or
    /// `CalibrationInvalidInput` for an empty, unparsable or non-positive entry,
    /// in which case the buffer is cleared for re-entry.
    pub fn press(&mut self, key: Key) -> AppResult<Option<f64>> {
        match key {
            Key::Digit(d) if d <= 9 => self.buffer.push(char::from(b'0' + d)),
            Key::Digit(_) => {}
            Key::Point => {
                if !self.buffer.contains('.') {
                    self.buffer.push('.');
                }
            }
            Key::Delete => {
                self.buffer.pop();
            }
            Key::Confirm => return self.confirm().map(Some),
        }
        Ok(None)
    }

    fn confirm(&mut self) -> AppResult<f64> {
        let entry = std::mem::take(&mut self.buffer);
        let value: f64 = entry
            .parse()
            .map_err(|_| KioskError::CalibrationInvalidInput(format!("'{}' is not a number", entry)))?;
        if value.is_finite() && value > 0.0 {
            Ok(value)
        } else {
            Err(KioskError::CalibrationInvalidInput(format!(
                "weight must be positive, got {}",
                entry
            )))
        }
    }
}
