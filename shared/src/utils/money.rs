use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

// Semua nominal uang di platform disimpan sebagai integer minor unit
// (sen) + kode mata uang. Tidak pernah floating point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Money {
    pub amount_minor: i64,
    pub currency: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum MoneyError {
    #[error("Mata uang tidak cocok: {0} vs {1}")]
    CurrencyMismatch(String, String),
    #[error("Nominal tidak boleh negatif")]
    Negative,
    #[error("Arithmetic overflow pada operasi uang")]
    Overflow,
}

impl Money {
    pub fn new(amount_minor: i64, currency: &str) -> Result<Self, MoneyError> {
        if amount_minor < 0 {
            return Err(MoneyError::Negative);
        }
        Ok(Self {
            amount_minor,
            currency: currency.to_uppercase(),
        })
    }

    pub fn zero(currency: &str) -> Self {
        Self {
            amount_minor: 0,
            currency: currency.to_uppercase(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.amount_minor == 0
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.assert_same_currency(other)?;
        let amount = self
            .amount_minor
            .checked_add(other.amount_minor)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money {
            amount_minor: amount,
            currency: self.currency.clone(),
        })
    }

    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.assert_same_currency(other)?;
        let amount = self
            .amount_minor
            .checked_sub(other.amount_minor)
            .ok_or(MoneyError::Overflow)?;
        if amount < 0 {
            return Err(MoneyError::Negative);
        }
        Ok(Money {
            amount_minor: amount,
            currency: self.currency.clone(),
        })
    }

    /// Bagi nominal berdasarkan basis points (10000 bps = 100%).
    /// Hasil dibulatkan ke bawah; sisa pembulatan tetap di bagian platform.
    pub fn share_bps(&self, bps: u32) -> Money {
        let share = (self.amount_minor as i128 * bps as i128 / 10_000) as i64;
        Money {
            amount_minor: share,
            currency: self.currency.clone(),
        }
    }

    fn assert_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch(
                self.currency.clone(),
                other.currency.clone(),
            ));
        }
        Ok(())
    }

    /// Format ke major unit untuk logging ("125.00 USD")
    pub fn format_major(&self) -> String {
        format!(
            "{}.{:02} {}",
            self.amount_minor / 100,
            (self.amount_minor % 100).abs(),
            self.currency
        )
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format_major())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_negative() {
        assert_eq!(Money::new(-1, "USD").unwrap_err(), MoneyError::Negative);
    }

    #[test]
    fn test_add_same_currency() {
        let a = Money::new(1_000, "USD").unwrap();
        let b = Money::new(250, "USD").unwrap();
        assert_eq!(a.checked_add(&b).unwrap().amount_minor, 1_250);
    }

    #[test]
    fn test_add_currency_mismatch() {
        let a = Money::new(1_000, "USD").unwrap();
        let b = Money::new(250, "IDR").unwrap();
        assert!(matches!(
            a.checked_add(&b),
            Err(MoneyError::CurrencyMismatch(_, _))
        ));
    }

    #[test]
    fn test_sub_never_goes_negative() {
        let a = Money::new(100, "USD").unwrap();
        let b = Money::new(250, "USD").unwrap();
        assert_eq!(a.checked_sub(&b).unwrap_err(), MoneyError::Negative);
    }

    #[test]
    fn test_share_bps_truncates() {
        // 80% dari $100.00 = $80.00
        let gross = Money::new(10_000, "USD").unwrap();
        assert_eq!(gross.share_bps(8_000).amount_minor, 8_000);
        // pembulatan ke bawah: 85% dari 99 sen = 84 sen (84.15 truncated)
        let odd = Money::new(99, "USD").unwrap();
        assert_eq!(odd.share_bps(8_500).amount_minor, 84);
    }

    #[test]
    fn test_format_major() {
        let m = Money::new(9_750, "USD").unwrap();
        assert_eq!(m.format_major(), "97.50 USD");
    }
}
