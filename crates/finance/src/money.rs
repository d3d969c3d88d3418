use serde::{Deserialize, Serialize};

use loomerp_core::{DomainError, DomainResult, ValueObject};

/// Non-negative amount in minor units (paisa/cents) of the tenant's base currency.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::validation("amount overflow"))
    }

    /// `self - other`, failing instead of going negative.
    pub fn checked_sub(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::validation(format!("{other} exceeds {self}")))
    }

    /// Price × quantity.
    pub fn times(self, quantity: u32) -> DomainResult<Money> {
        self.0
            .checked_mul(u64::from(quantity))
            .map(Money)
            .ok_or_else(|| DomainError::validation("amount overflow"))
    }

    pub fn sum<I: IntoIterator<Item = Money>>(amounts: I) -> DomainResult<Money> {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_is_checked() {
        let a = Money::from_minor(1_050);
        assert_eq!(a.checked_add(Money::from_minor(50)).unwrap().minor(), 1_100);
        assert!(Money::from_minor(u64::MAX).checked_add(a).is_err());
        assert!(Money::from_minor(10).checked_sub(a).is_err());
        assert_eq!(a.times(3).unwrap(), Money::from_minor(3_150));
    }

    #[test]
    fn displays_major_and_minor_units() {
        assert_eq!(Money::from_minor(123_405).to_string(), "1234.05");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    #[test]
    fn sums_line_values() {
        let total = Money::sum([Money::from_minor(1), Money::from_minor(2), Money::from_minor(3)]);
        assert_eq!(total.unwrap(), Money::from_minor(6));
    }
}
