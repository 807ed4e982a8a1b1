use std::{
    cmp::Ordering,
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::serializer::{Reader, ReaderError, Serializer, Writer};

// Number of base-10 fractional digits carried by every amount
pub const INTEGER_PRECISION: u32 = 8;

const INTEGER_UNIT: u64 = 10u64.pow(INTEGER_PRECISION);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegerError {
    #[error("Invalid integer format: {0}")]
    InvalidFormat(String),
    #[error("Integer overflow: {0}")]
    Overflow(String),
}

/// Fixed-precision amount with 8 fractional digits, stored as a count of
/// 10^-8 units. Arithmetic is checked: an overflowing ledger amount is a
/// corrupt-state condition, not a peer-induced one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Integer(u64);

impl Integer {
    pub const fn zero() -> Self {
        Integer(0)
    }

    pub const fn from_units(units: u64) -> Self {
        Integer(units)
    }

    pub const fn units(self) -> u64 {
        self.0
    }

    pub fn add(self, other: Integer) -> Integer {
        match self.0.checked_add(other.0) {
            Some(v) => Integer(v),
            None => panic!("integer add overflow {} {}", self, other),
        }
    }

    pub fn sub(self, other: Integer) -> Integer {
        match self.0.checked_sub(other.0) {
            Some(v) => Integer(v),
            None => panic!("integer sub underflow {} {}", self, other),
        }
    }

    pub fn cmp_amount(self, other: Integer) -> Ordering {
        self.0.cmp(&other.0)
    }

    // 0 for zero, 1 for any positive amount
    pub fn sign(self) -> i32 {
        if self.0 == 0 {
            0
        } else {
            1
        }
    }

    // How many whole steps fit into this amount
    pub fn count(self, step: Integer) -> u64 {
        if step.0 == 0 {
            panic!("integer count by zero step");
        }
        self.0 / step.0
    }
}

impl Display for Integer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{:08}",
            self.0 / INTEGER_UNIT,
            self.0 % INTEGER_UNIT
        )
    }
}

impl FromStr for Integer {
    type Err = IntegerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IntegerError::InvalidFormat(s.to_string());
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() || frac.len() > INTEGER_PRECISION as usize {
            return Err(invalid());
        }
        let whole: u64 = whole.parse().map_err(|_| invalid())?;
        let frac: u64 = if frac.is_empty() {
            0
        } else {
            let scale = 10u64.pow(INTEGER_PRECISION - frac.len() as u32);
            let digits: u64 = frac.parse().map_err(|_| invalid())?;
            digits * scale
        };
        whole
            .checked_mul(INTEGER_UNIT)
            .and_then(|v| v.checked_add(frac))
            .map(Integer)
            .ok_or_else(|| IntegerError::Overflow(s.to_string()))
    }
}

impl TryFrom<String> for Integer {
    type Error = IntegerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Integer> for String {
    fn from(i: Integer) -> String {
        i.to_string()
    }
}

impl Serializer for Integer {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Integer(reader.read_u64()?))
    }

    fn size(&self) -> usize {
        8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let a: Integer = "100".parse().unwrap();
        assert_eq!(a.to_string(), "100.00000000");
        let b: Integer = "0.001".parse().unwrap();
        assert_eq!(b.to_string(), "0.00100000");
        let c: Integer = "99.99999999".parse().unwrap();
        assert_eq!(c.units(), 99_99999999);
        // display ∘ parse is the identity on canonical strings
        let canonical = "12345.67890000";
        let d: Integer = canonical.parse().unwrap();
        assert_eq!(d.to_string(), canonical);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Integer>().is_err());
        assert!(".5".parse::<Integer>().is_err());
        assert!("1.123456789".parse::<Integer>().is_err());
        assert!("-1".parse::<Integer>().is_err());
        assert!("1e8".parse::<Integer>().is_err());
    }

    #[test]
    fn test_arithmetic() {
        let a: Integer = "100".parse().unwrap();
        let b: Integer = "0.00000001".parse().unwrap();
        assert_eq!(a.add(b).to_string(), "100.00000001");
        assert_eq!(a.sign(), 1);
        assert_eq!(Integer::zero().sign(), 0);
        assert_eq!(a.cmp_amount(b), Ordering::Greater);
    }

    #[test]
    fn test_count_steps() {
        let amount: Integer = "0.0035".parse().unwrap();
        let step: Integer = "0.001".parse().unwrap();
        assert_eq!(amount.count(step), 3);
        let small: Integer = "0.0009".parse().unwrap();
        assert_eq!(small.count(step), 0);
    }
}
