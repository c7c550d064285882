//! Fixed-point decimal with 10^-8 scale.

use neo2_io::{BinaryWriter, MemoryReader, Serializable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

const DECIMALS: i64 = 100_000_000;

/// A signed 64-bit fixed-point number with eight decimal places.
///
/// Used for asset amounts and fees. Arithmetic saturates rather than wraps;
/// amounts near `i64` limits are already invalid chain-side.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Fixed8(pub i64);

impl Fixed8 {
    /// The zero amount.
    pub const ZERO: Fixed8 = Fixed8(0);

    /// Smallest positive increment (10^-8).
    pub const SATOSHI: Fixed8 = Fixed8(1);

    /// Builds a value from whole units.
    pub fn from_int(value: i64) -> Self {
        Fixed8(value.saturating_mul(DECIMALS))
    }

    /// Raw underlying value (units of 10^-8).
    pub fn raw(&self) -> i64 {
        self.0
    }

    /// Integer part of the decimal value.
    pub fn integral(&self) -> i64 {
        self.0 / DECIMALS
    }

    /// Fractional part, carrying the sign of the whole value.
    pub fn fractional(&self) -> i64 {
        self.0 % DECIMALS
    }

    /// Whether the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Saturating addition.
    pub fn checked_add(self, other: Fixed8) -> Option<Fixed8> {
        self.0.checked_add(other.0).map(Fixed8)
    }

    /// Saturating subtraction.
    pub fn checked_sub(self, other: Fixed8) -> Option<Fixed8> {
        self.0.checked_sub(other.0).map(Fixed8)
    }

    /// Division by an integer count.
    pub fn div_int(self, divisor: i64) -> Fixed8 {
        Fixed8(self.0 / divisor)
    }
}

impl Add for Fixed8 {
    type Output = Fixed8;

    fn add(self, other: Fixed8) -> Fixed8 {
        Fixed8(self.0.saturating_add(other.0))
    }
}

impl AddAssign for Fixed8 {
    fn add_assign(&mut self, other: Fixed8) {
        *self = *self + other;
    }
}

impl Sub for Fixed8 {
    type Output = Fixed8;

    fn sub(self, other: Fixed8) -> Fixed8 {
        Fixed8(self.0.saturating_sub(other.0))
    }
}

impl SubAssign for Fixed8 {
    fn sub_assign(&mut self, other: Fixed8) {
        *self = *self - other;
    }
}

impl Neg for Fixed8 {
    type Output = Fixed8;

    fn neg(self) -> Fixed8 {
        Fixed8(-self.0)
    }
}

impl Sum for Fixed8 {
    fn sum<I: Iterator<Item = Fixed8>>(iter: I) -> Fixed8 {
        iter.fold(Fixed8::ZERO, Add::add)
    }
}

impl Serializable for Fixed8 {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_i64(self.0);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(Fixed8(reader.read_i64()?))
    }

    fn size(&self) -> usize {
        8
    }
}

impl fmt::Display for Fixed8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut value = self.0;
        if value < 0 {
            f.write_str("-")?;
            value = -value;
        }
        write!(f, "{}", value / DECIMALS)?;
        let frac = value % DECIMALS;
        if frac > 0 {
            let digits = format!("{frac:08}");
            write!(f, ".{}", digits.trim_end_matches('0'))?;
        }
        Ok(())
    }
}

impl FromStr for Fixed8 {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let invalid = || crate::Error::format("Fixed8", "expected \\d+(\\.\\d{1,8})?");
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (s, None),
        };
        let integral: i64 = int_part.parse().map_err(|_| invalid())?;
        let mut raw = integral.checked_mul(DECIMALS).ok_or_else(invalid)?;
        if let Some(frac) = frac_part {
            if frac.is_empty() || frac.len() > 8 {
                return Err(invalid());
            }
            let mut fp: i64 = frac.parse().map_err(|_| invalid())?;
            for _ in frac.len()..8 {
                fp *= 10;
            }
            raw = if integral < 0 || int_part.starts_with('-') {
                raw - fp
            } else {
                raw + fp
            };
        }
        Ok(Fixed8(raw))
    }
}
