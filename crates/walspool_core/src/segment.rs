//! WAL segment identifiers and predecessor arithmetic.
//!
//! A segment identifier is 24 hexadecimal digits naming a position in an
//! append-only log. It splits at a fixed offset into a *high* part (leading
//! 16 digits: timeline plus log-file number) and a *low* part (trailing
//! 8 digits: segment offset within the log file). Both parts are zero-padded
//! uppercase hex, so identifiers of equal width sort the same as their text.
//!
//! The predecessor relation is a two-level counter with borrow: the low part
//! decrements in place until it hits zero, then the high part decrements and
//! the low part rolls back to [`SegmentId::LOW_ROLLOVER`]. The rollover
//! boundary is a property of the segment naming scheme, not of the 8-digit
//! field width.

use std::fmt;
use std::str::FromStr;

use crate::error::{BackfillError, BackfillResult};

/// A fixed-width WAL segment identifier.
///
/// Stored as the two numeric parts; the canonical text form is produced by
/// [`fmt::Display`] and is always 24 uppercase, zero-padded hex digits.
/// Remote lookups match on the exact text, so arithmetic must never change
/// width or case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId {
    high: u64,
    low: u32,
}

impl SegmentId {
    /// Hex digits in the full identifier.
    pub const WIDTH: usize = 24;

    /// Hex digits in the high part.
    pub const HIGH_WIDTH: usize = 16;

    /// Hex digits in the low part.
    pub const LOW_WIDTH: usize = 8;

    /// Value the low part rolls back to when borrowing from the high part.
    ///
    /// Segment offsets within one log file run 0x00 through 0xFF.
    pub const LOW_ROLLOVER: u32 = 0xFF;

    /// Creates an identifier from its high and low parts.
    #[must_use]
    pub const fn from_parts(high: u64, low: u32) -> Self {
        Self { high, low }
    }

    /// Returns the high part (timeline + log-file number).
    #[must_use]
    pub const fn high(self) -> u64 {
        self.high
    }

    /// Returns the low part (segment offset within the log file).
    #[must_use]
    pub const fn low(self) -> u32 {
        self.low
    }

    /// Computes the immediately preceding segment identifier.
    ///
    /// A low part above zero decrements in place. At zero it borrows: the
    /// high part decrements and the low part becomes [`Self::LOW_ROLLOVER`].
    ///
    /// # Errors
    ///
    /// Returns [`BackfillError::SegmentUnderflow`] for the all-zero
    /// identifier, which has no predecessor. Backup histories never reach
    /// this boundary in practice.
    pub fn decrement(self) -> BackfillResult<Self> {
        if self.low > 0 {
            return Ok(Self {
                high: self.high,
                low: self.low - 1,
            });
        }
        let high = self
            .high
            .checked_sub(1)
            .ok_or_else(|| BackfillError::SegmentUnderflow {
                value: self.to_string(),
            })?;
        Ok(Self {
            high,
            low: Self::LOW_ROLLOVER,
        })
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}{:08X}", self.high, self.low)
    }
}

impl FromStr for SegmentId {
    type Err = BackfillError;

    /// Parses an identifier, accepting either hex case but requiring the
    /// exact 24-digit width. Anything else is a precondition violation.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BackfillError::InvalidSegmentId {
            value: s.to_string(),
        };
        if s.len() != Self::WIDTH || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let (high, low) = s.split_at(Self::HIGH_WIDTH);
        let high = u64::from_str_radix(high, 16).map_err(|_| invalid())?;
        let low = u32::from_str_radix(low, 16).map_err(|_| invalid())?;
        Ok(Self { high, low })
    }
}
