//! Change stamps.
//!
//! The world keeps a monotonically increasing [`ChangeClock`]. Every write to
//! a component row (insert, `set`, `get_mut`, mutable iteration) records the
//! clock's value in that row, so readers can ask whether a component changed
//! after a stamp they observed earlier.

use serde::{Deserialize, Serialize};

/// The clock value recorded when a row was last written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ChangeStamp(u64);

impl ChangeStamp {
    /// A stamp older than every write.
    pub const ZERO: ChangeStamp = ChangeStamp(0);

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// `true` if this stamp was taken strictly after `other`.
    #[inline]
    pub fn is_newer_than(self, other: ChangeStamp) -> bool {
        self.0 > other.0
    }
}

/// Source of fresh [`ChangeStamp`]s.
#[derive(Debug, Default)]
pub struct ChangeClock {
    current: u64,
}

impl ChangeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently issued stamp.
    pub fn current(&self) -> ChangeStamp {
        ChangeStamp(self.current)
    }

    /// Issue a stamp newer than every previous one.
    pub fn advance(&mut self) -> ChangeStamp {
        self.current += 1;
        ChangeStamp(self.current)
    }
}
