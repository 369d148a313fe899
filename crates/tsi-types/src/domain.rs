//! Small domain primitives shared across every crate: the sampling
//! interval enum, the record type tag, and a millisecond timestamp newtype.

use std::fmt;

/// A sampling interval, as used by both the observation pipeline's
/// `interval` field and the binarized record schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Interval {
    OneSecond,
    OneMinute,
    ThreeMinutes,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    FourHours,
    OneDay,
    OneWeek,
}

impl Interval {
    /// Canonical DSL spelling, e.g. `1m`, `4h`, `1d`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneSecond => "1s",
            Self::OneMinute => "1m",
            Self::ThreeMinutes => "3m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
            Self::OneWeek => "1w",
        }
    }

    /// Duration of the interval in milliseconds, used by the dataset layer
    /// to validate strictly-monotonic spacing.
    pub fn duration_ms(&self) -> i64 {
        match self {
            Self::OneSecond => 1_000,
            Self::OneMinute => 60_000,
            Self::ThreeMinutes => 3 * 60_000,
            Self::FiveMinutes => 5 * 60_000,
            Self::FifteenMinutes => 15 * 60_000,
            Self::ThirtyMinutes => 30 * 60_000,
            Self::OneHour => 3_600_000,
            Self::FourHours => 4 * 3_600_000,
            Self::OneDay => 86_400_000,
            Self::OneWeek => 7 * 86_400_000,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "1s" => Self::OneSecond,
            "1m" => Self::OneMinute,
            "3m" => Self::ThreeMinutes,
            "5m" => Self::FiveMinutes,
            "15m" => Self::FifteenMinutes,
            "30m" => Self::ThirtyMinutes,
            "1h" => Self::OneHour,
            "4h" => Self::FourHours,
            "1d" => Self::OneDay,
            "1w" => Self::OneWeek,
            _ => return None,
        })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The schema tag of a binarized CSV family (e.g. `kline`, `basic`).
/// Carried as free text rather than a closed enum: record types are
/// defined by configuration, not compiled into the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordType(pub String);

impl RecordType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A millisecond-resolution UNIX timestamp. Strictly ordered; the dataset
/// layer relies on this ordering being total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimestampMs(pub i64);

impl TimestampMs {
    pub fn new(ms: i64) -> Self {
        Self(ms)
    }
}

impl fmt::Display for TimestampMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
