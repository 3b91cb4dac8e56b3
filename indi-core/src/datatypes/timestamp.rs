//! INDI timestamps
//!
//! Timestamps travel as `YYYY-MM-DDTHH:MM:SS[.fff]` in UTC without a zone
//! designator.

use crate::error::{IndiError, IndiResult};
use chrono::{NaiveDateTime, SubsecRound, Utc};
use std::fmt;

const FORMAT_WITH_FRACTION: &str = "%Y-%m-%dT%H:%M:%S%.f";
const FORMAT_WITHOUT_FRACTION: &str = "%Y-%m-%dT%H:%M:%S";
const RENDER_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Point in time attached to protocol messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    /// Current UTC time, truncated to the millisecond precision used on the wire
    pub fn now() -> Self {
        Self(Utc::now().naive_utc().trunc_subsecs(3))
    }

    /// Wrap an existing UTC date-time
    pub fn from_naive(datetime: NaiveDateTime) -> Self {
        Self(datetime)
    }

    /// Underlying UTC date-time
    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }

    /// Parse a wire timestamp
    ///
    /// # Errors
    ///
    /// Returns `IndiError::InvalidData` if the text matches neither the
    /// fractional nor the whole-second layout
    pub fn parse(text: &str) -> IndiResult<Self> {
        let text = text.trim();

        NaiveDateTime::parse_from_str(text, FORMAT_WITH_FRACTION)
            .or_else(|_| NaiveDateTime::parse_from_str(text, FORMAT_WITHOUT_FRACTION))
            .map(Self)
            .map_err(|e| IndiError::InvalidData(format!("Invalid timestamp {}: {}", text, e)))
    }

    /// Parse an optional wire timestamp, falling back to the current time
    /// when it is absent or unparseable
    pub fn parse_or_now(text: Option<&str>) -> Self {
        text.and_then(|t| Self::parse(t).ok()).unwrap_or_else(Self::now)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(RENDER_FORMAT))
    }
}
