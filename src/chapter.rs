//! Chapter numbering.
//!
//! Catalogs number chapters with integers, but "extra" releases use
//! fractional numbers (`10.5`). [`ChapterNumber`] keeps the value finite so it
//! can be totally ordered, hashed into maps and used as a map key in the
//! persisted subscription state.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Error returned when a string or float is not a usable chapter number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid chapter number '{value}'")]
pub struct ChapterParseError {
    /// The rejected input.
    pub value: String,
}

/// A finite, possibly fractional chapter number.
#[derive(Debug, Clone, Copy)]
pub struct ChapterNumber(f64);

impl ChapterNumber {
    /// Sorts before every real chapter; resuming from it fetches everything listed.
    pub const BEFORE_FIRST: Self = Self(-1.0);

    /// Creates a chapter number, rejecting NaN and infinities.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        value.is_finite().then_some(Self(value))
    }

    /// Creates a chapter number from a whole chapter.
    #[must_use]
    pub fn whole(value: u32) -> Self {
        Self(f64::from(value))
    }

    /// Returns the raw value.
    #[must_use]
    pub fn value(self) -> f64 {
        self.0
    }

    /// Returns true when the chapter has no fractional part.
    #[must_use]
    pub fn is_whole(self) -> bool {
        self.0.fract() == 0.0
    }

    /// Returns the chapter one step after this one (`10.5` -> `11.5`).
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1.0)
    }
}

impl PartialEq for ChapterNumber {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for ChapterNumber {}

impl PartialOrd for ChapterNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChapterNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for ChapterNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_whole() {
            write!(f, "{:.0}", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for ChapterNumber {
    type Err = ChapterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        trimmed
            .parse::<f64>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| ChapterParseError {
                value: trimmed.to_string(),
            })
    }
}

impl From<u32> for ChapterNumber {
    fn from(value: u32) -> Self {
        Self::whole(value)
    }
}

impl Serialize for ChapterNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0)
    }
}

impl<'de> Deserialize<'de> for ChapterNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Self::new(value).ok_or_else(|| serde::de::Error::custom("chapter number must be finite"))
    }
}

/// Parses the leading number of `text` (`"750 - Title"` -> `750`).
///
/// Accepts digits with at most one decimal point; a trailing dot is ignored.
#[must_use]
pub(crate) fn parse_leading_number(text: &str) -> Option<ChapterNumber> {
    let text = text.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    for (index, ch) in text.char_indices() {
        if ch.is_ascii_digit() {
            end = index + 1;
        } else if ch == '.' && !seen_dot {
            seen_dot = true;
        } else {
            break;
        }
    }
    if end == 0 {
        return None;
    }
    text[..end].parse().ok()
}
