//! `MM:SS` timestamp codec
//!
//! Every timestamp that reaches the extractor has been through [`Timestamp::parse`],
//! whether it came from a user edit or from the analysis collaborator.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::FrameError;

static MMSS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}:\d{2}$").expect("static regex"));

/// Largest representable position, `59:59`.
pub const MAX_TOTAL_SECONDS: u32 = 59 * 60 + 59;

/// A whole-second position within a video, `minutes` and `seconds` both below 60.
///
/// Field order makes the derived ordering match ordering by total seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    minutes: u8,
    seconds: u8,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { minutes: 0, seconds: 0 };

    pub fn new(minutes: u8, seconds: u8) -> Option<Self> {
        (minutes < 60 && seconds < 60).then_some(Self { minutes, seconds })
    }

    /// Parse the canonical `MM:SS` form.
    ///
    /// Anything else, including partial input such as `"1:0"` or `"07:"`,
    /// is rejected with [`FrameError::InvalidFormat`].
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let invalid = || FrameError::InvalidFormat(text.to_string());

        if !MMSS.is_match(text) {
            return Err(invalid());
        }
        let (mm, ss) = text.split_once(':').ok_or_else(invalid)?;
        let minutes: u8 = mm.parse().map_err(|_| invalid())?;
        let seconds: u8 = ss.parse().map_err(|_| invalid())?;

        Self::new(minutes, seconds).ok_or_else(invalid)
    }

    pub fn from_total_seconds(total: u32) -> Option<Self> {
        if total > MAX_TOTAL_SECONDS {
            return None;
        }
        Some(Self {
            minutes: (total / 60) as u8,
            seconds: (total % 60) as u8,
        })
    }

    pub fn minutes(&self) -> u8 {
        self.minutes
    }

    pub fn seconds(&self) -> u8 {
        self.seconds
    }

    pub fn total_seconds(&self) -> u32 {
        self.minutes as u32 * 60 + self.seconds as u32
    }

    /// Move by `delta` seconds, clamped to `00:00..=59:59`.
    pub fn shift(&self, delta: i64) -> Self {
        let total = (self.total_seconds() as i64)
            .saturating_add(delta)
            .clamp(0, MAX_TOTAL_SECONDS as i64);
        Self {
            minutes: (total / 60) as u8,
            seconds: (total % 60) as u8,
        }
    }

    /// Zero-padded `MM:SS`.
    pub fn format(&self) -> String {
        format!("{:02}:{:02}", self.minutes, self.seconds)
    }

    /// `MMSS`, used inside frame file names.
    pub fn compact(&self) -> String {
        format!("{:02}{:02}", self.minutes, self.seconds)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.minutes, self.seconds)
    }
}

impl FromStr for Timestamp {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.format())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Timestamp::parse(&text).map_err(serde::de::Error::custom)
    }
}
