//! Logical channel number to RF frequency mapping
//!
//! A trunking control channel announces calls by logical channel number;
//! the actual RF frequency comes from a site-specific channel map. Maps are
//! user configuration, typically a handful of contiguous ranges with a base
//! frequency and a fixed channel step.

use std::fmt;

use crate::error::ProtocolError;

/// A logical channel number as carried in control messages
///
/// Zero means "unset" - it never maps to a frequency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelNumber(pub u16);

impl ChannelNumber {
    /// Channel number zero, the unset marker
    pub const UNSET: ChannelNumber = ChannelNumber(0);

    /// Whether this channel number carries a real assignment
    pub fn is_set(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ChannelNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contiguous run of channel numbers at a fixed frequency step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelRange {
    /// First channel number in the range (inclusive)
    pub first: u16,
    /// Last channel number in the range (inclusive)
    pub last: u16,
    /// Frequency of the first channel in Hz
    pub base_hz: u64,
    /// Spacing between adjacent channels in Hz
    pub step_hz: u64,
}

impl ChannelRange {
    /// Whether the range covers the given channel number
    pub fn contains(&self, channel: ChannelNumber) -> bool {
        self.first <= channel.0 && channel.0 <= self.last
    }

    /// Frequency for a channel in this range, or None when outside it
    pub fn frequency(&self, channel: ChannelNumber) -> Option<u64> {
        if !self.contains(channel) {
            return None;
        }
        let offset = u64::from(channel.0 - self.first);
        Some(self.base_hz + offset * self.step_hz)
    }
}

/// An ordered set of channel ranges for one site
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelMap {
    /// Display name for this map
    pub name: String,
    ranges: Vec<ChannelRange>,
}

impl ChannelMap {
    /// Create an empty map
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ranges: Vec::new(),
        }
    }

    /// Append a range; rejects inverted ranges and a zero step
    pub fn add_range(&mut self, range: ChannelRange) -> Result<(), ProtocolError> {
        if range.first == 0 || range.last < range.first {
            return Err(ProtocolError::InvalidRange {
                first: range.first,
                last: range.last,
            });
        }
        if range.step_hz == 0 {
            return Err(ProtocolError::InvalidStep);
        }
        self.ranges.push(range);
        Ok(())
    }

    /// Look up the frequency for a channel number
    ///
    /// Ranges are scanned in insertion order; the first covering range
    /// wins. Channel zero and unmapped channels return None.
    pub fn frequency(&self, channel: ChannelNumber) -> Option<u64> {
        if !channel.is_set() {
            return None;
        }
        self.ranges.iter().find_map(|r| r.frequency(channel))
    }

    /// The configured ranges
    pub fn ranges(&self) -> &[ChannelRange] {
        &self.ranges
    }

    /// Whether the map has no ranges
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
