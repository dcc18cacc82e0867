//! Channel identity and configuration
//!
//! A channel is the unit of monitoring: one frequency, one decode
//! configuration, and the pipeline built from them. Standard channels come
//! from user configuration; traffic channels are created dynamically by a
//! control channel when the protocol grants a call.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use trunk_protocol::{ChannelMap, ChannelNumber};

use crate::eventlog::EventLogType;

/// Unique identifier for a channel in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

/// Whether a channel was configured or dynamically spawned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelType {
    /// Configured long-running channel (control or conventional)
    Standard,
    /// Dynamically allocated channel following one call
    Traffic,
}

/// Where a channel's samples come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceConfig {
    /// A tuner channel at a fixed frequency
    Tuner {
        /// Center frequency in Hz
        frequency_hz: u64,
    },
}

impl SourceConfig {
    /// The configured frequency, when the source has one
    pub fn frequency_hz(&self) -> Option<u64> {
        match self {
            SourceConfig::Tuner { frequency_hz } => Some(*frequency_hz),
        }
    }
}

/// Decode configuration for a trunking channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeConfig {
    /// Channel number to frequency map for the monitored site
    pub channel_map: ChannelMap,
}

/// Full configuration of one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Display name
    pub name: String,
    /// Standard (configured) or traffic (spawned)
    pub channel_type: ChannelType,
    /// Whether the channel should be running
    pub enabled: bool,
    /// Sample source configuration
    pub source: SourceConfig,
    /// Decode configuration
    pub decode: DecodeConfig,
    /// Name of the alias list to resolve idents against
    pub alias_list: Option<String>,
    /// System name, copied onto spawned traffic channels
    pub system: String,
    /// Site name, copied onto spawned traffic channels
    pub site: String,
    /// Event log types to run while the channel is enabled
    pub event_logs: Vec<EventLogType>,
    /// Whether to build recorders while the channel is enabled
    pub recording: bool,
}

impl ChannelConfig {
    /// A minimal standard channel configuration
    pub fn standard(name: impl Into<String>, frequency_hz: u64) -> Self {
        Self {
            name: name.into(),
            channel_type: ChannelType::Standard,
            enabled: false,
            source: SourceConfig::Tuner { frequency_hz },
            decode: DecodeConfig::default(),
            alias_list: None,
            system: String::new(),
            site: String::new(),
            event_logs: Vec::new(),
            recording: false,
        }
    }
}

/// A channel entity owned by the registry
///
/// A control channel tracks the traffic channels it has spawned by
/// identifier, keyed by the granted channel number, so a recurring grant
/// for an active call never allocates a second channel.
#[derive(Debug)]
pub struct Channel {
    /// Registry identifier
    pub id: ChannelId,
    /// Current configuration
    pub config: ChannelConfig,
    traffic: HashMap<ChannelNumber, ChannelId>,
}

impl Channel {
    /// Create a channel entity
    pub fn new(id: ChannelId, config: ChannelConfig) -> Self {
        Self {
            id,
            config,
            traffic: HashMap::new(),
        }
    }

    /// Whether a traffic channel exists for the given channel number
    pub fn has_traffic_channel(&self, number: ChannelNumber) -> bool {
        self.traffic.contains_key(&number)
    }

    /// Record a spawned traffic channel under its channel number
    pub fn add_traffic_channel(&mut self, number: ChannelNumber, id: ChannelId) {
        self.traffic.insert(number, id);
    }

    /// Remove the traffic channel record for a channel number
    pub fn remove_traffic_channel(&mut self, number: ChannelNumber) -> Option<ChannelId> {
        self.traffic.remove(&number)
    }

    /// The spawned traffic channels, by channel number
    pub fn traffic_channels(&self) -> impl Iterator<Item = (ChannelNumber, ChannelId)> + '_ {
        self.traffic.iter().map(|(n, id)| (*n, *id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traffic_channel_tracking() {
        let mut channel = Channel::new(ChannelId(1), ChannelConfig::standard("Control", 177_050_000));

        assert!(!channel.has_traffic_channel(ChannelNumber(5)));
        channel.add_traffic_channel(ChannelNumber(5), ChannelId(2));
        assert!(channel.has_traffic_channel(ChannelNumber(5)));

        assert_eq!(
            channel.remove_traffic_channel(ChannelNumber(5)),
            Some(ChannelId(2))
        );
        assert!(!channel.has_traffic_channel(ChannelNumber(5)));
    }

    #[test]
    fn config_serde_round_trip() {
        let mut config = ChannelConfig::standard("Control", 177_050_000);
        config.event_logs = vec![EventLogType::CallEvent, EventLogType::DecodedMessage];

        let json = serde_json::to_string(&config).unwrap();
        let back: ChannelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "Control");
        assert_eq!(back.source, SourceConfig::Tuner { frequency_hz: 177_050_000 });
        assert_eq!(back.event_logs.len(), 2);
    }
}
