//! Event loggers
//!
//! Event loggers persist channel activity to external sinks. The log file
//! formats live behind the `EventLogger` trait; the pipeline builds one
//! logger per configured type and subscribes it to either the call event
//! timeline or the generic decoded-message broadcast.

use crate::call_event::CallEventSink;
use crate::channel::ChannelConfig;
use crate::pipeline::MessageSink;

/// The kinds of event log a channel can be configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EventLogType {
    /// Call activity timeline, fed from the channel's CallEventModel
    CallEvent,
    /// Decoded message log, fed from the generic message broadcast
    DecodedMessage,
    /// Raw binary message log, fed from the generic message broadcast
    BinaryMessage,
}

impl EventLogType {
    /// Display name for logging
    pub fn name(&self) -> &'static str {
        match self {
            EventLogType::CallEvent => "call events",
            EventLogType::DecodedMessage => "decoded messages",
            EventLogType::BinaryMessage => "binary messages",
        }
    }
}

/// A logger persisting one kind of channel activity
///
/// Exactly one of the two sinks is Some, matching the log type the
/// provider built the logger for.
pub trait EventLogger: Send {
    /// Open the log
    fn start(&mut self);

    /// Flush and close the log
    fn stop(&mut self);

    /// Call-event sink, for `EventLogType::CallEvent` loggers
    fn call_event_sink(&self) -> Option<Box<dyn CallEventSink>> {
        None
    }

    /// Message sink, for all other log types
    fn message_sink(&self) -> Option<Box<dyn MessageSink>> {
        None
    }
}

/// Builds event loggers for a channel
pub trait EventLogProvider: Send + Sync {
    /// Build a logger of the given type, or None when the type is
    /// unsupported for this channel
    fn build(&self, config: &ChannelConfig, log_type: EventLogType) -> Option<Box<dyn EventLogger>>;
}
