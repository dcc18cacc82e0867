//! Unified channel event stream
//!
//! Everything observable about a channel (state transitions, attribute
//! changes, traffic channel spawns, contained errors) is emitted through
//! one event type, so monitors subscribe once and see a consistent
//! ordering per channel.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use trunk_protocol::{ChannelNumber, Ident, SiteId};

use crate::channel::ChannelId;
use crate::state::ChannelState;

/// An observable change on one channel
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The control channel identified (or re-identified) its site
    SiteChanged {
        /// Channel reporting the change
        channel: ChannelId,
        /// Newly observed site identity
        site: SiteId,
    },

    /// The from-talkgroup changed (set or cleared)
    FromTalkgroupChanged {
        channel: ChannelId,
        from: Option<Ident>,
    },

    /// The to-talkgroup changed (set or cleared)
    ToTalkgroupChanged {
        channel: ChannelId,
        to: Option<Ident>,
    },

    /// The logical channel number was assigned
    ChannelNumberChanged {
        channel: ChannelId,
        number: ChannelNumber,
    },

    /// The channel state machine transitioned
    StateChanged {
        channel: ChannelId,
        from: ChannelState,
        to: ChannelState,
    },

    /// A control channel spawned a traffic channel for a granted call
    TrafficChannelSpawned {
        /// The control channel that processed the grant
        parent: ChannelId,
        /// The new traffic channel
        traffic: ChannelId,
        /// Granted logical channel number
        number: ChannelNumber,
    },

    /// A pipeline started
    PipelineStarted { channel: ChannelId },

    /// A pipeline stopped
    PipelineStopped { channel: ChannelId },

    /// A contained failure in one collaborator
    Error {
        /// Channel the failure occurred on
        channel: ChannelId,
        /// Failing collaborator ("Source", "Recorder", ...)
        source: String,
        /// Error message
        message: String,
    },
}

impl ChannelEvent {
    /// The channel this event concerns
    pub fn channel_id(&self) -> ChannelId {
        match self {
            ChannelEvent::SiteChanged { channel, .. }
            | ChannelEvent::FromTalkgroupChanged { channel, .. }
            | ChannelEvent::ToTalkgroupChanged { channel, .. }
            | ChannelEvent::ChannelNumberChanged { channel, .. }
            | ChannelEvent::StateChanged { channel, .. }
            | ChannelEvent::PipelineStarted { channel }
            | ChannelEvent::PipelineStopped { channel }
            | ChannelEvent::Error { channel, .. } => *channel,
            ChannelEvent::TrafficChannelSpawned { parent, .. } => *parent,
        }
    }

    /// Whether this is a pipeline lifecycle event
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            ChannelEvent::PipelineStarted { .. } | ChannelEvent::PipelineStopped { .. }
        )
    }
}

/// Broadcast bus for channel events
///
/// Cheap to clone; every pipeline and state machine in a registry emits
/// into the same bus. Subscribers receive events over an unbounded
/// channel, so emitters never block.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ChannelEvent>>>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all events emitted after this call
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ChannelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().expect("event bus lock").push(tx);
        rx
    }

    /// Emit an event to every live subscriber
    pub fn emit(&self, event: ChannelEvent) {
        self.subscribers
            .lock()
            .expect("event bus lock")
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
