//! Call events and the shared call event timeline
//!
//! Every piece of trunking activity a channel decodes (registration,
//! request, status, call start and end) becomes a `CallEvent` appended to
//! a `CallEventModel`. A control channel and the traffic channels it
//! spawns write to one shared model, so the model is a cheaply clonable
//! handle over internally synchronized state rather than an exclusively
//! owned value.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use trunk_protocol::{ChannelNumber, Ident};

use crate::alias::AliasList;

/// The kind of trunking activity a call event records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEventType {
    /// A unit registered on the network
    Register,
    /// A non-registration acknowledgement
    Acknowledge,
    /// The system requested a unit to call
    Request,
    /// A status or short data report
    Status,
    /// A call started on a traffic channel
    Call,
    /// A call was granted but no tuner was available to follow it
    CallNoTuner,
    /// A call ended
    CallEnd,
    /// A short data message
    Sdm,
}

impl CallEventType {
    /// Display label
    pub fn label(&self) -> &'static str {
        match self {
            CallEventType::Register => "REGISTER",
            CallEventType::Acknowledge => "ACKNOWLEDGE",
            CallEventType::Request => "REQUEST",
            CallEventType::Status => "STATUS",
            CallEventType::Call => "CALL",
            CallEventType::CallNoTuner => "CALL - NO TUNER",
            CallEventType::CallEnd => "CALL END",
            CallEventType::Sdm => "SDM",
        }
    }
}

impl fmt::Display for CallEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identifier of an event within its model, used for end-marking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallEventId(pub u64);

/// Token for a subscribed sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// One timestamped record of trunking activity
///
/// Immutable after creation except for the end time, which the model sets
/// exactly once through `set_end`.
#[derive(Debug, Clone)]
pub struct CallEvent {
    /// Identifier within the owning model
    pub id: CallEventId,
    /// What happened
    pub event_type: CallEventType,
    /// Logical channel the activity occurred on; UNSET when unknown
    pub channel: ChannelNumber,
    /// Mapped frequency in Hz, when the channel map knows it
    pub frequency_hz: Option<u64>,
    /// Originating ident
    pub from: Option<Ident>,
    /// Destination ident
    pub to: Option<Ident>,
    /// Protocol-supplied details text
    pub details: Option<String>,
    /// Alias list for resolving idents to names
    pub alias_list: Option<Arc<AliasList>>,
    /// When the event was created
    pub start: SystemTime,
    /// When the event ended; None while in progress
    pub end: Option<SystemTime>,
}

/// Builder for a call event; the model assigns id and start time on add
#[derive(Debug, Default)]
pub struct CallEventBuilder {
    event_type: Option<CallEventType>,
    channel: ChannelNumber,
    frequency_hz: Option<u64>,
    from: Option<Ident>,
    to: Option<Ident>,
    details: Option<String>,
    alias_list: Option<Arc<AliasList>>,
}

impl CallEvent {
    /// Start building an event of the given type
    pub fn builder(event_type: CallEventType) -> CallEventBuilder {
        CallEventBuilder {
            event_type: Some(event_type),
            channel: ChannelNumber::UNSET,
            ..Default::default()
        }
    }
}

impl CallEventBuilder {
    /// Logical channel number
    pub fn channel(mut self, channel: ChannelNumber) -> Self {
        self.channel = channel;
        self
    }

    /// Mapped frequency in Hz
    pub fn frequency(mut self, hz: Option<u64>) -> Self {
        self.frequency_hz = hz;
        self
    }

    /// Originating ident
    pub fn from(mut self, from: Option<Ident>) -> Self {
        self.from = from;
        self
    }

    /// Destination ident
    pub fn to(mut self, to: Option<Ident>) -> Self {
        self.to = to;
        self
    }

    /// Details text
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Alias list reference
    pub fn alias_list(mut self, alias_list: Option<Arc<AliasList>>) -> Self {
        self.alias_list = alias_list;
        self
    }

    fn build(self, id: CallEventId) -> CallEvent {
        CallEvent {
            id,
            event_type: self.event_type.expect("builder created with a type"),
            channel: self.channel,
            frequency_hz: self.frequency_hz,
            from: self.from,
            to: self.to,
            details: self.details,
            alias_list: self.alias_list,
            start: SystemTime::now(),
            end: None,
        }
    }
}

/// A sink receiving each event synchronously at append time
///
/// Sinks run under the model lock and must not call back into the model.
pub trait CallEventSink: Send {
    /// Receive a newly appended or newly ended event
    fn receive(&self, event: &CallEvent);
}

struct ModelInner {
    next_event: u64,
    next_sub: u64,
    events: Vec<CallEvent>,
    subscribers: Vec<(SubscriptionId, Box<dyn CallEventSink>)>,
}

/// Shared, append-only call event timeline
///
/// Clones share one timeline; a control channel and its spawned traffic
/// channels all hold clones of the same model and may append from their
/// own drain threads concurrently.
#[derive(Clone)]
pub struct CallEventModel {
    inner: Arc<Mutex<ModelInner>>,
}

impl Default for CallEventModel {
    fn default() -> Self {
        Self::new()
    }
}

impl CallEventModel {
    /// Create an empty timeline
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ModelInner {
                next_event: 0,
                next_sub: 0,
                events: Vec::new(),
                subscribers: Vec::new(),
            })),
        }
    }

    /// Whether two handles share one timeline
    pub fn same_model(&self, other: &CallEventModel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Append an event and notify subscribers; returns its id
    pub fn add(&self, builder: CallEventBuilder) -> CallEventId {
        let mut inner = self.inner.lock().expect("call event model lock");
        inner.next_event += 1;
        let id = CallEventId(inner.next_event);
        let event = builder.build(id);
        for (_, sink) in &inner.subscribers {
            sink.receive(&event);
        }
        inner.events.push(event);
        id
    }

    /// Mark an event ended, exactly once
    ///
    /// Returns false without notifying when the event is unknown or
    /// already ended, so redundant teardown messages cannot double-end a
    /// call.
    pub fn set_end(&self, id: CallEventId) -> bool {
        let mut inner = self.inner.lock().expect("call event model lock");
        let Some(index) = inner.events.iter().position(|e| e.id == id) else {
            return false;
        };
        if inner.events[index].end.is_some() {
            return false;
        }
        inner.events[index].end = Some(SystemTime::now());
        let event = inner.events[index].clone();
        for (_, sink) in &inner.subscribers {
            sink.receive(&event);
        }
        true
    }

    /// Subscribe a sink to receive each event at append and end time
    pub fn subscribe(&self, sink: Box<dyn CallEventSink>) -> SubscriptionId {
        let mut inner = self.inner.lock().expect("call event model lock");
        inner.next_sub += 1;
        let id = SubscriptionId(inner.next_sub);
        inner.subscribers.push((id, sink));
        id
    }

    /// Remove a subscription; unknown tokens are ignored
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().expect("call event model lock");
        inner.subscribers.retain(|(sub, _)| *sub != id);
    }

    /// Re-deliver the retained timeline to every subscriber
    ///
    /// The persist signal sent when a standard channel stops, so a log
    /// sink attached late still receives the full timeline.
    pub fn flush(&self) {
        let inner = self.inner.lock().expect("call event model lock");
        for event in &inner.events {
            for (_, sink) in &inner.subscribers {
                sink.receive(event);
            }
        }
    }

    /// Number of events in the timeline
    pub fn len(&self) -> usize {
        self.inner.lock().expect("call event model lock").events.len()
    }

    /// Whether the timeline is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the timeline
    pub fn events(&self) -> Vec<CallEvent> {
        self.inner
            .lock()
            .expect("call event model lock")
            .events
            .clone()
    }
}
