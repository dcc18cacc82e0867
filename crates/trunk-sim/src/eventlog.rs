//! Simulated event loggers
//!
//! In-memory loggers that capture what their sinks receive, so tests can
//! assert on the persisted call timeline and message traffic without
//! touching the filesystem.

use std::sync::{Arc, Mutex};

use trunk_engine::{
    CallEvent, CallEventSink, ChannelConfig, EventLogProvider, EventLogType, EventLogger,
    MessageSink,
};
use trunk_protocol::ControlMessage;

#[derive(Default)]
struct LoggerState {
    started: bool,
    stopped: bool,
    call_events: Vec<CallEvent>,
    messages: Vec<ControlMessage>,
}

/// Test-side handle to one in-memory logger
#[derive(Clone, Default)]
pub struct MemoryLoggerHandle {
    inner: Arc<Mutex<LoggerState>>,
}

impl MemoryLoggerHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, LoggerState> {
        self.inner.lock().expect("sim logger lock")
    }

    /// Whether the pipeline opened this log
    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    /// Whether the pipeline closed this log
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Call events delivered to this log, in delivery order
    pub fn call_events(&self) -> Vec<CallEvent> {
        self.lock().call_events.clone()
    }

    /// Messages delivered to this log, in delivery order
    pub fn messages(&self) -> Vec<ControlMessage> {
        self.lock().messages.clone()
    }
}

struct MemoryCallEventSink(MemoryLoggerHandle);

impl CallEventSink for MemoryCallEventSink {
    fn receive(&self, event: &CallEvent) {
        self.0.lock().call_events.push(event.clone());
    }
}

struct MemoryMessageSink(MemoryLoggerHandle);

impl MessageSink for MemoryMessageSink {
    fn receive(&self, message: &ControlMessage) {
        self.0.lock().messages.push(message.clone());
    }
}

struct MemoryEventLogger {
    log_type: EventLogType,
    handle: MemoryLoggerHandle,
}

impl EventLogger for MemoryEventLogger {
    fn start(&mut self) {
        self.handle.lock().started = true;
    }

    fn stop(&mut self) {
        self.handle.lock().stopped = true;
    }

    fn call_event_sink(&self) -> Option<Box<dyn CallEventSink>> {
        match self.log_type {
            EventLogType::CallEvent => Some(Box::new(MemoryCallEventSink(self.handle.clone()))),
            _ => None,
        }
    }

    fn message_sink(&self) -> Option<Box<dyn MessageSink>> {
        match self.log_type {
            EventLogType::DecodedMessage | EventLogType::BinaryMessage => {
                Some(Box::new(MemoryMessageSink(self.handle.clone())))
            }
            EventLogType::CallEvent => None,
        }
    }
}

#[derive(Default)]
struct ProviderInner {
    built: Vec<(String, EventLogType, MemoryLoggerHandle)>,
}

/// Event log provider building in-memory loggers
#[derive(Clone, Default)]
pub struct SimEventLogProvider {
    inner: Arc<Mutex<ProviderInner>>,
}

impl SimEventLogProvider {
    /// A provider that builds a logger for every configured type
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderInner> {
        self.inner.lock().expect("sim log provider lock")
    }

    /// Handle for the latest logger of a type built for the named channel
    pub fn handle_for(
        &self,
        channel_name: &str,
        log_type: EventLogType,
    ) -> Option<MemoryLoggerHandle> {
        self.lock()
            .built
            .iter()
            .rev()
            .find(|(name, t, _)| name == channel_name && *t == log_type)
            .map(|(_, _, handle)| handle.clone())
    }
}

impl EventLogProvider for SimEventLogProvider {
    fn build(&self, config: &ChannelConfig, log_type: EventLogType) -> Option<Box<dyn EventLogger>> {
        let handle = MemoryLoggerHandle::default();
        self.lock()
            .built
            .push((config.name.clone(), log_type, handle.clone()));
        Some(Box::new(MemoryEventLogger { log_type, handle }))
    }
}
