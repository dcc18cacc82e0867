//! Trunked Radio Channel Engine
//!
//! This crate provides the channel processing engine for following a
//! trunked radio system's control traffic: the per-channel sample
//! distribution pipeline and the protocol state machine that drives call
//! tracking and traffic channel allocation.
//!
//! # Architecture
//!
//! Each monitored channel is a `ChannelPipeline` assembling a sample
//! source, a protocol decoder, recorders, and event loggers. Sources push
//! sample batches into an unbounded queue from their own threads; a
//! fixed-rate drain task moves a bounded number of batches into the
//! decoder every period, so producers never block on consumers.
//!
//! Decoded messages fan out through a `MessageBroadcaster` to the
//! channel's `TrunkingChannelState`, which drives:
//!
//! - The channel state machine (`Idle`, `Control`, `Call`, `Fade`, ...)
//! - The shared `CallEventModel` timeline of network activity
//! - Traffic channel allocation through the `ChannelRegistry` when the
//!   control channel grants a call
//!
//! # Channel Registry
//!
//! The `ChannelRegistry` owns every channel and hands out identifiers
//! rather than references. A control channel and the traffic channels it
//! spawns share one call event timeline, so a call granted on the control
//! channel and ended on the traffic channel is a single timeline entry.
//!
//! # Example
//!
//! ```rust,ignore
//! use trunk_engine::{ChannelConfig, ChannelRegistry, ChannelServices, EventBus};
//!
//! let events = EventBus::new();
//! let registry = ChannelRegistry::new(services, events);
//!
//! let control = registry.create(ChannelConfig::standard("Site 1", 453_150_000));
//! registry.set_enabled(control, true)?;
//! ```

pub mod alias;
pub mod call_event;
pub mod channel;
pub mod decoder;
pub mod error;
pub mod eventlog;
pub mod events;
pub mod pipeline;
pub mod queue;
pub mod recorder;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod state;
pub mod trunking;

// Re-export channel and registry types
pub use channel::{Channel, ChannelConfig, ChannelId, ChannelType, DecodeConfig, SourceConfig};
pub use registry::{ChannelRegistry, TrafficSpawn};

// Re-export pipeline types
pub use pipeline::{
    ChannelPipeline, ChannelServices, ListenerId, MessageBroadcaster, MessageSink,
    StateMachineSink,
};
pub use queue::{
    batch_queue, BatchQueue, BatchSender, ComplexBatch, ComplexSample, RealBatch,
    COMPLEX_DRAIN_MAX, DRAIN_PERIOD, REAL_DRAIN_MAX,
};

// Re-export state machine types
pub use state::{ChannelState, SquelchToken, StateCore};
pub use trunking::TrunkingChannelState;

// Re-export event types
pub use call_event::{
    CallEvent, CallEventId, CallEventModel, CallEventSink, CallEventType, SubscriptionId,
};
pub use events::{ChannelEvent, EventBus};

// Re-export collaborator seams
pub use alias::{AliasDirectory, AliasList};
pub use decoder::{
    AudioOutput, AudioType, DecodeError, Decoder, DecoderFactory, FrequencyControl,
    MessageSender, SampleTaps, SquelchState, TapId,
};
pub use error::ChannelError;
pub use eventlog::{EventLogProvider, EventLogType, EventLogger};
pub use recorder::{Recorder, RecorderProvider, RecorderSink};
pub use scheduler::{ScheduleError, Scheduler, Task, TaskId, TokioScheduler};
pub use source::{
    ComplexSource, CorrectionLink, FrequencyOffset, RealSource, SampleKind, Source, SourceError,
    SourceProvider,
};
