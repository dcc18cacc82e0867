//! Trunking Engine Simulation Library
//!
//! This crate provides simulated collaborators for testing the channel
//! engine without SDR hardware. It includes:
//!
//! - **SimSourceProvider**: in-memory sample sources tests push batches into
//! - **SimDecoderFactory**: decoders that emit test-injected control messages
//! - **ManualScheduler**: drain ticks run only when the test says so
//! - **In-memory recorders and event loggers** with inspectable handles
//!
//! # Example
//!
//! ```rust,ignore
//! use trunk_sim::{ManualScheduler, SimDecoderFactory, SimSourceProvider};
//! use trunk_engine::SampleKind;
//!
//! let sources = SimSourceProvider::new(SampleKind::Complex);
//! let decoders = SimDecoderFactory::new();
//! let scheduler = ManualScheduler::new();
//!
//! // Wire these into ChannelServices, register a channel, then:
//! // decoders.handle_for("control").unwrap().inject(message);
//! // scheduler.tick_all();
//! ```

pub mod alias;
pub mod decoder;
pub mod eventlog;
pub mod recorder;
pub mod scheduler;
pub mod source;

pub use alias::StaticAliasDirectory;
pub use decoder::{SimDecoderFactory, SimDecoderHandle};
pub use eventlog::{MemoryLoggerHandle, SimEventLogProvider};
pub use recorder::{MemoryRecorderHandle, SimRecorderProvider};
pub use scheduler::ManualScheduler;
pub use source::{SimSourceHandle, SimSourceProvider};
