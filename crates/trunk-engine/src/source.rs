//! Sample sources
//!
//! A source is the SDR front end for one channel: it runs on its own
//! threads and pushes batches of samples into the pipeline's queue. The
//! tuner hardware itself lives behind the `SourceProvider` boundary; the
//! engine only sees the two sample kinds as a closed tagged union.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::channel::ChannelConfig;
use crate::queue::{BatchSender, ComplexBatch, RealBatch};

/// The kind of samples a source produces and a decoder consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// Complex (I/Q) baseband samples
    Complex,
    /// Real (already demodulated) samples
    Real,
}

/// A frequency offset in Hz, as measured by a source or commanded by a
/// decoder's frequency-correction controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyOffset(pub i64);

/// Bidirectional frequency-correction wiring exposed by a tuner source
///
/// The decoder's correction controller consumes the measurement stream and
/// feeds corrections back to the source.
#[derive(Debug)]
pub struct CorrectionLink {
    /// Measured offsets, source to decoder
    pub measurements: mpsc::UnboundedReceiver<FrequencyOffset>,
    /// Correction commands, decoder to source
    pub corrections: mpsc::UnboundedSender<FrequencyOffset>,
}

/// A source producing complex baseband samples
pub trait ComplexSource: Send {
    /// Attach the pipeline's queue as this source's sample listener
    fn set_listener(&mut self, listener: BatchSender<ComplexBatch>);

    /// Detach the current listener; subsequent batches are dropped
    fn clear_listener(&mut self);

    /// Frequency-correction wiring, for tuner-backed sources that support
    /// it; may only be taken once
    fn correction_link(&mut self) -> Option<CorrectionLink> {
        None
    }

    /// Release the underlying tuner channel
    fn dispose(&mut self);
}

/// A source producing real demodulated samples
pub trait RealSource: Send {
    /// Attach the pipeline's queue as this source's sample listener
    fn set_listener(&mut self, listener: BatchSender<RealBatch>);

    /// Detach the current listener; subsequent batches are dropped
    fn clear_listener(&mut self);

    /// Release the underlying device
    fn dispose(&mut self);
}

/// A live sample source of either kind
pub enum Source {
    /// Complex baseband source
    Complex(Box<dyn ComplexSource>),
    /// Real demodulated source
    Real(Box<dyn RealSource>),
}

impl Source {
    /// The sample kind this source produces
    pub fn kind(&self) -> SampleKind {
        match self {
            Source::Complex(_) => SampleKind::Complex,
            Source::Real(_) => SampleKind::Real,
        }
    }

    /// Detach the current sample listener, if any
    pub fn clear_listener(&mut self) {
        match self {
            Source::Complex(s) => s.clear_listener(),
            Source::Real(s) => s.clear_listener(),
        }
    }

    /// Release the underlying device
    pub fn dispose(&mut self) {
        match self {
            Source::Complex(s) => s.dispose(),
            Source::Real(s) => s.dispose(),
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Source").field(&self.kind()).finish()
    }
}

/// Errors raised while acquiring a source
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// No tuner or device can service the requested configuration
    #[error("no source available: {0}")]
    NoSourceAvailable(String),
}

/// Hands out sources for channel pipelines
///
/// Acquisition fails fast; a failed acquisition leaves the pipeline
/// sourceless and the channel state machine in `NoTuner`.
pub trait SourceProvider: Send + Sync {
    /// Acquire a source for the channel described by `config`
    fn acquire(&self, config: &ChannelConfig) -> Result<Source, SourceError>;
}
