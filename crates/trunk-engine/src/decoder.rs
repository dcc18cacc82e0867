//! Protocol decoders
//!
//! A decoder turns a stream of samples into decoded control messages. The
//! demodulation itself lives behind the `Decoder` trait; the engine feeds
//! samples in on every drain tick, polls the decoder, and drains the
//! decoded messages it produced.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use trunk_protocol::ControlMessage;

use crate::alias::AliasList;
use crate::channel::ChannelConfig;
use crate::queue::ComplexSample;
use crate::source::{CorrectionLink, SampleKind};

/// Sender on which a decoder publishes decoded messages
pub type MessageSender = mpsc::UnboundedSender<ControlMessage>;

/// A fault raised while processing samples
///
/// Drain-tick faults are contained: the tick is aborted and logged, the
/// schedule continues on the next period.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Transient processing fault local to one tick
    #[error("transient decode fault: {0}")]
    Transient(String),

    /// Sample of the wrong kind for this decoder
    #[error("decoder expects {expected:?} samples")]
    WrongSampleKind {
        /// The kind this decoder consumes
        expected: SampleKind,
    },
}

/// Token identifying a registered sample tap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TapId(pub u64);

/// Squelch state commanded by the channel state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquelchState {
    /// Audio gated off
    Squelch,
    /// Audio gated on
    Unsquelch,
}

/// Audio content classification reported by the audio output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioType {
    /// Voice traffic
    Voice,
    /// Non-voice (data/signalling) traffic
    Data,
}

/// The decoder's audio path
///
/// Receives squelch state from the channel state machine and reports audio
/// type changes back to it; both directions are mpsc-wired by the pipeline
/// when the decoder is built.
#[derive(Debug, Default)]
pub struct AudioOutput {
    squelch_rx: Option<mpsc::UnboundedReceiver<SquelchState>>,
    audio_type_tx: Option<mpsc::UnboundedSender<AudioType>>,
    squelch: Option<SquelchState>,
}

impl AudioOutput {
    /// Create an audio output with no wiring; squelched until told otherwise
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the squelch-state stream from the channel state machine
    pub fn listen_squelch(&mut self, rx: mpsc::UnboundedReceiver<SquelchState>) {
        self.squelch_rx = Some(rx);
    }

    /// Attach the audio-type listener on the channel state machine
    pub fn set_audio_type_listener(&mut self, tx: mpsc::UnboundedSender<AudioType>) {
        self.audio_type_tx = Some(tx);
    }

    /// Apply any pending squelch updates; called once per drain tick
    pub fn poll(&mut self) {
        if let Some(rx) = self.squelch_rx.as_mut() {
            while let Ok(state) = rx.try_recv() {
                self.squelch = Some(state);
            }
        }
    }

    /// Current squelch state; squelched until the state machine says otherwise
    pub fn squelch(&self) -> SquelchState {
        self.squelch.unwrap_or(SquelchState::Squelch)
    }

    /// Report an audio type change to the channel state machine
    pub fn report_audio_type(&mut self, audio_type: AudioType) {
        if let Some(tx) = &self.audio_type_tx {
            let _ = tx.send(audio_type);
        }
    }
}

/// The decoder's frequency-correction controller
///
/// Consumes measured offsets from a tuner source and feeds corrections
/// back to it. The pipeline cross-wires this with the source's
/// `CorrectionLink` at decoder build time.
#[derive(Debug, Default)]
pub struct FrequencyControl {
    link: Option<CorrectionLink>,
}

impl FrequencyControl {
    /// Create an unattached controller
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the source's correction wiring
    pub fn attach(&mut self, link: CorrectionLink) {
        self.link = Some(link);
    }

    /// Whether the controller is wired to a source
    pub fn is_attached(&self) -> bool {
        self.link.is_some()
    }

    /// The attached wiring, for decoder implementations
    pub fn link_mut(&mut self) -> Option<&mut CorrectionLink> {
        self.link.as_mut()
    }
}

/// A protocol decoder for one channel
pub trait Decoder: Send {
    /// The sample kind this decoder consumes
    fn sample_kind(&self) -> SampleKind;

    /// Process one complex baseband sample
    fn receive_complex(&mut self, _sample: ComplexSample) -> Result<(), DecodeError> {
        Err(DecodeError::WrongSampleKind {
            expected: self.sample_kind(),
        })
    }

    /// Process one real demodulated sample
    fn receive_real(&mut self, _sample: f32) -> Result<(), DecodeError> {
        Err(DecodeError::WrongSampleKind {
            expected: self.sample_kind(),
        })
    }

    /// Housekeeping hook run once per drain tick after samples were fed
    fn poll(&mut self) {}

    /// The decoder's audio path
    fn audio(&mut self) -> &mut AudioOutput;

    /// Frequency-correction controller, for decoders that track carrier
    /// offset
    fn frequency_control(&mut self) -> Option<&mut FrequencyControl> {
        None
    }

    /// Tap the decoder's real sample output (audio recorders)
    fn add_real_tap(&mut self, tap: mpsc::UnboundedSender<f32>) -> TapId;

    /// Tap the decoder's complex sample output (baseband recorders)
    fn add_complex_tap(&mut self, tap: mpsc::UnboundedSender<ComplexSample>) -> TapId;

    /// Remove a previously registered tap
    fn remove_tap(&mut self, tap: TapId);
}

/// Helper collection of sample taps for decoder implementations
#[derive(Debug, Default)]
pub struct SampleTaps {
    next_id: u64,
    real: HashMap<TapId, mpsc::UnboundedSender<f32>>,
    complex: HashMap<TapId, mpsc::UnboundedSender<ComplexSample>>,
}

impl SampleTaps {
    /// Create an empty tap set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a real sample tap
    pub fn add_real(&mut self, tap: mpsc::UnboundedSender<f32>) -> TapId {
        self.next_id += 1;
        let id = TapId(self.next_id);
        self.real.insert(id, tap);
        id
    }

    /// Register a complex sample tap
    pub fn add_complex(&mut self, tap: mpsc::UnboundedSender<ComplexSample>) -> TapId {
        self.next_id += 1;
        let id = TapId(self.next_id);
        self.complex.insert(id, tap);
        id
    }

    /// Remove a tap of either kind
    pub fn remove(&mut self, id: TapId) {
        self.real.remove(&id);
        self.complex.remove(&id);
    }

    /// Forward a real sample to every real tap, dropping closed ones
    pub fn forward_real(&mut self, sample: f32) {
        self.real.retain(|_, tap| tap.send(sample).is_ok());
    }

    /// Forward a complex sample to every complex tap, dropping closed ones
    pub fn forward_complex(&mut self, sample: ComplexSample) {
        self.complex.retain(|_, tap| tap.send(sample).is_ok());
    }
}

/// Builds decoders matched to a channel and sample kind
pub trait DecoderFactory: Send + Sync {
    /// Build a decoder, or None when the channel's decode configuration
    /// has no decoder for this sample kind
    fn build(
        &self,
        config: &ChannelConfig,
        kind: SampleKind,
        alias_list: Option<Arc<AliasList>>,
        messages: MessageSender,
    ) -> Option<Box<dyn Decoder>>;
}
