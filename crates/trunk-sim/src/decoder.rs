//! Simulated protocol decoders
//!
//! A `SimDecoder` counts the samples it is fed and emits whatever
//! control messages the test injects, standing in for demodulation and
//! codeword decoding. Injected messages surface on the decoder's next
//! poll, which the drain tick runs after feeding samples, so message
//! delivery follows the same path production decoders use.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use trunk_engine::{
    AliasList, AudioOutput, AudioType, ChannelConfig, ComplexSample, DecodeError, Decoder,
    DecoderFactory, MessageSender, SampleKind, SampleTaps, TapId,
};
use trunk_protocol::ControlMessage;

#[derive(Default)]
struct DecoderInner {
    complex_received: usize,
    real_received: usize,
    pending: VecDeque<ControlMessage>,
    pending_audio: VecDeque<AudioType>,
    fail_next: bool,
}

/// Test-side handle to one simulated decoder
#[derive(Clone, Default)]
pub struct SimDecoderHandle {
    inner: Arc<Mutex<DecoderInner>>,
}

impl SimDecoderHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, DecoderInner> {
        self.inner.lock().expect("sim decoder lock")
    }

    /// Queue a message to emit on the decoder's next poll
    pub fn inject(&self, message: ControlMessage) {
        self.lock().pending.push_back(message);
    }

    /// Queue an audio type report for the decoder's next poll
    pub fn report_audio_type(&self, audio_type: AudioType) {
        self.lock().pending_audio.push_back(audio_type);
    }

    /// Fail the next sample with a transient decode fault
    pub fn fail_next_sample(&self) {
        self.lock().fail_next = true;
    }

    /// Complex samples received so far
    pub fn complex_received(&self) -> usize {
        self.lock().complex_received
    }

    /// Real samples received so far
    pub fn real_received(&self) -> usize {
        self.lock().real_received
    }
}

struct SimDecoder {
    kind: SampleKind,
    handle: SimDecoderHandle,
    messages: MessageSender,
    audio: AudioOutput,
    taps: SampleTaps,
}

impl SimDecoder {
    fn check_fault(&self) -> Result<(), DecodeError> {
        let mut inner = self.handle.lock();
        if inner.fail_next {
            inner.fail_next = false;
            return Err(DecodeError::Transient("injected fault".to_string()));
        }
        Ok(())
    }
}

impl Decoder for SimDecoder {
    fn sample_kind(&self) -> SampleKind {
        self.kind
    }

    fn receive_complex(&mut self, sample: ComplexSample) -> Result<(), DecodeError> {
        if self.kind != SampleKind::Complex {
            return Err(DecodeError::WrongSampleKind {
                expected: self.kind,
            });
        }
        self.check_fault()?;
        self.handle.lock().complex_received += 1;
        self.taps.forward_complex(sample);
        Ok(())
    }

    fn receive_real(&mut self, sample: f32) -> Result<(), DecodeError> {
        if self.kind != SampleKind::Real {
            return Err(DecodeError::WrongSampleKind {
                expected: self.kind,
            });
        }
        self.check_fault()?;
        self.handle.lock().real_received += 1;
        self.taps.forward_real(sample);
        Ok(())
    }

    fn poll(&mut self) {
        loop {
            let message = self.handle.lock().pending.pop_front();
            match message {
                Some(message) => {
                    let _ = self.messages.send(message);
                }
                None => break,
            }
        }
        loop {
            let audio_type = self.handle.lock().pending_audio.pop_front();
            match audio_type {
                Some(audio_type) => self.audio.report_audio_type(audio_type),
                None => break,
            }
        }
    }

    fn audio(&mut self) -> &mut AudioOutput {
        &mut self.audio
    }

    fn add_real_tap(&mut self, tap: tokio::sync::mpsc::UnboundedSender<f32>) -> TapId {
        self.taps.add_real(tap)
    }

    fn add_complex_tap(
        &mut self,
        tap: tokio::sync::mpsc::UnboundedSender<ComplexSample>,
    ) -> TapId {
        self.taps.add_complex(tap)
    }

    fn remove_tap(&mut self, tap: TapId) {
        self.taps.remove(tap);
    }
}

#[derive(Default)]
struct FactoryInner {
    build_none: bool,
    built: Vec<(String, SimDecoderHandle)>,
}

/// Decoder factory handing out simulated decoders
///
/// Handles are recorded per channel name so a test can inject through the
/// control channel's decoder and a spawned traffic channel's decoder
/// independently.
#[derive(Clone, Default)]
pub struct SimDecoderFactory {
    inner: Arc<Mutex<FactoryInner>>,
}

impl SimDecoderFactory {
    /// A factory that builds a decoder for every request
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FactoryInner> {
        self.inner.lock().expect("sim factory lock")
    }

    /// Make the factory decline every subsequent build
    pub fn set_build_none(&self, build_none: bool) {
        self.lock().build_none = build_none;
    }

    /// How many decoders have been built
    pub fn build_count(&self) -> usize {
        self.lock().built.len()
    }

    /// Handle for the decoder built for the named channel, latest first
    pub fn handle_for(&self, channel_name: &str) -> Option<SimDecoderHandle> {
        self.lock()
            .built
            .iter()
            .rev()
            .find(|(name, _)| name == channel_name)
            .map(|(_, handle)| handle.clone())
    }

    /// Handle for the most recently built decoder
    pub fn last(&self) -> Option<SimDecoderHandle> {
        self.lock().built.last().map(|(_, handle)| handle.clone())
    }
}

impl DecoderFactory for SimDecoderFactory {
    fn build(
        &self,
        config: &ChannelConfig,
        kind: SampleKind,
        _alias_list: Option<Arc<AliasList>>,
        messages: MessageSender,
    ) -> Option<Box<dyn Decoder>> {
        let mut inner = self.lock();
        if inner.build_none {
            return None;
        }
        let handle = SimDecoderHandle::default();
        inner.built.push((config.name.clone(), handle.clone()));
        Some(Box::new(SimDecoder {
            kind,
            handle,
            messages,
            audio: AudioOutput::new(),
            taps: SampleTaps::new(),
        }))
    }
}
