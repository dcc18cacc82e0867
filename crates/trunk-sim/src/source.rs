//! Simulated sample sources
//!
//! A `SimSourceProvider` hands out in-memory sources that tests push
//! batches through directly, standing in for tuner hardware. Acquisition
//! fails for a zero frequency, which is how an unmapped channel number
//! surfaces, and can be forced to fail entirely to exercise the
//! no-tuner path.

use std::sync::{Arc, Mutex};

use tracing::debug;
use trunk_engine::{
    BatchSender, ChannelConfig, ComplexBatch, ComplexSample, ComplexSource, RealBatch, RealSource,
    SampleKind, Source, SourceError, SourceProvider,
};

#[derive(Debug, Default)]
struct SourceInner {
    frequency_hz: u64,
    complex_listener: Option<BatchSender<ComplexBatch>>,
    real_listener: Option<BatchSender<RealBatch>>,
    disposed: bool,
}

/// Test-side handle to one simulated source
///
/// Lives on after the engine takes ownership of the source itself, so a
/// test can push samples and observe disposal.
#[derive(Clone, Default)]
pub struct SimSourceHandle {
    inner: Arc<Mutex<SourceInner>>,
}

impl SimSourceHandle {
    fn new(frequency_hz: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SourceInner {
                frequency_hz,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SourceInner> {
        self.inner.lock().expect("sim source lock")
    }

    /// The frequency this source was acquired for
    pub fn frequency_hz(&self) -> u64 {
        self.lock().frequency_hz
    }

    /// Whether the engine has released the source
    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    /// Whether a listener is currently attached
    pub fn has_listener(&self) -> bool {
        let inner = self.lock();
        inner.complex_listener.is_some() || inner.real_listener.is_some()
    }

    /// Push one complex batch; false when no listener is attached
    pub fn send_complex(&self, samples: Vec<ComplexSample>) -> bool {
        match &self.lock().complex_listener {
            Some(listener) => listener.send(ComplexBatch(samples)),
            None => false,
        }
    }

    /// Push one real batch; false when no listener is attached
    pub fn send_real(&self, samples: Vec<f32>) -> bool {
        match &self.lock().real_listener {
            Some(listener) => listener.send(RealBatch(samples)),
            None => false,
        }
    }
}

struct SimComplexSource {
    handle: SimSourceHandle,
}

impl ComplexSource for SimComplexSource {
    fn set_listener(&mut self, listener: BatchSender<ComplexBatch>) {
        self.handle.lock().complex_listener = Some(listener);
    }

    fn clear_listener(&mut self) {
        self.handle.lock().complex_listener = None;
    }

    fn dispose(&mut self) {
        let mut inner = self.handle.lock();
        inner.complex_listener = None;
        inner.disposed = true;
    }
}

struct SimRealSource {
    handle: SimSourceHandle,
}

impl RealSource for SimRealSource {
    fn set_listener(&mut self, listener: BatchSender<RealBatch>) {
        self.handle.lock().real_listener = Some(listener);
    }

    fn clear_listener(&mut self) {
        self.handle.lock().real_listener = None;
    }

    fn dispose(&mut self) {
        let mut inner = self.handle.lock();
        inner.real_listener = None;
        inner.disposed = true;
    }
}

#[derive(Default)]
struct ProviderInner {
    fail_all: bool,
    acquired: Vec<SimSourceHandle>,
}

/// Source provider backed by simulated tuners
pub struct SimSourceProvider {
    kind: SampleKind,
    inner: Arc<Mutex<ProviderInner>>,
}

impl SimSourceProvider {
    /// A provider handing out sources of the given sample kind
    pub fn new(kind: SampleKind) -> Self {
        Self {
            kind,
            inner: Arc::new(Mutex::new(ProviderInner::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderInner> {
        self.inner.lock().expect("sim provider lock")
    }

    /// Make every subsequent acquisition fail
    pub fn set_fail_all(&self, fail: bool) {
        self.lock().fail_all = fail;
    }

    /// How many sources have been acquired so far
    pub fn acquire_count(&self) -> usize {
        self.lock().acquired.len()
    }

    /// Handles for every acquired source, in acquisition order
    pub fn acquired(&self) -> Vec<SimSourceHandle> {
        self.lock().acquired.clone()
    }

    /// Handle for the most recently acquired source
    pub fn last(&self) -> Option<SimSourceHandle> {
        self.lock().acquired.last().cloned()
    }
}

impl SourceProvider for SimSourceProvider {
    fn acquire(&self, config: &ChannelConfig) -> Result<Source, SourceError> {
        let frequency_hz = config.source.frequency_hz().unwrap_or(0);
        let mut inner = self.lock();
        if inner.fail_all {
            return Err(SourceError::NoSourceAvailable(
                "all simulated tuners are busy".to_string(),
            ));
        }
        if frequency_hz == 0 {
            return Err(SourceError::NoSourceAvailable(
                "no tuner covers 0 Hz".to_string(),
            ));
        }

        let handle = SimSourceHandle::new(frequency_hz);
        inner.acquired.push(handle.clone());
        debug!("simulated source acquired at {} Hz", frequency_hz);

        Ok(match self.kind {
            SampleKind::Complex => Source::Complex(Box::new(SimComplexSource { handle })),
            SampleKind::Real => Source::Real(Box::new(SimRealSource { handle })),
        })
    }
}
