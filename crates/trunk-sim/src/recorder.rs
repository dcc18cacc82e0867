//! Simulated recorders
//!
//! An in-memory recorder captures the audio samples the pipeline taps
//! off the decoder, and a provider that can be told to fail exercises
//! the degraded-recording path.

use std::io;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use trunk_engine::{ChannelConfig, Recorder, RecorderProvider, RecorderSink};

struct RecorderState {
    started: bool,
    stopped: bool,
    rx: mpsc::UnboundedReceiver<f32>,
    samples: Vec<f32>,
}

/// Test-side handle to one in-memory recorder
#[derive(Clone)]
pub struct MemoryRecorderHandle {
    file_name: String,
    inner: Arc<Mutex<RecorderState>>,
}

impl MemoryRecorderHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, RecorderState> {
        self.inner.lock().expect("sim recorder lock")
    }

    /// The simulated file name
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Whether the pipeline started this recorder
    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    /// Whether the pipeline stopped this recorder
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Pull everything the tap has delivered so far
    pub fn samples(&self) -> Vec<f32> {
        let mut state = self.lock();
        while let Ok(sample) = state.rx.try_recv() {
            state.samples.push(sample);
        }
        state.samples.clone()
    }
}

struct MemoryRecorder {
    handle: MemoryRecorderHandle,
    tx: mpsc::UnboundedSender<f32>,
    fail_start: bool,
}

impl Recorder for MemoryRecorder {
    fn file_name(&self) -> &str {
        &self.handle.file_name
    }

    fn start(&mut self) -> io::Result<()> {
        if self.fail_start {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "simulated start failure",
            ));
        }
        self.handle.lock().started = true;
        Ok(())
    }

    fn stop(&mut self) -> io::Result<()> {
        self.handle.lock().stopped = true;
        Ok(())
    }

    fn sink(&self) -> RecorderSink {
        RecorderSink::Audio(self.tx.clone())
    }
}

#[derive(Default)]
struct ProviderInner {
    fail_start: bool,
    built: Vec<MemoryRecorderHandle>,
}

/// Recorder provider building one in-memory audio recorder per channel
#[derive(Clone, Default)]
pub struct SimRecorderProvider {
    inner: Arc<Mutex<ProviderInner>>,
}

impl SimRecorderProvider {
    /// A provider whose recorders start cleanly
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderInner> {
        self.inner.lock().expect("sim recorder provider lock")
    }

    /// Make every subsequent recorder fail to start
    pub fn set_fail_start(&self, fail: bool) {
        self.lock().fail_start = fail;
    }

    /// Handles for every recorder built so far
    pub fn built(&self) -> Vec<MemoryRecorderHandle> {
        self.lock().built.clone()
    }

    /// Handle for the most recently built recorder
    pub fn last(&self) -> Option<MemoryRecorderHandle> {
        self.lock().built.last().cloned()
    }
}

impl RecorderProvider for SimRecorderProvider {
    fn build(&self, config: &ChannelConfig) -> Vec<Box<dyn Recorder>> {
        let mut inner = self.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = MemoryRecorderHandle {
            file_name: format!("{}.wav", config.name),
            inner: Arc::new(Mutex::new(RecorderState {
                started: false,
                stopped: false,
                rx,
                samples: Vec::new(),
            })),
        };
        inner.built.push(handle.clone());
        vec![Box::new(MemoryRecorder {
            handle,
            tx,
            fail_start: inner.fail_start,
        })]
    }
}
