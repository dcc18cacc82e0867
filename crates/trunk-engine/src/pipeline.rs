//! Channel processing pipeline
//!
//! Assembles the collaborators for one channel (source, decoder,
//! recorders, event loggers, state machine) and runs the drain loop that
//! moves batched samples from the source's threads into the decoder every
//! period. Sources push into an unbounded queue and never block; the
//! scheduled drain task pulls a bounded number of batches per tick.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use trunk_protocol::ControlMessage;

use crate::alias::AliasDirectory;
use crate::call_event::CallEventModel;
use crate::channel::{ChannelConfig, ChannelId, ChannelType};
use crate::decoder::{Decoder, DecoderFactory, TapId};
use crate::error::ChannelError;
use crate::eventlog::{EventLogProvider, EventLogger};
use crate::events::{ChannelEvent, EventBus};
use crate::queue::{
    batch_queue, BatchQueue, ComplexBatch, RealBatch, COMPLEX_DRAIN_MAX, DRAIN_PERIOD,
    REAL_DRAIN_MAX,
};
use crate::recorder::{Recorder, RecorderProvider, RecorderSink};
use crate::scheduler::{Scheduler, Task, TaskId};
use crate::source::{SampleKind, Source, SourceProvider};
use crate::state::{ChannelState, SquelchToken};
use crate::trunking::TrunkingChannelState;

/// A synchronous listener for decoded messages
///
/// Sinks run on the drain tick under the broadcaster lock; they must not
/// add or remove listeners from inside `receive`.
pub trait MessageSink: Send {
    /// Receive one decoded message, valid or not
    fn receive(&self, message: &ControlMessage);
}

/// Token for a registered message listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

#[derive(Default)]
struct BroadcasterInner {
    next_id: u64,
    listeners: Vec<(ListenerId, Box<dyn MessageSink>)>,
}

/// Fan-out point for a channel's decoded messages
///
/// Clonable handle; the drain tick broadcasts through one clone while the
/// pipeline adds and removes listeners through another.
#[derive(Clone, Default)]
pub struct MessageBroadcaster {
    inner: Arc<Mutex<BroadcasterInner>>,
}

impl MessageBroadcaster {
    /// Create an empty broadcaster
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; returns the token for later removal
    pub fn add(&self, sink: Box<dyn MessageSink>) -> ListenerId {
        let mut inner = self.inner.lock().expect("broadcaster lock");
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner.listeners.push((id, sink));
        id
    }

    /// Remove a listener; unknown tokens are ignored
    pub fn remove(&self, id: ListenerId) {
        let mut inner = self.inner.lock().expect("broadcaster lock");
        inner.listeners.retain(|(listener, _)| *listener != id);
    }

    /// Deliver one message to every listener
    pub fn broadcast(&self, message: &ControlMessage) {
        let inner = self.inner.lock().expect("broadcaster lock");
        for (_, sink) in &inner.listeners {
            sink.receive(message);
        }
    }
}

/// Message sink that drives a channel state machine
///
/// Invalid messages are filtered here: they still reach generic listeners
/// (traffic logs want them) but never the state machine.
pub struct StateMachineSink {
    state: Arc<Mutex<TrunkingChannelState>>,
}

impl StateMachineSink {
    /// Wrap a shared state machine
    pub fn new(state: Arc<Mutex<TrunkingChannelState>>) -> Self {
        Self { state }
    }
}

impl MessageSink for StateMachineSink {
    fn receive(&self, message: &ControlMessage) {
        if message.valid {
            self.state
                .lock()
                .expect("channel state lock")
                .receive(message);
        }
    }
}

/// The shared services every pipeline is built from
///
/// Injected at registry construction so tests can substitute simulated
/// sources, decoders, and a deterministic scheduler.
#[derive(Clone)]
pub struct ChannelServices {
    /// Tuner and device acquisition
    pub sources: Arc<dyn SourceProvider>,
    /// Protocol decoder construction
    pub decoders: Arc<dyn DecoderFactory>,
    /// Recorder construction
    pub recorders: Arc<dyn RecorderProvider>,
    /// Event logger construction
    pub event_logs: Arc<dyn EventLogProvider>,
    /// Alias list resolution
    pub aliases: Arc<dyn AliasDirectory>,
    /// Fixed-rate drain task scheduling
    pub scheduler: Arc<dyn Scheduler>,
}

struct RecorderEntry {
    recorder: Box<dyn Recorder>,
    tap: Option<TapId>,
}

struct LoggerEntry {
    logger: Box<dyn EventLogger>,
    subscription: Option<crate::call_event::SubscriptionId>,
    listener: Option<ListenerId>,
}

/// The live decoder and its message stream, shared with the drain tick
///
/// The tick reads through this slot on every run, so replacing the
/// decoder on a running pipeline takes effect on the next tick without
/// rescheduling the task.
#[derive(Default)]
struct DecoderSlot {
    decoder: Option<Box<dyn Decoder>>,
    messages: Option<mpsc::UnboundedReceiver<ControlMessage>>,
}

struct PipelineInner {
    id: ChannelId,
    config: ChannelConfig,
    services: ChannelServices,
    events: EventBus,
    call_events: CallEventModel,
    state: Option<Arc<Mutex<TrunkingChannelState>>>,
    broadcaster: MessageBroadcaster,
    source: Option<Source>,
    slot: Arc<Mutex<DecoderSlot>>,
    squelch_token: Option<SquelchToken>,
    task: Option<TaskId>,
    recorders: Vec<RecorderEntry>,
    loggers: Vec<LoggerEntry>,
    running: bool,
    disposed: bool,
}

/// Clonable handle to one channel's processing pipeline
///
/// All operations lock internally; the registry, the drain tick, and
/// monitors may hold clones concurrently. The tick itself never takes the
/// pipeline lock, so a slow reconfiguration cannot stall sample delivery.
#[derive(Clone)]
pub struct ChannelPipeline {
    inner: Arc<Mutex<PipelineInner>>,
}

impl ChannelPipeline {
    /// Build a stopped pipeline for a channel
    pub fn new(
        id: ChannelId,
        config: ChannelConfig,
        services: ChannelServices,
        events: EventBus,
        call_events: CallEventModel,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PipelineInner {
                id,
                config,
                services,
                events,
                call_events,
                state: None,
                broadcaster: MessageBroadcaster::new(),
                source: None,
                slot: Arc::new(Mutex::new(DecoderSlot::default())),
                squelch_token: None,
                task: None,
                recorders: Vec::new(),
                loggers: Vec::new(),
                running: false,
                disposed: false,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PipelineInner> {
        self.inner.lock().expect("pipeline lock")
    }

    /// The channel this pipeline processes
    pub fn channel_id(&self) -> ChannelId {
        self.lock().id
    }

    /// The channel configuration this pipeline was built from
    pub fn config(&self) -> ChannelConfig {
        self.lock().config.clone()
    }

    /// Record the channel's enabled flag; `start` refuses a disabled channel
    pub fn set_enabled(&self, enabled: bool) {
        self.lock().config.enabled = enabled;
    }

    /// Whether the pipeline has been started and not stopped
    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Whether the pipeline is running with a live source attached
    pub fn is_processing(&self) -> bool {
        let inner = self.lock();
        inner.running && inner.source.is_some()
    }

    /// The call event timeline this pipeline's loggers subscribe to
    pub fn call_events(&self) -> CallEventModel {
        self.lock().call_events.clone()
    }

    /// Attach the state machine and register it as a message listener
    pub fn set_state_machine(&self, state: Arc<Mutex<TrunkingChannelState>>) {
        let mut inner = self.lock();
        inner.broadcaster.add(Box::new(StateMachineSink::new(Arc::clone(&state))));
        inner.state = Some(state);
    }

    /// Replace the call event timeline, on the pipeline and its state core
    ///
    /// Used to rewire a spawned traffic channel onto its parent control
    /// channel's shared timeline before the pipeline starts.
    pub fn set_call_event_model(&self, model: CallEventModel) {
        let mut inner = self.lock();
        if let Some(state) = &inner.state {
            state
                .lock()
                .expect("channel state lock")
                .core_mut()
                .set_call_event_model(model.clone());
        }
        inner.call_events = model;
    }

    /// Register a generic message listener
    pub fn add_message_listener(&self, sink: Box<dyn MessageSink>) -> ListenerId {
        self.lock().broadcaster.add(sink)
    }

    /// Remove a previously registered message listener
    pub fn remove_message_listener(&self, id: ListenerId) {
        self.lock().broadcaster.remove(id)
    }

    /// Start processing
    ///
    /// Source acquisition failure degrades rather than fails: the channel
    /// enters `NoTuner`, the failure goes to the event stream, and the
    /// pipeline runs sourceless until the next source update.
    pub fn start(&self) -> Result<(), ChannelError> {
        let mut inner = self.lock();
        if inner.disposed {
            return Err(ChannelError::Disposed);
        }
        if !inner.config.enabled {
            info!("{}: [{}] is disabled, not starting", inner.id, inner.config.name);
            return Ok(());
        }
        if inner.running {
            info!("{}: [{}] is already running", inner.id, inner.config.name);
            return Ok(());
        }
        inner.running = true;
        info!("{}: starting pipeline for [{}]", inner.id, inner.config.name);

        inner.start_event_logging();
        if let Err(e) = inner.update_source() {
            warn!("{}: starting without a source: {}", inner.id, e);
            inner.emit_error("Source", &e);
        }
        inner.update_recording();
        inner.events.emit(ChannelEvent::PipelineStarted { channel: inner.id });
        Ok(())
    }

    /// Stop processing and release the source
    pub fn stop(&self) {
        let mut inner = self.lock();
        if !inner.running {
            return;
        }
        inner.running = false;
        info!("{}: stopping pipeline for [{}]", inner.id, inner.config.name);

        inner.detach_source();
        inner.stop_recorders();
        if let Some(state) = inner.state.clone() {
            state.lock().expect("channel state lock").reset();
        }
        // Persist the retained timeline before the log sinks go away
        if inner.config.channel_type == ChannelType::Standard {
            inner.call_events.flush();
        }
        inner.stop_event_logging();
        inner.detach_decoder();
        inner.events.emit(ChannelEvent::PipelineStopped { channel: inner.id });
    }

    /// Re-acquire the source, rebuilding the decoder and drain task
    pub fn update_source(&self) -> Result<(), ChannelError> {
        let mut inner = self.lock();
        if inner.disposed {
            return Err(ChannelError::Disposed);
        }
        let result = inner.update_source();
        if let Err(e) = &result {
            inner.emit_error("Source", e);
        }
        result
    }

    /// Rebuild the decoder for the current source's sample kind
    pub fn update_decoder(&self) {
        let mut inner = self.lock();
        if let Some(kind) = inner.source.as_ref().map(Source::kind) {
            inner.update_decoder(kind);
        }
    }

    /// Rebuild the event loggers from the current configuration
    pub fn update_event_logging(&self) {
        let mut inner = self.lock();
        if inner.running {
            inner.start_event_logging();
        }
    }

    /// Rebuild the recorders from the current configuration
    pub fn update_recording(&self) {
        self.lock().update_recording();
    }

    /// Stop and permanently release the pipeline
    pub fn dispose(&self) {
        self.stop();
        self.lock().disposed = true;
    }
}

impl PipelineInner {
    fn emit_error(&self, source: &str, error: &ChannelError) {
        self.events.emit(ChannelEvent::Error {
            channel: self.id,
            source: source.to_string(),
            message: error.to_string(),
        });
    }

    fn force_no_tuner(&self) {
        if let Some(state) = &self.state {
            state
                .lock()
                .expect("channel state lock")
                .core_mut()
                .force_state(ChannelState::NoTuner);
        }
    }

    fn update_source(&mut self) -> Result<(), ChannelError> {
        self.detach_source();
        if !self.running {
            return Ok(());
        }

        let mut source = match self.services.sources.acquire(&self.config) {
            Ok(source) => source,
            Err(e) => {
                self.force_no_tuner();
                return Err(ChannelError::SourceUnavailable(e));
            }
        };

        let kind = source.kind();
        if self.decoder_kind().map_or(true, |current| current != kind) {
            self.update_decoder(kind);
        }

        let scheduler = Arc::clone(&self.services.scheduler);
        let scheduled = match &mut source {
            Source::Complex(complex) => {
                if let Some(link) = complex.correction_link() {
                    self.attach_correction(link);
                }
                let (sender, queue) = batch_queue::<ComplexBatch>();
                let tick = self.complex_tick(queue);
                scheduler.schedule_fixed_rate(DRAIN_PERIOD, tick).map(|task| {
                    complex.set_listener(sender);
                    self.task = Some(task);
                })
            }
            Source::Real(real) => {
                let (sender, queue) = batch_queue::<RealBatch>();
                let tick = self.real_tick(queue);
                scheduler.schedule_fixed_rate(DRAIN_PERIOD, tick).map(|task| {
                    real.set_listener(sender);
                    self.task = Some(task);
                })
            }
        };

        if let Err(e) = scheduled {
            source.dispose();
            self.force_no_tuner();
            return Err(ChannelError::SchedulingRejected(e));
        }

        self.source = Some(source);
        Ok(())
    }

    fn detach_source(&mut self) {
        if let Some(task) = self.task.take() {
            self.services.scheduler.cancel(task);
        }
        if let Some(mut source) = self.source.take() {
            source.clear_listener();
            source.dispose();
        }
    }

    fn decoder_kind(&self) -> Option<SampleKind> {
        self.slot
            .lock()
            .expect("decoder slot lock")
            .decoder
            .as_ref()
            .map(|d| d.sample_kind())
    }

    fn attach_correction(&self, link: crate::source::CorrectionLink) {
        let mut slot = self.slot.lock().expect("decoder slot lock");
        if let Some(dec) = slot.decoder.as_mut() {
            if let Some(control) = dec.frequency_control() {
                control.attach(link);
            }
        }
    }

    fn update_decoder(&mut self, kind: SampleKind) {
        self.detach_decoder();

        let alias_list = self
            .config
            .alias_list
            .as_deref()
            .and_then(|name| self.services.aliases.resolve(name));
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let Some(mut decoder) =
            self.services
                .decoders
                .build(&self.config, kind, alias_list, message_tx)
        else {
            warn!("{}: no decoder available for {:?} samples", self.id, kind);
            return;
        };

        if let Some(state) = &self.state {
            let mut state = state.lock().expect("channel state lock");
            let (squelch_tx, squelch_rx) = mpsc::unbounded_channel();
            self.squelch_token = Some(state.core_mut().add_squelch_listener(squelch_tx));
            decoder.audio().listen_squelch(squelch_rx);

            let (audio_tx, audio_rx) = mpsc::unbounded_channel();
            decoder.audio().set_audio_type_listener(audio_tx);
            state.core_mut().attach_audio_type(audio_rx);
        }

        let mut slot = self.slot.lock().expect("decoder slot lock");
        slot.decoder = Some(decoder);
        slot.messages = Some(message_rx);
    }

    fn detach_decoder(&mut self) {
        if let Some(token) = self.squelch_token.take() {
            if let Some(state) = &self.state {
                state
                    .lock()
                    .expect("channel state lock")
                    .core_mut()
                    .remove_squelch_listener(token);
            }
        }
        let mut slot = self.slot.lock().expect("decoder slot lock");
        slot.decoder = None;
        slot.messages = None;
    }

    fn complex_tick(&mut self, mut queue: BatchQueue<ComplexBatch>) -> Task {
        let slot = Arc::clone(&self.slot);
        let state = self.state.clone();
        let broadcaster = self.broadcaster.clone();
        let id = self.id;
        let mut batches: Vec<ComplexBatch> = Vec::with_capacity(COMPLEX_DRAIN_MAX);
        let mut messages: Vec<ControlMessage> = Vec::new();
        Box::new(move || {
            batches.clear();
            messages.clear();
            queue.drain_into(&mut batches, COMPLEX_DRAIN_MAX);
            {
                let mut slot = slot.lock().expect("decoder slot lock");
                if let Some(dec) = slot.decoder.as_mut() {
                    dec.audio().poll();
                    'feed: for batch in batches.drain(..) {
                        for sample in batch.0 {
                            if let Err(e) = dec.receive_complex(sample) {
                                warn!("{}: {}, aborting drain tick", id, e);
                                break 'feed;
                            }
                        }
                    }
                    dec.poll();
                } else {
                    batches.clear();
                }
                if let Some(rx) = slot.messages.as_mut() {
                    while let Ok(message) = rx.try_recv() {
                        messages.push(message);
                    }
                }
            }
            for message in &messages {
                broadcaster.broadcast(message);
            }
            if let Some(state) = &state {
                state.lock().expect("channel state lock").poll();
            }
        })
    }

    fn real_tick(&mut self, mut queue: BatchQueue<RealBatch>) -> Task {
        let slot = Arc::clone(&self.slot);
        let state = self.state.clone();
        let broadcaster = self.broadcaster.clone();
        let id = self.id;
        let mut batches: Vec<RealBatch> = Vec::with_capacity(REAL_DRAIN_MAX);
        let mut messages: Vec<ControlMessage> = Vec::new();
        Box::new(move || {
            batches.clear();
            messages.clear();
            queue.drain_into(&mut batches, REAL_DRAIN_MAX);
            {
                let mut slot = slot.lock().expect("decoder slot lock");
                if let Some(dec) = slot.decoder.as_mut() {
                    dec.audio().poll();
                    'feed: for batch in batches.drain(..) {
                        for sample in batch.0 {
                            if let Err(e) = dec.receive_real(sample) {
                                warn!("{}: {}, aborting drain tick", id, e);
                                break 'feed;
                            }
                        }
                    }
                    dec.poll();
                } else {
                    batches.clear();
                }
                if let Some(rx) = slot.messages.as_mut() {
                    while let Ok(message) = rx.try_recv() {
                        messages.push(message);
                    }
                }
            }
            for message in &messages {
                broadcaster.broadcast(message);
            }
            if let Some(state) = &state {
                state.lock().expect("channel state lock").poll();
            }
        })
    }

    fn update_recording(&mut self) {
        self.stop_recorders();
        if !(self.running && self.config.recording) {
            return;
        }
        let slot = Arc::clone(&self.slot);
        let mut slot = slot.lock().expect("decoder slot lock");
        let Some(dec) = slot.decoder.as_mut() else {
            debug!("{}: recording deferred, no decoder to tap", self.id);
            return;
        };

        for mut recorder in self.services.recorders.build(&self.config) {
            if let Err(e) = recorder.start() {
                let error = ChannelError::RecorderIo {
                    file: recorder.file_name().to_string(),
                    source: e,
                };
                warn!("{}: {}", self.id, error);
                self.emit_error("Recorder", &error);
                continue;
            }
            let tap = match recorder.sink() {
                RecorderSink::Audio(tx) => dec.add_real_tap(tx),
                RecorderSink::Baseband(tx) => dec.add_complex_tap(tx),
            };
            self.recorders.push(RecorderEntry {
                recorder,
                tap: Some(tap),
            });
        }
    }

    fn stop_recorders(&mut self) {
        let entries = std::mem::take(&mut self.recorders);
        for mut entry in entries {
            if let Some(tap) = entry.tap.take() {
                let mut slot = self.slot.lock().expect("decoder slot lock");
                if let Some(dec) = slot.decoder.as_mut() {
                    dec.remove_tap(tap);
                }
            }
            if let Err(e) = entry.recorder.stop() {
                let error = ChannelError::RecorderIo {
                    file: entry.recorder.file_name().to_string(),
                    source: e,
                };
                warn!("{}: {}", self.id, error);
                self.emit_error("Recorder", &error);
            }
        }
    }

    fn start_event_logging(&mut self) {
        self.stop_event_logging();
        for log_type in self.config.event_logs.clone() {
            let Some(mut logger) = self.services.event_logs.build(&self.config, log_type) else {
                continue;
            };
            logger.start();
            let subscription = logger
                .call_event_sink()
                .map(|sink| self.call_events.subscribe(sink));
            let listener = logger.message_sink().map(|sink| self.broadcaster.add(sink));
            self.loggers.push(LoggerEntry {
                logger,
                subscription,
                listener,
            });
        }
    }

    fn stop_event_logging(&mut self) {
        let entries = std::mem::take(&mut self.loggers);
        for mut entry in entries {
            if let Some(subscription) = entry.subscription {
                self.call_events.unsubscribe(subscription);
            }
            if let Some(listener) = entry.listener {
                self.broadcaster.remove(listener);
            }
            entry.logger.stop();
        }
    }
}
