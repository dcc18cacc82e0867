//! Trunking protocol channel state machine
//!
//! Interprets the decoded control messages for one channel and drives the
//! channel state, the shared call event timeline, and traffic channel
//! allocation. A standard channel follows the control channel; a traffic
//! channel spawned for a granted call follows that one call until
//! teardown.

use std::sync::Arc;

use tracing::{debug, warn};
use trunk_protocol::{ChannelNumber, ControlMessage, Ident, IdentKind, MessageBody, SiteId};

use crate::alias::AliasList;
use crate::call_event::{CallEvent, CallEventId, CallEventType};
use crate::channel::{ChannelConfig, ChannelType};
use crate::decoder::{AudioType, SquelchState};
use crate::events::ChannelEvent;
use crate::registry::ChannelRegistry;
use crate::state::{ChannelState, StateCore};

/// Channel state machine for the trunking control protocol
///
/// One instance per channel, shared behind a mutex between the pipeline's
/// drain tick (message dispatch, polling) and the registry (lifecycle).
/// A control channel and the traffic channels it spawns write to one
/// shared `CallEventModel` through their cores.
pub struct TrunkingChannelState {
    core: StateCore,
    channel_type: ChannelType,
    config: ChannelConfig,
    alias_list: Option<Arc<AliasList>>,
    site: Option<SiteId>,
    audio_type: Option<AudioType>,
    registry: Option<ChannelRegistry>,
}

impl TrunkingChannelState {
    /// Create a state machine over an already-constructed core
    ///
    /// The audio path is held permanently unsquelched: call state gates
    /// trunked audio, not carrier squelch, so every squelch listener
    /// attached to the core receives `Unsquelch` on registration.
    pub fn new(
        mut core: StateCore,
        config: ChannelConfig,
        alias_list: Option<Arc<AliasList>>,
    ) -> Self {
        core.set_squelch(SquelchState::Unsquelch);
        Self {
            core,
            channel_type: config.channel_type,
            config,
            alias_list,
            site: None,
            audio_type: None,
            registry: None,
        }
    }

    /// Attach the registry handle used to allocate traffic channels
    ///
    /// Without one, call grants are logged and dropped.
    pub fn set_registry(&mut self, registry: ChannelRegistry) {
        self.registry = Some(registry);
    }

    /// The shared state core
    pub fn core(&self) -> &StateCore {
        &self.core
    }

    /// Mutable access to the core, for pipeline wiring
    pub fn core_mut(&mut self) -> &mut StateCore {
        &mut self.core
    }

    /// Current channel state
    pub fn state(&self) -> ChannelState {
        self.core.state()
    }

    /// The most recently observed site identity, for control channels
    pub fn site(&self) -> Option<SiteId> {
        self.site
    }

    /// The most recent audio type reported by the decoder
    pub fn audio_type(&self) -> Option<AudioType> {
        self.audio_type
    }

    /// Dispatch one decoded control message
    ///
    /// Invalid messages never drive state; they are dropped here even if a
    /// caller forwards them.
    pub fn receive(&mut self, message: &ControlMessage) {
        if !message.valid {
            debug!(
                "{}: ignoring invalid {} message",
                self.core.channel_id(),
                message.body.opcode_name()
            );
            return;
        }

        match &message.body {
            MessageBody::Acknowledge { from, to, acked } => {
                self.process_acknowledge(*from, *to, *acked);
            }
            MessageBody::Request { from, to, request } => {
                self.add_event(
                    CallEvent::builder(CallEventType::Request)
                        .from(Some(*from))
                        .to(Some(*to))
                        .details(request.clone()),
                );
            }
            MessageBody::StatusReport { from, to, status } => {
                self.add_event(
                    CallEvent::builder(CallEventType::Status)
                        .from(Some(*from))
                        .to(Some(*to))
                        .details(status.clone()),
                );
            }
            MessageBody::SiteBeacon { site } => {
                self.enter_control();
                if self.site != Some(*site) {
                    self.site = Some(*site);
                    self.core.events().emit(ChannelEvent::SiteChanged {
                        channel: self.core.channel_id(),
                        site: *site,
                    });
                }
            }
            MessageBody::CallGrant { from, to, channel } => {
                if message.is_valid_call() {
                    self.process_call_grant(*from, *to, *channel);
                } else {
                    debug!(
                        "{}: dropping uncallable grant to {}",
                        self.core.channel_id(),
                        to
                    );
                }
            }
            MessageBody::CallClear { channel } => {
                self.process_teardown(*channel);
            }
            MessageBody::Maintenance { channel } => {
                self.process_teardown(*channel);
            }
            MessageBody::ShortDataSegment { from, to, text, .. } => {
                self.add_event(
                    CallEvent::builder(CallEventType::Sdm)
                        .from(Some(*from))
                        .to(Some(*to))
                        .details(text.clone()),
                );
            }
        }
    }

    /// Housekeeping run once per drain tick
    ///
    /// Records the decoder's latest audio type report. The squelch state
    /// itself never changes here: the audio path stays open.
    pub fn poll(&mut self) {
        if let Some(audio_type) = self.core.poll_audio_type() {
            self.audio_type = Some(audio_type);
        }
    }

    /// End the current call and enter `Fade`
    ///
    /// When no current call pointer is set, a synthetic call-end event is
    /// appended from the last-known talkgroups instead, so the timeline
    /// still records that the channel carried something. Returns false when
    /// the channel is already fading (or cannot fade), so redundant
    /// teardown messages are harmless.
    pub fn fade(&mut self) -> bool {
        if !self.core.fade() {
            return false;
        }
        match self.core.current_call() {
            Some(call) => {
                self.core.call_events().set_end(call);
            }
            None => {
                let number = self.core.channel_number();
                self.add_event(
                    CallEvent::builder(CallEventType::CallEnd)
                        .channel(number)
                        .frequency(self.config.decode.channel_map.frequency(number))
                        .from(self.core.from_talkgroup())
                        .to(self.core.to_talkgroup()),
                );
            }
        }
        self.core.set_current_call(None);
        true
    }

    /// Return the channel to `Idle`, ending any call still in progress
    ///
    /// Called when the pipeline stops; legal from every state.
    pub fn reset(&mut self) {
        if let Some(call) = self.core.current_call() {
            self.core.call_events().set_end(call);
            self.core.set_current_call(None);
        }
        if self.core.from_talkgroup().is_some() {
            self.core.set_from_talkgroup(None);
        }
        if self.core.to_talkgroup().is_some() {
            self.core.set_to_talkgroup(None);
        }
        match self.core.state() {
            ChannelState::Idle => {}
            ChannelState::NoTuner | ChannelState::Reset => {
                self.core.set_state(ChannelState::Idle);
            }
            ChannelState::Fade => self.core.reset(),
            ChannelState::Control | ChannelState::Call => {
                self.core.fade();
                self.core.reset();
            }
        }
    }

    /// Mark a granted call as this channel's current activity
    ///
    /// Called by the parent control channel on a freshly spawned traffic
    /// channel. `processing` is false when no tuner could be acquired, in
    /// which case the channel stays in `NoTuner`.
    pub fn begin_call(&mut self, call: CallEventId, processing: bool) {
        self.core.set_current_call(Some(call));
        if processing {
            self.core.set_state(ChannelState::Call);
        }
    }

    /// A site beacon puts a standard channel in `Control`
    fn enter_control(&mut self) {
        if self.channel_type == ChannelType::Standard
            && self.core.state() != ChannelState::Control
        {
            self.core.set_state(ChannelState::Control);
        }
    }

    fn process_acknowledge(&mut self, from: Ident, to: Ident, acked: IdentKind) {
        if acked == IdentKind::Registration {
            // Registration acks read backwards: the unit being confirmed
            // is the destination ident.
            self.add_event(
                CallEvent::builder(CallEventType::Register)
                    .from(Some(to))
                    .to(Some(from))
                    .details("REGISTERED ON NETWORK"),
            );
        } else {
            self.add_event(
                CallEvent::builder(CallEventType::Acknowledge)
                    .from(Some(from))
                    .to(Some(to))
                    .details(format!("ACK {}", acked.label())),
            );
        }
    }

    fn process_call_grant(&mut self, from: Ident, to: Ident, number: ChannelNumber) {
        let Some(registry) = self.registry.clone() else {
            warn!(
                "{}: no registry attached, dropping grant on channel {}",
                self.core.channel_id(),
                number
            );
            return;
        };

        // A recurring grant for an active call never allocates twice
        if registry
            .traffic_channel_for(self.core.channel_id(), number)
            .is_some()
        {
            debug!(
                "{}: traffic channel {} already allocated",
                self.core.channel_id(),
                number
            );
            return;
        }

        let frequency = self.config.decode.channel_map.frequency(number);
        if frequency.is_none() {
            debug!(
                "{}: channel {} is not in the channel map",
                self.core.channel_id(),
                number
            );
        }

        let spawn = match registry.spawn_traffic(
            self.core.channel_id(),
            number,
            frequency,
            from,
            to,
            self.core.call_events().clone(),
        ) {
            Ok(spawn) => spawn,
            Err(e) => {
                warn!(
                    "{}: failed to spawn traffic channel {}: {}",
                    self.core.channel_id(),
                    number,
                    e
                );
                self.core.events().emit(ChannelEvent::Error {
                    channel: self.core.channel_id(),
                    source: "TrafficChannel".to_string(),
                    message: e.to_string(),
                });
                return;
            }
        };

        let event_type = if spawn.processing {
            CallEventType::Call
        } else {
            CallEventType::CallNoTuner
        };
        let call = self.add_event(
            CallEvent::builder(event_type)
                .channel(number)
                .frequency(frequency)
                .from(Some(from))
                .to(Some(to)),
        );

        spawn
            .state
            .lock()
            .expect("channel state lock")
            .begin_call(call, spawn.processing);

        registry.register_traffic_channel(self.core.channel_id(), number, spawn.id);
        self.core.events().emit(ChannelEvent::TrafficChannelSpawned {
            parent: self.core.channel_id(),
            traffic: spawn.id,
            number,
        });
    }

    fn process_teardown(&mut self, number: ChannelNumber) {
        match self.channel_type {
            ChannelType::Traffic => {
                // A teardown without a channel number clears the whole site
                if !number.is_set() || self.core.channel_number() == number {
                    self.fade();
                }
            }
            ChannelType::Standard => {
                if let Some(registry) = self.registry.clone() {
                    registry.tear_down_traffic(self.core.channel_id(), number);
                }
            }
        }
    }

    fn add_event(&self, builder: crate::call_event::CallEventBuilder) -> CallEventId {
        self.core
            .call_events()
            .add(builder.alias_list(self.alias_list.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_event::CallEventModel;
    use crate::channel::ChannelId;
    use crate::events::EventBus;
    use trunk_protocol::ControlMessage;

    fn standard_state(model: CallEventModel) -> TrunkingChannelState {
        let config = ChannelConfig::standard("control", 453_000_000);
        let core = StateCore::new(ChannelId(1), model, EventBus::new());
        TrunkingChannelState::new(core, config, None)
    }

    fn traffic_state(model: CallEventModel, number: ChannelNumber) -> TrunkingChannelState {
        let mut config = ChannelConfig::standard("traffic", 454_000_000);
        config.channel_type = ChannelType::Traffic;
        let mut core = StateCore::new(ChannelId(2), model, EventBus::new());
        core.set_channel_number(number);
        TrunkingChannelState::new(core, config, None)
    }

    #[test]
    fn registration_ack_swaps_from_and_to() {
        let model = CallEventModel::new();
        let mut state = standard_state(model.clone());

        state.receive(&ControlMessage::valid(MessageBody::Acknowledge {
            from: Ident(8186),
            to: Ident(1234),
            acked: IdentKind::Registration,
        }));

        let events = model.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, CallEventType::Register);
        assert_eq!(events[0].from, Some(Ident(1234)));
        assert_eq!(events[0].to, Some(Ident(8186)));
        assert_eq!(events[0].details.as_deref(), Some("REGISTERED ON NETWORK"));
    }

    #[test]
    fn plain_ack_keeps_direction_and_labels_target() {
        let model = CallEventModel::new();
        let mut state = standard_state(model.clone());

        state.receive(&ControlMessage::valid(MessageBody::Acknowledge {
            from: Ident(8191),
            to: Ident(42),
            acked: IdentKind::Subscriber,
        }));

        let events = model.events();
        assert_eq!(events[0].event_type, CallEventType::Acknowledge);
        assert_eq!(events[0].from, Some(Ident(8191)));
        assert_eq!(events[0].to, Some(Ident(42)));
        assert_eq!(events[0].details.as_deref(), Some("ACK UNIT"));
    }

    #[test]
    fn site_beacon_dedupes_and_enters_control() {
        let model = CallEventModel::new();
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let config = ChannelConfig::standard("control", 453_000_000);
        let core = StateCore::new(ChannelId(1), model, bus);
        let mut state = TrunkingChannelState::new(core, config, None);

        let beacon = ControlMessage::valid(MessageBody::SiteBeacon { site: SiteId(7) });
        state.receive(&beacon);
        state.receive(&beacon);
        state.receive(&beacon);

        assert_eq!(state.state(), ChannelState::Control);
        assert_eq!(state.site(), Some(SiteId(7)));

        let mut site_changes = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ChannelEvent::SiteChanged { .. }) {
                site_changes += 1;
            }
        }
        assert_eq!(site_changes, 1);
    }

    #[test]
    fn invalid_messages_never_drive_state() {
        let model = CallEventModel::new();
        let mut state = standard_state(model.clone());

        state.receive(&ControlMessage::invalid(MessageBody::SiteBeacon {
            site: SiteId(3),
        }));

        assert_eq!(state.state(), ChannelState::Idle);
        assert_eq!(state.site(), None);
        assert!(model.is_empty());
    }

    #[test]
    fn traffic_channel_fades_once_on_redundant_teardown() {
        let model = CallEventModel::new();
        let number = ChannelNumber(12);
        let mut state = traffic_state(model.clone(), number);

        let call = model.add(
            CallEvent::builder(CallEventType::Call)
                .channel(number)
                .from(Some(Ident(100)))
                .to(Some(Ident(200))),
        );
        state.begin_call(call, true);
        assert_eq!(state.state(), ChannelState::Call);
        assert_eq!(state.core().squelch(), SquelchState::Unsquelch);

        state.receive(&ControlMessage::valid(MessageBody::CallClear {
            channel: number,
        }));
        assert_eq!(state.state(), ChannelState::Fade);

        // MAINT right behind CLEAR must not end the call a second time
        state.receive(&ControlMessage::valid(MessageBody::Maintenance {
            channel: number,
        }));
        assert_eq!(state.state(), ChannelState::Fade);

        let events = model.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].end.is_some());
    }

    #[test]
    fn traffic_channel_ignores_teardown_for_other_numbers() {
        let model = CallEventModel::new();
        let mut state = traffic_state(model.clone(), ChannelNumber(12));

        let call = model.add(CallEvent::builder(CallEventType::Call).channel(ChannelNumber(12)));
        state.begin_call(call, true);

        state.receive(&ControlMessage::valid(MessageBody::CallClear {
            channel: ChannelNumber(13),
        }));
        assert_eq!(state.state(), ChannelState::Call);
        assert!(model.events()[0].end.is_none());
    }

    #[test]
    fn reset_ends_an_in_progress_call() {
        let model = CallEventModel::new();
        let mut state = traffic_state(model.clone(), ChannelNumber(5));

        let call = model.add(CallEvent::builder(CallEventType::Call).channel(ChannelNumber(5)));
        state.begin_call(call, true);

        state.reset();
        assert_eq!(state.state(), ChannelState::Idle);
        assert!(model.events()[0].end.is_some());
        assert_eq!(state.core().current_call(), None);
    }

    #[test]
    fn squelch_listeners_receive_unsquelch_on_attach() {
        let model = CallEventModel::new();
        let mut state = standard_state(model);
        assert_eq!(state.core().squelch(), SquelchState::Unsquelch);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        state.core_mut().add_squelch_listener(tx);
        assert_eq!(rx.try_recv(), Ok(SquelchState::Unsquelch));

        // Call lifecycle never gates the audio path
        state.receive(&ControlMessage::valid(MessageBody::SiteBeacon {
            site: SiteId(4),
        }));
        assert!(rx.try_recv().is_err());
        assert_eq!(state.core().squelch(), SquelchState::Unsquelch);
    }

    #[test]
    fn poll_tracks_the_reported_audio_type() {
        let model = CallEventModel::new();
        let mut state = traffic_state(model, ChannelNumber(5));
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        state.core_mut().attach_audio_type(rx);
        assert_eq!(state.audio_type(), None);

        tx.send(AudioType::Data).unwrap();
        tx.send(AudioType::Voice).unwrap();
        state.poll();
        assert_eq!(state.audio_type(), Some(AudioType::Voice));
        assert_eq!(state.core().squelch(), SquelchState::Unsquelch);
    }

    #[test]
    fn fade_without_current_call_records_a_synthetic_end() {
        let model = CallEventModel::new();
        let number = ChannelNumber(9);
        let mut state = traffic_state(model.clone(), number);
        state.core_mut().set_from_talkgroup(Some(Ident(100)));
        state.core_mut().set_to_talkgroup(Some(Ident(200)));
        state.core_mut().set_state(ChannelState::Call);

        assert!(state.fade());
        let events = model.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, CallEventType::CallEnd);
        assert_eq!(events[0].channel, number);
        assert_eq!(events[0].from, Some(Ident(100)));
        assert_eq!(events[0].to, Some(Ident(200)));

        // Redundant teardown appends nothing further
        assert!(!state.fade());
        assert_eq!(model.len(), 1);
    }

    #[test]
    fn only_a_beacon_enters_control() {
        let model = CallEventModel::new();
        let mut state = standard_state(model.clone());

        state.receive(&ControlMessage::valid(MessageBody::Acknowledge {
            from: Ident(8186),
            to: Ident(1234),
            acked: IdentKind::Registration,
        }));
        state.receive(&ControlMessage::valid(MessageBody::StatusReport {
            from: Ident(55),
            to: Ident(8191),
            status: "STATUS 5".to_string(),
        }));
        assert_eq!(state.state(), ChannelState::Idle);

        state.receive(&ControlMessage::valid(MessageBody::SiteBeacon {
            site: SiteId(2),
        }));
        assert_eq!(state.state(), ChannelState::Control);
    }

    #[test]
    fn short_data_segment_becomes_sdm_event() {
        let model = CallEventModel::new();
        let mut state = standard_state(model.clone());

        state.receive(&ControlMessage::valid(MessageBody::ShortDataSegment {
            from: Ident(77),
            to: Ident(8189),
            segment: 2,
            text: "UNIT 77 STATUS OK".to_string(),
        }));

        let events = model.events();
        assert_eq!(events[0].event_type, CallEventType::Sdm);
        assert_eq!(events[0].details.as_deref(), Some("UNIT 77 STATUS OK"));
    }
}
