//! Integration tests for the channel engine
//!
//! These tests verify end-to-end behavior through the registry including:
//! - Control channel message processing and site tracking
//! - Traffic channel allocation, deduplication, and teardown
//! - Drain tick sample caps and fault containment
//! - Degraded paths (no tuner, scheduling rejection, recorder failure)
//! - Event logging over the shared call event timeline

use std::sync::Arc;

use trunk_engine::{
    AliasDirectory, CallEventType, ChannelConfig, ChannelEvent, ChannelId, ChannelRegistry,
    ChannelServices, ChannelState, ComplexSample, DecoderFactory, EventBus, EventLogProvider,
    EventLogType, RecorderProvider, SampleKind, Scheduler, SourceProvider, DRAIN_PERIOD,
};
use trunk_protocol::{
    ChannelMap, ChannelNumber, ChannelRange, ControlMessage, Ident, IdentKind, MessageBody, SiteId,
};
use trunk_sim::{
    ManualScheduler, SimDecoderFactory, SimEventLogProvider, SimRecorderProvider,
    SimSourceProvider, StaticAliasDirectory,
};

// ============================================================================
// Test Harness
// ============================================================================

mod helpers {
    use super::*;
    use tokio::sync::mpsc;

    pub const CONTROL_FREQ: u64 = 453_150_000;
    pub const TRAFFIC_BASE: u64 = 454_000_000;
    pub const STEP: u64 = 12_500;

    pub struct Harness {
        pub sources: Arc<SimSourceProvider>,
        pub decoders: SimDecoderFactory,
        pub recorders: SimRecorderProvider,
        pub logs: SimEventLogProvider,
        pub scheduler: ManualScheduler,
        pub registry: ChannelRegistry,
        pub events: mpsc::UnboundedReceiver<ChannelEvent>,
    }

    pub fn harness(kind: SampleKind) -> Harness {
        let sources = Arc::new(SimSourceProvider::new(kind));
        let decoders = SimDecoderFactory::new();
        let recorders = SimRecorderProvider::new();
        let logs = SimEventLogProvider::new();
        let scheduler = ManualScheduler::new();

        let services = ChannelServices {
            sources: Arc::clone(&sources) as Arc<dyn SourceProvider>,
            decoders: Arc::new(decoders.clone()) as Arc<dyn DecoderFactory>,
            recorders: Arc::new(recorders.clone()) as Arc<dyn RecorderProvider>,
            event_logs: Arc::new(logs.clone()) as Arc<dyn EventLogProvider>,
            aliases: Arc::new(StaticAliasDirectory::new()) as Arc<dyn AliasDirectory>,
            scheduler: Arc::new(scheduler.clone()) as Arc<dyn Scheduler>,
        };

        let bus = EventBus::new();
        let events = bus.subscribe();
        let registry = ChannelRegistry::new(services, bus);

        Harness {
            sources,
            decoders,
            recorders,
            logs,
            scheduler,
            registry,
            events,
        }
    }

    /// Channel map covering channels 1 through 60
    pub fn site_map() -> ChannelMap {
        let mut map = ChannelMap::new("site");
        map.add_range(ChannelRange {
            first: 1,
            last: 60,
            base_hz: TRAFFIC_BASE,
            step_hz: STEP,
        })
        .unwrap();
        map
    }

    pub fn control_config() -> ChannelConfig {
        let mut config = ChannelConfig::standard("Site Control", CONTROL_FREQ);
        config.decode.channel_map = site_map();
        config.system = "SYSTEM".to_string();
        config.site = "SITE 1".to_string();
        config
    }

    /// Create and enable a control channel
    pub fn start_control(harness: &Harness, config: ChannelConfig) -> ChannelId {
        let id = harness.registry.create(config);
        harness.registry.set_enabled(id, true).unwrap();
        id
    }

    /// Inject a message through the named channel's decoder and run one tick
    pub fn inject(harness: &Harness, channel_name: &str, message: ControlMessage) {
        harness
            .decoders
            .handle_for(channel_name)
            .expect("decoder built for channel")
            .inject(message);
        harness.scheduler.tick_all();
    }

    pub fn drain_events(harness: &mut Harness) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        while let Ok(event) = harness.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn beacon(site: u16) -> ControlMessage {
        ControlMessage::valid(MessageBody::SiteBeacon { site: SiteId(site) })
    }

    pub fn grant(from: u16, to: u16, channel: u16) -> ControlMessage {
        ControlMessage::valid(MessageBody::CallGrant {
            from: Ident(from),
            to: Ident(to),
            channel: ChannelNumber(channel),
        })
    }

    pub fn clear(channel: u16) -> ControlMessage {
        ControlMessage::valid(MessageBody::CallClear {
            channel: ChannelNumber(channel),
        })
    }

    pub fn state_of(harness: &Harness, id: ChannelId) -> ChannelState {
        harness
            .registry
            .state(id)
            .expect("channel registered")
            .lock()
            .unwrap()
            .state()
    }

    pub fn spawned_traffic(events: &[ChannelEvent]) -> Option<ChannelId> {
        events.iter().find_map(|e| match e {
            ChannelEvent::TrafficChannelSpawned { traffic, .. } => Some(*traffic),
            _ => None,
        })
    }
}

// ============================================================================
// Control Channel Tests
// ============================================================================

mod control_channel_tests {
    use super::*;

    #[test]
    fn beacons_enter_control_and_dedupe_site() {
        let mut h = helpers::harness(SampleKind::Complex);
        let control = helpers::start_control(&h, helpers::control_config());

        let decoder = h.decoders.handle_for("Site Control").unwrap();
        decoder.inject(helpers::beacon(7));
        decoder.inject(helpers::beacon(7));
        decoder.inject(helpers::beacon(7));
        h.scheduler.tick_all();

        assert_eq!(helpers::state_of(&h, control), ChannelState::Control);

        let events = helpers::drain_events(&mut h);
        let site_changes = events
            .iter()
            .filter(|e| matches!(e, ChannelEvent::SiteChanged { site: SiteId(7), .. }))
            .count();
        assert_eq!(site_changes, 1);
    }

    #[test]
    fn registration_ack_is_logged_with_swapped_direction() {
        let h = helpers::harness(SampleKind::Complex);
        let mut config = helpers::control_config();
        config.event_logs = vec![EventLogType::CallEvent];
        let control = helpers::start_control(&h, config);

        helpers::inject(
            &h,
            "Site Control",
            ControlMessage::valid(MessageBody::Acknowledge {
                from: Ident(8186),
                to: Ident(1234),
                acked: IdentKind::Registration,
            }),
        );

        let model = h.registry.call_events(control).unwrap();
        let events = model.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, CallEventType::Register);
        assert_eq!(events[0].from, Some(Ident(1234)));
        assert_eq!(events[0].to, Some(Ident(8186)));
        assert_eq!(events[0].details.as_deref(), Some("REGISTERED ON NETWORK"));

        // The configured call event log saw it at append time
        let log = h
            .logs
            .handle_for("Site Control", EventLogType::CallEvent)
            .unwrap();
        assert_eq!(log.call_events().len(), 1);
    }

    #[test]
    fn invalid_messages_reach_logs_but_not_state() {
        let h = helpers::harness(SampleKind::Complex);
        let mut config = helpers::control_config();
        config.event_logs = vec![EventLogType::DecodedMessage];
        let control = helpers::start_control(&h, config);

        helpers::inject(
            &h,
            "Site Control",
            ControlMessage::invalid(MessageBody::SiteBeacon { site: SiteId(9) }),
        );

        assert_eq!(helpers::state_of(&h, control), ChannelState::Idle);
        let log = h
            .logs
            .handle_for("Site Control", EventLogType::DecodedMessage)
            .unwrap();
        assert_eq!(log.messages().len(), 1);
        assert!(!log.messages()[0].valid);
    }
}

// ============================================================================
// Traffic Channel Tests
// ============================================================================

mod traffic_channel_tests {
    use super::*;

    #[test]
    fn grant_spawns_one_traffic_channel_per_number() {
        let mut h = helpers::harness(SampleKind::Complex);
        let control = helpers::start_control(&h, helpers::control_config());

        helpers::inject(&h, "Site Control", helpers::grant(100, 200, 12));
        // Recurring grant for the same active call
        helpers::inject(&h, "Site Control", helpers::grant(100, 200, 12));

        assert_eq!(h.registry.len(), 2);
        let events = helpers::drain_events(&mut h);
        let traffic = helpers::spawned_traffic(&events).expect("traffic spawned");
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ChannelEvent::TrafficChannelSpawned { .. }))
                .count(),
            1
        );

        // Tuned to the mapped frequency and following the call
        let source = h.sources.last().unwrap();
        assert_eq!(
            source.frequency_hz(),
            helpers::TRAFFIC_BASE + 11 * helpers::STEP
        );
        assert_eq!(helpers::state_of(&h, traffic), ChannelState::Call);

        // One Call entry on the shared timeline, still in progress
        let model = h.registry.call_events(control).unwrap();
        let traffic_model = h.registry.call_events(traffic).unwrap();
        assert!(model.same_model(&traffic_model));
        let calls = model.events();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].event_type, CallEventType::Call);
        assert_eq!(calls[0].channel, ChannelNumber(12));
        assert!(calls[0].end.is_none());
    }

    #[test]
    fn unmapped_grant_becomes_call_no_tuner() {
        let mut h = helpers::harness(SampleKind::Complex);
        let control = helpers::start_control(&h, helpers::control_config());

        // Channel 99 is outside the site map
        helpers::inject(&h, "Site Control", helpers::grant(100, 200, 99));

        let events = helpers::drain_events(&mut h);
        let traffic = helpers::spawned_traffic(&events).expect("traffic spawned");
        assert_eq!(helpers::state_of(&h, traffic), ChannelState::NoTuner);

        let calls = h.registry.call_events(control).unwrap().events();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].event_type, CallEventType::CallNoTuner);
        assert_eq!(calls[0].frequency_hz, None);
    }

    #[test]
    fn uncallable_grant_is_dropped() {
        let h = helpers::harness(SampleKind::Complex);
        let control = helpers::start_control(&h, helpers::control_config());

        // Destination 8186 is the registration ident, not a callable target
        helpers::inject(&h, "Site Control", helpers::grant(100, 8186, 12));

        assert_eq!(h.registry.len(), 1);
        assert!(h.registry.call_events(control).unwrap().is_empty());
    }

    #[test]
    fn clear_on_control_tears_down_the_traffic_channel() {
        let mut h = helpers::harness(SampleKind::Complex);
        let control = helpers::start_control(&h, helpers::control_config());

        helpers::inject(&h, "Site Control", helpers::grant(100, 200, 12));
        let traffic = helpers::spawned_traffic(&helpers::drain_events(&mut h)).unwrap();
        let traffic_source = h.sources.last().unwrap();

        helpers::inject(&h, "Site Control", helpers::clear(12));

        assert_eq!(h.registry.len(), 1);
        assert!(h.registry.pipeline(traffic).is_none());
        assert!(traffic_source.is_disposed());

        let calls = h.registry.call_events(control).unwrap().events();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].end.is_some());

        // A MAINT straggler for the same number is a no-op
        helpers::inject(
            &h,
            "Site Control",
            ControlMessage::valid(MessageBody::Maintenance {
                channel: ChannelNumber(12),
            }),
        );
        assert_eq!(h.registry.len(), 1);
    }

    #[test]
    fn clear_decoded_on_the_traffic_channel_fades_it_once() {
        let mut h = helpers::harness(SampleKind::Complex);
        let control = helpers::start_control(&h, helpers::control_config());

        helpers::inject(&h, "Site Control", helpers::grant(100, 200, 12));
        let traffic = helpers::spawned_traffic(&helpers::drain_events(&mut h)).unwrap();

        let name = "Site Control TRAFFIC 12";
        helpers::inject(&h, name, helpers::clear(12));
        assert_eq!(helpers::state_of(&h, traffic), ChannelState::Fade);

        // CLEAR then MAINT in quick succession ends the call exactly once
        helpers::inject(
            &h,
            name,
            ControlMessage::valid(MessageBody::Maintenance {
                channel: ChannelNumber(12),
            }),
        );
        assert_eq!(helpers::state_of(&h, traffic), ChannelState::Fade);

        let calls = h.registry.call_events(control).unwrap().events();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].end.is_some());
    }

    #[test]
    fn grants_on_different_numbers_run_concurrent_calls() {
        let mut h = helpers::harness(SampleKind::Complex);
        let control = helpers::start_control(&h, helpers::control_config());

        helpers::inject(&h, "Site Control", helpers::grant(100, 200, 12));
        helpers::inject(&h, "Site Control", helpers::grant(300, 400, 13));

        assert_eq!(h.registry.len(), 3);
        let calls = h.registry.call_events(control).unwrap().events();
        assert_eq!(calls.len(), 2);
        let _ = helpers::drain_events(&mut h);
    }
}

// ============================================================================
// Pipeline Tests
// ============================================================================

mod pipeline_tests {
    use super::*;

    fn one_sample_batch() -> Vec<ComplexSample> {
        vec![ComplexSample { i: 1.0, q: -1.0 }]
    }

    #[test]
    fn drain_tick_caps_complex_batches() {
        let h = helpers::harness(SampleKind::Complex);
        helpers::start_control(&h, helpers::control_config());

        let source = h.sources.last().unwrap();
        for _ in 0..20 {
            assert!(source.send_complex(one_sample_batch()));
        }

        let decoder = h.decoders.handle_for("Site Control").unwrap();
        h.scheduler.tick_all();
        assert_eq!(decoder.complex_received(), 16);

        // The remainder arrives on the next tick
        h.scheduler.tick_all();
        assert_eq!(decoder.complex_received(), 20);
    }

    #[test]
    fn drain_tick_caps_real_batches() {
        let h = helpers::harness(SampleKind::Real);
        helpers::start_control(&h, helpers::control_config());

        let source = h.sources.last().unwrap();
        for _ in 0..6 {
            assert!(source.send_real(vec![0.25]));
        }

        let decoder = h.decoders.handle_for("Site Control").unwrap();
        h.scheduler.tick_all();
        assert_eq!(decoder.real_received(), 4);
    }

    #[test]
    fn drain_task_uses_the_drain_period() {
        let h = helpers::harness(SampleKind::Complex);
        helpers::start_control(&h, helpers::control_config());

        assert_eq!(h.scheduler.task_count(), 1);
        let id = trunk_engine::TaskId(1);
        assert_eq!(h.scheduler.period_of(id), Some(DRAIN_PERIOD));
    }

    #[test]
    fn source_failure_degrades_to_no_tuner() {
        let mut h = helpers::harness(SampleKind::Complex);
        h.sources.set_fail_all(true);
        let control = helpers::start_control(&h, helpers::control_config());

        assert_eq!(helpers::state_of(&h, control), ChannelState::NoTuner);
        let pipeline = h.registry.pipeline(control).unwrap();
        assert!(pipeline.is_running());
        assert!(!pipeline.is_processing());

        let events = helpers::drain_events(&mut h);
        assert!(events
            .iter()
            .any(|e| matches!(e, ChannelEvent::Error { source, .. } if source == "Source")));
        assert!(events
            .iter()
            .any(|e| matches!(e, ChannelEvent::PipelineStarted { .. })));
    }

    #[test]
    fn scheduling_rejection_disposes_the_fresh_source() {
        let mut h = helpers::harness(SampleKind::Complex);
        h.scheduler.reject_next("shutting down");
        let control = helpers::start_control(&h, helpers::control_config());

        let source = h.sources.last().unwrap();
        assert!(source.is_disposed());
        assert_eq!(helpers::state_of(&h, control), ChannelState::NoTuner);
        assert_eq!(h.scheduler.task_count(), 0);

        let events = helpers::drain_events(&mut h);
        assert!(events
            .iter()
            .any(|e| matches!(e, ChannelEvent::Error { source, .. } if source == "Source")));
    }

    #[test]
    fn transient_decode_fault_aborts_one_tick_only() {
        let h = helpers::harness(SampleKind::Complex);
        helpers::start_control(&h, helpers::control_config());

        let source = h.sources.last().unwrap();
        let decoder = h.decoders.handle_for("Site Control").unwrap();

        decoder.fail_next_sample();
        source.send_complex(one_sample_batch());
        h.scheduler.tick_all();
        assert_eq!(decoder.complex_received(), 0);

        source.send_complex(one_sample_batch());
        h.scheduler.tick_all();
        assert_eq!(decoder.complex_received(), 1);
    }

    #[test]
    fn update_decoder_rewires_a_running_pipeline() {
        let h = helpers::harness(SampleKind::Complex);
        let control = helpers::start_control(&h, helpers::control_config());
        assert_eq!(h.decoders.build_count(), 1);
        let old = h.decoders.last().unwrap();

        let pipeline = h.registry.pipeline(control).unwrap();
        pipeline.update_decoder();
        assert_eq!(h.decoders.build_count(), 2);

        // Messages decoded by the replacement reach the state machine
        helpers::inject(&h, "Site Control", helpers::beacon(6));
        assert_eq!(helpers::state_of(&h, control), ChannelState::Control);

        // and samples now feed the replacement, not the old decoder
        let source = h.sources.last().unwrap();
        assert!(source.send_complex(one_sample_batch()));
        h.scheduler.tick_all();
        assert_eq!(old.complex_received(), 0);
        assert_eq!(h.decoders.last().unwrap().complex_received(), 1);
    }

    #[test]
    fn disabled_channel_does_not_start() {
        let h = helpers::harness(SampleKind::Complex);
        let id = h.registry.create(helpers::control_config());

        let pipeline = h.registry.pipeline(id).unwrap();
        pipeline.start().unwrap();

        assert!(!pipeline.is_running());
        assert_eq!(h.sources.acquire_count(), 0);
        assert_eq!(h.scheduler.task_count(), 0);
    }

    #[test]
    fn starting_an_already_started_channel_changes_nothing() {
        let h = helpers::harness(SampleKind::Complex);
        let control = helpers::start_control(&h, helpers::control_config());
        assert_eq!(h.sources.acquire_count(), 1);
        assert_eq!(h.scheduler.task_count(), 1);

        let pipeline = h.registry.pipeline(control).unwrap();
        pipeline.start().unwrap();

        assert_eq!(h.sources.acquire_count(), 1);
        assert_eq!(h.scheduler.task_count(), 1);
        assert!(h.sources.last().unwrap().has_listener());
    }

    #[test]
    fn disposed_pipeline_forwards_no_further_samples() {
        let h = helpers::harness(SampleKind::Complex);
        let control = helpers::start_control(&h, helpers::control_config());

        let source = h.sources.last().unwrap();
        let decoder = h.decoders.handle_for("Site Control").unwrap();
        h.registry.remove(control).unwrap();

        assert_eq!(h.scheduler.task_count(), 0);
        assert!(!source.send_complex(one_sample_batch()));
        h.scheduler.tick_all();
        assert_eq!(decoder.complex_received(), 0);
    }

    #[test]
    fn stop_releases_the_source_and_resets_state() {
        let h = helpers::harness(SampleKind::Complex);
        let control = helpers::start_control(&h, helpers::control_config());

        helpers::inject(&h, "Site Control", helpers::beacon(3));
        assert_eq!(helpers::state_of(&h, control), ChannelState::Control);

        let source = h.sources.last().unwrap();
        h.registry.set_enabled(control, false).unwrap();

        assert!(source.is_disposed());
        assert_eq!(helpers::state_of(&h, control), ChannelState::Idle);
        assert_eq!(h.scheduler.task_count(), 0);
    }

    #[test]
    fn stop_flushes_the_timeline_to_call_event_logs() {
        let h = helpers::harness(SampleKind::Complex);
        let mut config = helpers::control_config();
        config.event_logs = vec![EventLogType::CallEvent];
        let control = helpers::start_control(&h, config);

        helpers::inject(
            &h,
            "Site Control",
            ControlMessage::valid(MessageBody::Acknowledge {
                from: Ident(8186),
                to: Ident(55),
                acked: IdentKind::Registration,
            }),
        );

        let log = h
            .logs
            .handle_for("Site Control", EventLogType::CallEvent)
            .unwrap();
        assert_eq!(log.call_events().len(), 1);

        h.registry.set_enabled(control, false).unwrap();

        // Append-time delivery plus the flush on stop
        assert_eq!(log.call_events().len(), 2);
        assert!(log.is_stopped());
    }

    #[test]
    fn recording_taps_the_decoder_audio() {
        let h = helpers::harness(SampleKind::Real);
        let mut config = helpers::control_config();
        config.recording = true;
        helpers::start_control(&h, config);

        let source = h.sources.last().unwrap();
        source.send_real(vec![0.5, -0.5]);
        h.scheduler.tick_all();

        let recorder = h.recorders.last().unwrap();
        assert!(recorder.is_started());
        assert_eq!(recorder.samples(), vec![0.5, -0.5]);
    }

    #[test]
    fn recorder_start_failure_is_contained() {
        let mut h = helpers::harness(SampleKind::Real);
        h.recorders.set_fail_start(true);
        let mut config = helpers::control_config();
        config.recording = true;
        let control = helpers::start_control(&h, config);

        // The pipeline keeps running without the recorder
        let pipeline = h.registry.pipeline(control).unwrap();
        assert!(pipeline.is_processing());

        let events = helpers::drain_events(&mut h);
        assert!(events
            .iter()
            .any(|e| matches!(e, ChannelEvent::Error { source, .. } if source == "Recorder")));
    }
}

// ============================================================================
// Registry Teardown Watcher Tests
// ============================================================================

mod teardown_watcher_tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn watcher_releases_traffic_channels_that_fade_on_their_own() {
        let h = helpers::harness(SampleKind::Complex);
        helpers::start_control(&h, helpers::control_config());
        h.registry.watch_teardown();

        helpers::inject(&h, "Site Control", helpers::grant(100, 200, 12));
        assert_eq!(h.registry.len(), 2);

        // The teardown is decoded on the traffic channel only
        helpers::inject(&h, "Site Control TRAFFIC 12", helpers::clear(12));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while h.registry.len() > 1 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.registry.len(), 1);
    }
}
