//! Trunkline Console Monitor
//!
//! Replays a short scripted control channel session through the full
//! channel engine with simulated collaborators: site beacons, a
//! registration, a call request, a granted call that spawns a traffic
//! channel, and its teardown. Channel events stream to the log as they
//! happen and the call timeline prints at the end.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trunk_engine::{
    AudioType, ChannelConfig, ChannelEvent, ChannelRegistry, ChannelServices, EventBus,
    SampleKind, TokioScheduler, DRAIN_PERIOD,
};
use trunk_protocol::{
    ChannelMap, ChannelNumber, ChannelRange, ControlMessage, Ident, IdentKind, MessageBody, SiteId,
};
use trunk_sim::{
    SimDecoderFactory, SimDecoderHandle, SimEventLogProvider, SimRecorderProvider,
    SimSourceProvider, StaticAliasDirectory,
};

const CONTROL_NAME: &str = "Site 1 Control";
const CONTROL_FREQ: u64 = 453_150_000;

fn site_map() -> anyhow::Result<ChannelMap> {
    let mut map = ChannelMap::new("Site 1");
    map.add_range(ChannelRange {
        first: 1,
        last: 60,
        base_hz: 454_000_000,
        step_hz: 12_500,
    })
    .context("building the site channel map")?;
    Ok(map)
}

fn control_config() -> anyhow::Result<ChannelConfig> {
    let mut config = ChannelConfig::standard(CONTROL_NAME, CONTROL_FREQ);
    config.decode.channel_map = site_map()?;
    config.system = "DEMO NETWORK".to_string();
    config.site = "SITE 1".to_string();
    Ok(config)
}

/// Inject one message and let the drain schedule deliver it
async fn transmit(decoder: &SimDecoderHandle, message: ControlMessage) {
    info!("air: {}", message.body.opcode_name());
    decoder.inject(message);
    tokio::time::sleep(DRAIN_PERIOD * 2).await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trunkmon=info,trunk_engine=info,trunk_sim=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Trunkline monitor");

    let sources = Arc::new(SimSourceProvider::new(SampleKind::Complex));
    let decoders = SimDecoderFactory::new();
    let services = ChannelServices {
        sources: Arc::clone(&sources) as Arc<dyn trunk_engine::SourceProvider>,
        decoders: Arc::new(decoders.clone()),
        recorders: Arc::new(SimRecorderProvider::new()),
        event_logs: Arc::new(SimEventLogProvider::new()),
        aliases: Arc::new(StaticAliasDirectory::new()),
        scheduler: Arc::new(TokioScheduler::current().context("no tokio runtime")?),
    };

    let bus = EventBus::new();
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::StateChanged { channel, from, to } => {
                    info!("{}: {} -> {}", channel, from.name(), to.name());
                }
                ChannelEvent::TrafficChannelSpawned { traffic, number, .. } => {
                    info!("{}: following call on channel {}", traffic, number);
                }
                ChannelEvent::Error { channel, source, message } => {
                    info!("{}: {} error: {}", channel, source, message);
                }
                _ => {}
            }
        }
    });

    let registry = ChannelRegistry::new(services, bus);
    registry.watch_teardown();

    let control = registry.create(control_config()?);
    registry
        .set_enabled(control, true)
        .context("enabling the control channel")?;
    let control_decoder = decoders
        .handle_for(CONTROL_NAME)
        .context("control decoder not built")?;

    // Scripted session: beacon, registration, request, status, call, clear
    transmit(
        &control_decoder,
        ControlMessage::valid(MessageBody::SiteBeacon { site: SiteId(14) }),
    )
    .await;
    transmit(
        &control_decoder,
        ControlMessage::valid(MessageBody::Acknowledge {
            from: Ident(8186),
            to: Ident(1234),
            acked: IdentKind::Registration,
        }),
    )
    .await;
    transmit(
        &control_decoder,
        ControlMessage::valid(MessageBody::Request {
            from: Ident(8191),
            to: Ident(1234),
            request: "CALL SYSTEM CONTROLLER".to_string(),
        }),
    )
    .await;
    transmit(
        &control_decoder,
        ControlMessage::valid(MessageBody::StatusReport {
            from: Ident(1234),
            to: Ident(8191),
            status: "STATUS 5".to_string(),
        }),
    )
    .await;
    transmit(
        &control_decoder,
        ControlMessage::valid(MessageBody::CallGrant {
            from: Ident(1234),
            to: Ident(2001),
            channel: ChannelNumber(12),
        }),
    )
    .await;

    // Voice arrives on the spawned traffic channel
    if let Some(traffic_decoder) = decoders.handle_for(&format!("{} TRAFFIC 12", CONTROL_NAME)) {
        traffic_decoder.report_audio_type(AudioType::Voice);
        tokio::time::sleep(DRAIN_PERIOD * 4).await;
    }

    transmit(
        &control_decoder,
        ControlMessage::valid(MessageBody::CallClear {
            channel: ChannelNumber(12),
        }),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    info!("call timeline:");
    let timeline = registry
        .call_events(control)
        .context("control channel gone")?;
    for event in timeline.events() {
        let from = event.from.map(|i| i.to_string()).unwrap_or_default();
        let to = event.to.map(|i| i.to_string()).unwrap_or_default();
        info!(
            "  {:<15} from {:<10} to {:<10} {}",
            event.event_type.label(),
            from,
            to,
            event.details.as_deref().unwrap_or("")
        );
    }

    registry.shutdown();
    Ok(())
}
