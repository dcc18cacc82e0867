//! Channel registry
//!
//! Owns every channel entity, its pipeline, and its state machine, and
//! hands out identifiers instead of references. Traffic channels are
//! allocated here when a control channel processes a call grant and
//! released when their call tears down.
//!
//! Lock discipline: the registry lock only guards the channel map and is
//! never held across a pipeline or state machine call, so pipeline locks
//! and the registry lock cannot deadlock against each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use trunk_protocol::{ChannelNumber, Ident};

use crate::call_event::CallEventModel;
use crate::channel::{Channel, ChannelConfig, ChannelId, ChannelType, SourceConfig};
use crate::error::ChannelError;
use crate::events::{ChannelEvent, EventBus};
use crate::pipeline::{ChannelPipeline, ChannelServices};
use crate::state::{ChannelState, StateCore};
use crate::trunking::TrunkingChannelState;

struct ChannelEntry {
    channel: Channel,
    pipeline: ChannelPipeline,
    state: Arc<Mutex<TrunkingChannelState>>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    channels: HashMap<ChannelId, ChannelEntry>,
    /// Traffic channel back-references: traffic id to (parent, number)
    parents: HashMap<ChannelId, (ChannelId, ChannelNumber)>,
}

/// The result of allocating a traffic channel for a call grant
pub struct TrafficSpawn {
    /// Registry identifier of the new channel
    pub id: ChannelId,
    /// False when no tuner could be acquired for the granted frequency
    pub processing: bool,
    /// The new channel's state machine, for call seeding
    pub state: Arc<Mutex<TrunkingChannelState>>,
}

/// Clonable handle to the channel registry
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    services: ChannelServices,
    events: EventBus,
}

impl ChannelRegistry {
    /// Create an empty registry over the given services
    pub fn new(services: ChannelServices, events: EventBus) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            services,
            events,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().expect("registry lock")
    }

    /// The unified event bus every registered channel emits into
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Register a channel; it stays stopped until enabled
    pub fn create(&self, config: ChannelConfig) -> ChannelId {
        self.create_with_model(config, CallEventModel::new())
    }

    fn create_with_model(&self, config: ChannelConfig, model: CallEventModel) -> ChannelId {
        let id = {
            let mut inner = self.lock();
            inner.next_id += 1;
            ChannelId(inner.next_id)
        };

        let alias_list = config
            .alias_list
            .as_deref()
            .and_then(|name| self.services.aliases.resolve(name));

        let pipeline = ChannelPipeline::new(
            id,
            config.clone(),
            self.services.clone(),
            self.events.clone(),
            model.clone(),
        );
        let core = StateCore::new(id, model, self.events.clone());
        let mut machine = TrunkingChannelState::new(core, config.clone(), alias_list);
        machine.set_registry(self.clone());
        let state = Arc::new(Mutex::new(machine));
        pipeline.set_state_machine(Arc::clone(&state));

        info!("{}: registered channel [{}]", id, config.name);
        self.lock().channels.insert(
            id,
            ChannelEntry {
                channel: Channel::new(id, config),
                pipeline,
                state,
            },
        );
        id
    }

    /// The number of registered channels
    pub fn len(&self) -> usize {
        self.lock().channels.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.lock().channels.is_empty()
    }

    /// Identifiers of every registered channel
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.lock().channels.keys().copied().collect()
    }

    /// A channel's configuration
    pub fn config(&self, id: ChannelId) -> Option<ChannelConfig> {
        self.lock().channels.get(&id).map(|e| e.channel.config.clone())
    }

    /// A channel's pipeline handle
    pub fn pipeline(&self, id: ChannelId) -> Option<ChannelPipeline> {
        self.lock().channels.get(&id).map(|e| e.pipeline.clone())
    }

    /// A channel's state machine handle
    pub fn state(&self, id: ChannelId) -> Option<Arc<Mutex<TrunkingChannelState>>> {
        self.lock().channels.get(&id).map(|e| Arc::clone(&e.state))
    }

    /// A channel's call event timeline
    pub fn call_events(&self, id: ChannelId) -> Option<CallEventModel> {
        self.lock()
            .channels
            .get(&id)
            .map(|e| e.pipeline.call_events())
    }

    /// Enable or disable a channel, starting or stopping its pipeline
    pub fn set_enabled(&self, id: ChannelId, enabled: bool) -> Result<(), ChannelError> {
        let pipeline = {
            let mut inner = self.lock();
            let entry = inner
                .channels
                .get_mut(&id)
                .ok_or(ChannelError::ChannelNotFound(id))?;
            entry.channel.config.enabled = enabled;
            entry.pipeline.clone()
        };
        pipeline.set_enabled(enabled);
        if enabled {
            pipeline.start()
        } else {
            pipeline.stop();
            Ok(())
        }
    }

    /// Allocate, seed, and start a traffic channel for a granted call
    ///
    /// The new channel inherits the parent's decode configuration, alias
    /// list, system, site, and logging setup, and shares `model` as its
    /// call event timeline. `processing` in the result is false when the
    /// grant's frequency could not be tuned.
    pub fn spawn_traffic(
        &self,
        parent: ChannelId,
        number: ChannelNumber,
        frequency_hz: Option<u64>,
        from: Ident,
        to: Ident,
        model: CallEventModel,
    ) -> Result<TrafficSpawn, ChannelError> {
        let parent_config = self
            .config(parent)
            .ok_or(ChannelError::ChannelNotFound(parent))?;

        let config = ChannelConfig {
            name: format!("{} TRAFFIC {}", parent_config.name, number),
            channel_type: ChannelType::Traffic,
            enabled: true,
            source: SourceConfig::Tuner {
                frequency_hz: frequency_hz.unwrap_or(0),
            },
            decode: parent_config.decode.clone(),
            alias_list: parent_config.alias_list.clone(),
            system: parent_config.system.clone(),
            site: parent_config.site.clone(),
            event_logs: parent_config.event_logs.clone(),
            recording: parent_config.recording,
        };

        let id = self.create_with_model(config, model);
        let (pipeline, state) = {
            let inner = self.lock();
            let entry = inner.channels.get(&id).ok_or(ChannelError::Disposed)?;
            (entry.pipeline.clone(), Arc::clone(&entry.state))
        };

        {
            let mut machine = state.lock().expect("channel state lock");
            machine.core_mut().set_channel_number(number);
            machine.core_mut().set_from_talkgroup(Some(from));
            machine.core_mut().set_to_talkgroup(Some(to));
        }

        pipeline.start()?;
        let processing = pipeline.is_processing();
        if !processing {
            debug!("{}: traffic channel {} has no tuner", id, number);
        }

        Ok(TrafficSpawn { id, processing, state })
    }

    /// The traffic channel already allocated for a channel number, if any
    pub fn traffic_channel_for(
        &self,
        parent: ChannelId,
        number: ChannelNumber,
    ) -> Option<ChannelId> {
        self.lock().channels.get(&parent).and_then(|entry| {
            entry
                .channel
                .traffic_channels()
                .find(|(n, _)| *n == number)
                .map(|(_, id)| id)
        })
    }

    /// Record a spawned traffic channel on its parent
    pub fn register_traffic_channel(
        &self,
        parent: ChannelId,
        number: ChannelNumber,
        traffic: ChannelId,
    ) {
        let mut inner = self.lock();
        if let Some(entry) = inner.channels.get_mut(&parent) {
            entry.channel.add_traffic_channel(number, traffic);
        }
        inner.parents.insert(traffic, (parent, number));
    }

    /// Tear down the traffic channel allocated for a channel number
    ///
    /// Returns the released channel id, or None when no traffic channel
    /// was allocated for that number.
    pub fn tear_down_traffic(
        &self,
        parent: ChannelId,
        number: ChannelNumber,
    ) -> Option<ChannelId> {
        let entry = {
            let mut inner = self.lock();
            let traffic = inner
                .channels
                .get_mut(&parent)?
                .channel
                .remove_traffic_channel(number)?;
            inner.parents.remove(&traffic);
            inner.channels.remove(&traffic)
        };
        let entry = entry?;
        let id = entry.pipeline.channel_id();
        info!("{}: tearing down traffic channel {}", id, number);
        entry.pipeline.dispose();
        Some(id)
    }

    /// Remove a channel, disposing its pipeline and any spawned traffic
    /// channels
    pub fn remove(&self, id: ChannelId) -> Result<(), ChannelError> {
        let traffic: Vec<(ChannelNumber, ChannelId)> = {
            let inner = self.lock();
            let entry = inner
                .channels
                .get(&id)
                .ok_or(ChannelError::ChannelNotFound(id))?;
            entry.channel.traffic_channels().collect()
        };
        for (number, _) in traffic {
            self.tear_down_traffic(id, number);
        }

        let entry = {
            let mut inner = self.lock();
            if let Some((parent, number)) = inner.parents.remove(&id) {
                if let Some(parent_entry) = inner.channels.get_mut(&parent) {
                    parent_entry.channel.remove_traffic_channel(number);
                }
            }
            inner.channels.remove(&id)
        };
        if let Some(entry) = entry {
            entry.pipeline.dispose();
        }
        Ok(())
    }

    /// Stop every pipeline, traffic channels first
    pub fn shutdown(&self) {
        let (traffic, standard): (Vec<_>, Vec<_>) = {
            let inner = self.lock();
            let traffic = inner
                .channels
                .values()
                .filter(|e| e.channel.config.channel_type == ChannelType::Traffic)
                .map(|e| e.pipeline.clone())
                .collect();
            let standard = inner
                .channels
                .values()
                .filter(|e| e.channel.config.channel_type == ChannelType::Standard)
                .map(|e| e.pipeline.clone())
                .collect();
            (traffic, standard)
        };
        for pipeline in traffic.into_iter().chain(standard) {
            pipeline.stop();
        }
    }

    /// Watch the event bus and release traffic channels when they fade
    ///
    /// Covers teardowns decoded on the traffic channel itself, where the
    /// parent control channel never sees the clear-down message. Must be
    /// called from within a tokio runtime.
    pub fn watch_teardown(&self) {
        let registry = self.clone();
        let mut events = self.events.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let ChannelEvent::StateChanged {
                    channel,
                    to: ChannelState::Fade,
                    ..
                } = event
                {
                    let parent = registry.lock().parents.get(&channel).copied();
                    if let Some((parent, number)) = parent {
                        if registry.tear_down_traffic(parent, number).is_none() {
                            warn!("{}: faded traffic channel already released", channel);
                        }
                    }
                }
            }
        });
    }
}
