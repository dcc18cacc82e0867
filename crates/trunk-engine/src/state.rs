//! Channel state machine core
//!
//! The state value, its legal-transition table, and the bookkeeping every
//! protocol state machine shares: talkgroups, channel number, current call
//! pointer, squelch fan-out and change notification. Protocol-specific
//! message handling layers on top in `trunking`.

use tokio::sync::mpsc;
use tracing::debug;
use trunk_protocol::{ChannelNumber, Ident};

use crate::call_event::{CallEventId, CallEventModel};
use crate::channel::ChannelId;
use crate::decoder::{AudioType, SquelchState};
use crate::events::{ChannelEvent, EventBus};

/// The state of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Source acquisition failed; the channel decodes nothing
    NoTuner,
    /// Running with no activity
    Idle,
    /// Receiving control channel signalling
    Control,
    /// A call is in progress
    Call,
    /// A call is tearing down
    Fade,
    /// Transient cleanup state on the way back to idle
    Reset,
}

impl ChannelState {
    /// Whether a transition from this state to `next` is legal
    ///
    /// Unlisted transitions are illegal and ignored by `set_state`. Fade
    /// is reachable at most once per call: Fade itself cannot re-enter
    /// Fade, which is what makes redundant teardown messages harmless.
    pub fn can_change_to(&self, next: ChannelState) -> bool {
        use ChannelState::*;
        match self {
            NoTuner => matches!(next, Idle),
            Idle => matches!(next, Control | Call),
            Control => matches!(next, Call | Fade | Idle),
            Call => matches!(next, Control | Fade),
            Fade => matches!(next, Reset),
            Reset => matches!(next, Idle),
        }
    }

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            ChannelState::NoTuner => "NO TUNER",
            ChannelState::Idle => "IDLE",
            ChannelState::Control => "CONTROL",
            ChannelState::Call => "CALL",
            ChannelState::Fade => "FADE",
            ChannelState::Reset => "RESET",
        }
    }
}

/// Token for a registered squelch listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SquelchToken(pub u64);

/// Shared bookkeeping for a channel state machine
pub struct StateCore {
    channel_id: ChannelId,
    state: ChannelState,
    channel_number: ChannelNumber,
    from_talkgroup: Option<Ident>,
    to_talkgroup: Option<Ident>,
    current_call: Option<CallEventId>,
    call_events: CallEventModel,
    squelch: SquelchState,
    next_squelch_token: u64,
    squelch_listeners: Vec<(SquelchToken, mpsc::UnboundedSender<SquelchState>)>,
    audio_type_rx: Option<mpsc::UnboundedReceiver<AudioType>>,
    events: EventBus,
}

impl StateCore {
    /// Create a core in `Idle` with the given shared collaborators
    pub fn new(channel_id: ChannelId, call_events: CallEventModel, events: EventBus) -> Self {
        Self {
            channel_id,
            state: ChannelState::Idle,
            channel_number: ChannelNumber::UNSET,
            from_talkgroup: None,
            to_talkgroup: None,
            current_call: None,
            call_events,
            squelch: SquelchState::Squelch,
            next_squelch_token: 0,
            squelch_listeners: Vec::new(),
            audio_type_rx: None,
            events,
        }
    }

    /// The channel this state machine belongs to
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Current state
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Transition to `next` if the table permits it
    ///
    /// Returns true when the state actually changed. Same-state and
    /// illegal transitions are quiet no-ops (logged at debug).
    pub fn set_state(&mut self, next: ChannelState) -> bool {
        if self.state == next {
            return false;
        }
        if !self.state.can_change_to(next) {
            debug!(
                "{}: illegal state transition {} -> {}, ignoring",
                self.channel_id,
                self.state.name(),
                next.name()
            );
            return false;
        }
        let from = self.state;
        self.state = next;
        self.events.emit(ChannelEvent::StateChanged {
            channel: self.channel_id,
            from,
            to: next,
        });
        true
    }

    /// Force the state, bypassing the transition table
    ///
    /// Only used for `NoTuner`, which is entered whenever source
    /// acquisition fails regardless of the current state.
    pub fn force_state(&mut self, next: ChannelState) {
        if self.state == next {
            return;
        }
        let from = self.state;
        self.state = next;
        self.events.emit(ChannelEvent::StateChanged {
            channel: self.channel_id,
            from,
            to: next,
        });
    }

    /// Base fade transition: enter `Fade` when legal
    pub fn fade(&mut self) -> bool {
        self.set_state(ChannelState::Fade)
    }

    /// Base reset: run `Fade -> Reset -> Idle` when legal
    pub fn reset(&mut self) {
        if self.set_state(ChannelState::Reset) {
            self.set_state(ChannelState::Idle);
        }
    }

    /// Logical channel number; UNSET until assigned
    pub fn channel_number(&self) -> ChannelNumber {
        self.channel_number
    }

    /// Assign the channel number (traffic channels know theirs up front)
    pub fn set_channel_number(&mut self, number: ChannelNumber) {
        self.channel_number = number;
        self.events.emit(ChannelEvent::ChannelNumberChanged {
            channel: self.channel_id,
            number,
        });
    }

    /// The originating talkgroup of the current activity
    pub fn from_talkgroup(&self) -> Option<Ident> {
        self.from_talkgroup
    }

    /// Set or clear the from-talkgroup; always notifies
    pub fn set_from_talkgroup(&mut self, from: Option<Ident>) {
        self.from_talkgroup = from;
        self.events.emit(ChannelEvent::FromTalkgroupChanged {
            channel: self.channel_id,
            from,
        });
    }

    /// The destination talkgroup of the current activity
    pub fn to_talkgroup(&self) -> Option<Ident> {
        self.to_talkgroup
    }

    /// Set or clear the to-talkgroup; always notifies
    pub fn set_to_talkgroup(&mut self, to: Option<Ident>) {
        self.to_talkgroup = to;
        self.events.emit(ChannelEvent::ToTalkgroupChanged {
            channel: self.channel_id,
            to,
        });
    }

    /// The in-progress call event, if any
    pub fn current_call(&self) -> Option<CallEventId> {
        self.current_call
    }

    /// Set or clear the in-progress call event pointer
    pub fn set_current_call(&mut self, call: Option<CallEventId>) {
        self.current_call = call;
    }

    /// The call event timeline this channel writes to
    pub fn call_events(&self) -> &CallEventModel {
        &self.call_events
    }

    /// Replace the timeline handle
    ///
    /// Used when a spawned traffic channel is rewired to share its parent
    /// control channel's timeline.
    pub fn set_call_event_model(&mut self, model: CallEventModel) {
        self.call_events = model;
    }

    /// The unified event bus
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Register a squelch listener; it immediately receives the current
    /// squelch state
    pub fn add_squelch_listener(
        &mut self,
        listener: mpsc::UnboundedSender<SquelchState>,
    ) -> SquelchToken {
        let _ = listener.send(self.squelch);
        self.next_squelch_token += 1;
        let token = SquelchToken(self.next_squelch_token);
        self.squelch_listeners.push((token, listener));
        token
    }

    /// Remove a squelch listener; unknown tokens are ignored
    pub fn remove_squelch_listener(&mut self, token: SquelchToken) {
        self.squelch_listeners.retain(|(t, _)| *t != token);
    }

    /// Current squelch state
    pub fn squelch(&self) -> SquelchState {
        self.squelch
    }

    /// Change the squelch state and notify every listener
    pub fn set_squelch(&mut self, state: SquelchState) {
        self.squelch = state;
        self.squelch_listeners
            .retain(|(_, tx)| tx.send(state).is_ok());
    }

    /// Attach the audio-type stream reported by the decoder's audio output
    pub fn attach_audio_type(&mut self, rx: mpsc::UnboundedReceiver<AudioType>) {
        self.audio_type_rx = Some(rx);
    }

    /// Drain pending audio-type reports, returning the most recent
    pub fn poll_audio_type(&mut self) -> Option<AudioType> {
        let rx = self.audio_type_rx.as_mut()?;
        let mut latest = None;
        while let Ok(t) = rx.try_recv() {
            latest = Some(t);
        }
        latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> StateCore {
        StateCore::new(ChannelId(1), CallEventModel::new(), EventBus::new())
    }

    #[test]
    fn transition_table() {
        use ChannelState::*;
        assert!(Idle.can_change_to(Control));
        assert!(Idle.can_change_to(Call));
        assert!(Control.can_change_to(Fade));
        assert!(Call.can_change_to(Fade));
        assert!(Fade.can_change_to(Reset));
        assert!(Reset.can_change_to(Idle));
        assert!(NoTuner.can_change_to(Idle));

        // Guards
        assert!(!Fade.can_change_to(Fade));
        assert!(!Fade.can_change_to(Call));
        assert!(!Idle.can_change_to(Fade));
        assert!(!Idle.can_change_to(NoTuner));
        assert!(!Control.can_change_to(NoTuner));
    }

    #[test]
    fn set_state_ignores_illegal_transitions() {
        let mut core = core();
        assert!(core.set_state(ChannelState::Control));
        assert!(!core.set_state(ChannelState::Control));

        // Fade twice: second attempt is a no-op
        assert!(core.fade());
        assert!(!core.fade());
        assert_eq!(core.state(), ChannelState::Fade);

        core.reset();
        assert_eq!(core.state(), ChannelState::Idle);
    }

    #[test]
    fn force_state_bypasses_table() {
        let mut core = core();
        core.set_state(ChannelState::Control);
        core.force_state(ChannelState::NoTuner);
        assert_eq!(core.state(), ChannelState::NoTuner);
    }

    #[test]
    fn state_changes_emit_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let mut core = StateCore::new(ChannelId(7), CallEventModel::new(), bus);

        core.set_state(ChannelState::Control);
        assert!(matches!(
            rx.try_recv(),
            Ok(ChannelEvent::StateChanged {
                channel: ChannelId(7),
                from: ChannelState::Idle,
                to: ChannelState::Control,
            })
        ));

        // Illegal transition emits nothing
        core.set_state(ChannelState::Reset);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn squelch_listener_receives_current_state_on_add() {
        let mut core = core();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let token = core.add_squelch_listener(tx);
        assert_eq!(rx.try_recv(), Ok(SquelchState::Squelch));

        core.set_squelch(SquelchState::Unsquelch);
        assert_eq!(rx.try_recv(), Ok(SquelchState::Unsquelch));

        core.remove_squelch_listener(token);
        core.set_squelch(SquelchState::Squelch);
        assert!(rx.try_recv().is_err());
    }
}
