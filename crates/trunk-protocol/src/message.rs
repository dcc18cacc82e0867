//! Decoded control channel messages
//!
//! These are the messages a protocol decoder hands to the channel state
//! machine: already demodulated and field-decoded, one value per over-air
//! codeword class. Bit-level decoding lives behind the decoder boundary;
//! this crate only defines the decoded shape.

use std::fmt;
use std::time::SystemTime;

use crate::channel_map::ChannelNumber;
use crate::ident::{Ident, IdentKind};

/// A site identity as advertised by the control channel alive beacon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SiteId(pub u16);

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The decoded payload of one control channel codeword
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Acknowledgement (ACK) - registration when the acknowledged ident
    /// is the registration function
    Acknowledge {
        from: Ident,
        to: Ident,
        /// Classification of the ident being acknowledged
        acked: IdentKind,
    },

    /// Request for a unit to call the system (AHYC)
    Request {
        from: Ident,
        to: Ident,
        /// Protocol-supplied request description
        request: String,
    },

    /// Status or short data report (AHYQ)
    StatusReport {
        from: Ident,
        to: Ident,
        /// Protocol-supplied status text
        status: String,
    },

    /// Control channel alive beacon (ALH) advertising the site identity
    SiteBeacon { site: SiteId },

    /// Go-to-channel: a call was granted on another channel (GTC)
    CallGrant {
        from: Ident,
        to: Ident,
        /// Logical channel number carrying the call
        channel: ChannelNumber,
    },

    /// Call teardown (CLEAR)
    CallClear { channel: ChannelNumber },

    /// Control channel maintenance message, also ends a call (MAINT)
    Maintenance { channel: ChannelNumber },

    /// One segment of a short data message header chain (HEAD+n)
    ShortDataSegment {
        from: Ident,
        to: Ident,
        /// Segment index within the chain (1-based)
        segment: u8,
        /// Decoded free-text payload
        text: String,
    },
}

impl MessageBody {
    /// Over-air codeword mnemonic for logging
    pub fn opcode_name(&self) -> &'static str {
        match self {
            MessageBody::Acknowledge { .. } => "ACK",
            MessageBody::Request { .. } => "AHYC",
            MessageBody::StatusReport { .. } => "AHYQ",
            MessageBody::SiteBeacon { .. } => "ALH",
            MessageBody::CallGrant { .. } => "GTC",
            MessageBody::CallClear { .. } => "CLEAR",
            MessageBody::Maintenance { .. } => "MAINT",
            MessageBody::ShortDataSegment { .. } => "HEAD+",
        }
    }

    /// Source ident, where the codeword carries one
    pub fn from(&self) -> Option<Ident> {
        match self {
            MessageBody::Acknowledge { from, .. }
            | MessageBody::Request { from, .. }
            | MessageBody::StatusReport { from, .. }
            | MessageBody::CallGrant { from, .. }
            | MessageBody::ShortDataSegment { from, .. } => Some(*from),
            _ => None,
        }
    }

    /// Destination ident, where the codeword carries one
    pub fn to(&self) -> Option<Ident> {
        match self {
            MessageBody::Acknowledge { to, .. }
            | MessageBody::Request { to, .. }
            | MessageBody::StatusReport { to, .. }
            | MessageBody::CallGrant { to, .. }
            | MessageBody::ShortDataSegment { to, .. } => Some(*to),
            _ => None,
        }
    }
}

/// A decoded message with the decoder's structural verdict attached
///
/// `valid` reflects the codeword check performed by the decoder. Invalid
/// messages are still forwarded to generic message listeners (traffic
/// logs want them) but must never drive channel state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    /// Decoded payload
    pub body: MessageBody,
    /// Whether the codeword passed its structural check
    pub valid: bool,
    /// Receive timestamp assigned by the decoder
    pub received_at: SystemTime,
}

impl ControlMessage {
    /// Wrap a body as a structurally valid message
    pub fn valid(body: MessageBody) -> Self {
        Self {
            body,
            valid: true,
            received_at: SystemTime::now(),
        }
    }

    /// Wrap a body as a message that failed its structural check
    pub fn invalid(body: MessageBody) -> Self {
        tracing::trace!("{} codeword failed its structural check", body.opcode_name());
        Self {
            body,
            valid: false,
            received_at: SystemTime::now(),
        }
    }

    /// Whether a call grant message announces a call the state machine
    /// should act on: a real channel assignment to a callable ident
    pub fn is_valid_call(&self) -> bool {
        match &self.body {
            MessageBody::CallGrant { to, channel, .. } => {
                self.valid && channel.is_set() && to.is_callable()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_validity_requires_channel_and_callable_ident() {
        let grant = |to: u16, channel: u16| {
            ControlMessage::valid(MessageBody::CallGrant {
                from: Ident(100),
                to: Ident(to),
                channel: ChannelNumber(channel),
            })
        };

        assert!(grant(2000, 5).is_valid_call());
        assert!(grant(8185, 5).is_valid_call());
        // Channel zero means no assignment
        assert!(!grant(2000, 0).is_valid_call());
        // Registration function is not a call destination
        assert!(!grant(8186, 5).is_valid_call());
    }

    #[test]
    fn invalid_message_is_never_a_valid_call() {
        let msg = ControlMessage::invalid(MessageBody::CallGrant {
            from: Ident(100),
            to: Ident(2000),
            channel: ChannelNumber(5),
        });
        assert!(!msg.is_valid_call());
    }

    #[test]
    fn from_to_extraction() {
        let body = MessageBody::Acknowledge {
            from: Ident(100),
            to: Ident(8186),
            acked: IdentKind::Registration,
        };
        assert_eq!(body.from(), Some(Ident(100)));
        assert_eq!(body.to(), Some(Ident(8186)));
        assert_eq!(body.opcode_name(), "ACK");

        let beacon = MessageBody::SiteBeacon { site: SiteId(12) };
        assert_eq!(beacon.from(), None);
        assert_eq!(beacon.to(), None);
    }
}
