//! Trunked Radio Protocol Library
//!
//! This crate provides the decoded data types of an MPT-1327-style trunked
//! radio network:
//!
//! - **Control messages**: acknowledges, requests, status reports, site
//!   beacons, call grants, teardowns and short data segments, as produced
//!   by a protocol decoder
//! - **Idents**: 13-bit unit identifiers with the reserved system-function
//!   assignments (registration, all-call, gateways, system controller)
//! - **Channel maps**: logical channel number to RF frequency lookup
//!
//! Bit-level demodulation and codeword decoding are the decoder's concern;
//! this crate only defines the decoded shapes those decoders emit.
//!
//! # Example
//!
//! ```rust
//! use trunk_protocol::{ChannelMap, ChannelNumber, ChannelRange, Ident, IdentKind};
//!
//! // Classify the acknowledged ident of an ACK codeword
//! assert_eq!(Ident(8186).kind(), IdentKind::Registration);
//!
//! // Resolve a granted channel number to a frequency
//! let mut map = ChannelMap::new("Site 12");
//! map.add_range(ChannelRange {
//!     first: 1,
//!     last: 320,
//!     base_hz: 177_050_000,
//!     step_hz: 12_500,
//! }).unwrap();
//! assert_eq!(map.frequency(ChannelNumber(2)), Some(177_062_500));
//! ```

pub mod channel_map;
pub mod error;
pub mod ident;
pub mod message;

pub use channel_map::{ChannelMap, ChannelNumber, ChannelRange};
pub use error::ProtocolError;
pub use ident::{Ident, IdentKind, IDENT_MAX};
pub use message::{ControlMessage, MessageBody, SiteId};
