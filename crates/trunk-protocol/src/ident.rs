//! Radio unit identifiers
//!
//! MPT-1327-style networks address radios with a 13-bit ident. Most of the
//! value space is ordinary subscriber units, but the top of the range is
//! reserved for special system functions (registration, all-call, the
//! system controller, gateways). Classifying the acknowledged ident is how
//! the channel state machine distinguishes a registration acknowledge from
//! an ordinary one.

use std::fmt;

/// Maximum encodable ident value (13-bit field)
pub const IDENT_MAX: u16 = 8191;

/// A 13-bit radio unit or system-function identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ident(pub u16);

impl Ident {
    /// Classify this ident against the reserved assignments
    pub fn kind(&self) -> IdentKind {
        IdentKind::classify(self.0)
    }

    /// Get the raw ident value
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Whether this ident can be the destination of a call grant
    pub fn is_callable(&self) -> bool {
        matches!(self.kind(), IdentKind::Subscriber | IdentKind::AllCall)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            IdentKind::Subscriber => write!(f, "{}", self.0),
            kind => write!(f, "{}({})", kind.label(), self.0),
        }
    }
}

/// Reserved ident classification
///
/// Follows the MPT-1327 reserved ident table: everything between 1 and
/// 8100 is an ordinary subscriber unit, 8101 and above are system
/// functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IdentKind {
    /// Ident 0 - not a valid address
    Invalid,
    /// 1..=8100 - ordinary subscriber unit or talkgroup
    Subscriber,
    /// 8101..=8180 - PSTN gateway
    PstnGateway,
    /// 8181 - PABX gateway
    PabxGateway,
    /// 8182 - data gateway
    DataGateway,
    /// 8183..=8184 - reserved for future assignment
    Reserved,
    /// 8185 - all-call (every unit on the site)
    AllCall,
    /// 8186 - network registration function
    Registration,
    /// 8187 - include (late entry to an existing call)
    Include,
    /// 8188 - call diversion function
    Divert,
    /// 8189 - short data message function
    ShortData,
    /// 8190 - prearranged PSTN destination
    PstnPrearranged,
    /// 8191 - the trunking system controller itself
    SystemController,
    /// Above the 13-bit field - cannot appear in a decoded message
    OutOfRange,
}

impl IdentKind {
    /// Classify a raw ident value
    pub fn classify(value: u16) -> Self {
        match value {
            0 => IdentKind::Invalid,
            1..=8100 => IdentKind::Subscriber,
            8101..=8180 => IdentKind::PstnGateway,
            8181 => IdentKind::PabxGateway,
            8182 => IdentKind::DataGateway,
            8183..=8184 => IdentKind::Reserved,
            8185 => IdentKind::AllCall,
            8186 => IdentKind::Registration,
            8187 => IdentKind::Include,
            8188 => IdentKind::Divert,
            8189 => IdentKind::ShortData,
            8190 => IdentKind::PstnPrearranged,
            8191 => IdentKind::SystemController,
            _ => IdentKind::OutOfRange,
        }
    }

    /// Short label used in call event details (e.g. "ACK REGI")
    pub fn label(&self) -> &'static str {
        match self {
            IdentKind::Invalid => "DUMMY",
            IdentKind::Subscriber => "UNIT",
            IdentKind::PstnGateway => "PSTNGI",
            IdentKind::PabxGateway => "PABXI",
            IdentKind::DataGateway => "DATAI",
            IdentKind::Reserved => "RSVD",
            IdentKind::AllCall => "ALLI",
            IdentKind::Registration => "REGI",
            IdentKind::Include => "INCI",
            IdentKind::Divert => "DIVERTI",
            IdentKind::ShortData => "SDMI",
            IdentKind::PstnPrearranged => "PSTNSI",
            IdentKind::SystemController => "TSCI",
            IdentKind::OutOfRange => "OOR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn subscriber_range_classification() {
        assert_eq!(IdentKind::classify(1), IdentKind::Subscriber);
        assert_eq!(IdentKind::classify(4200), IdentKind::Subscriber);
        assert_eq!(IdentKind::classify(8100), IdentKind::Subscriber);
        assert_eq!(IdentKind::classify(8101), IdentKind::PstnGateway);
    }

    #[test]
    fn reserved_idents() {
        assert_eq!(IdentKind::classify(0), IdentKind::Invalid);
        assert_eq!(IdentKind::classify(8185), IdentKind::AllCall);
        assert_eq!(IdentKind::classify(8186), IdentKind::Registration);
        assert_eq!(IdentKind::classify(8189), IdentKind::ShortData);
        assert_eq!(IdentKind::classify(8191), IdentKind::SystemController);
    }

    #[test]
    fn callable_idents() {
        assert!(Ident(1234).is_callable());
        assert!(Ident(8185).is_callable());
        assert!(!Ident(8186).is_callable());
        assert!(!Ident(0).is_callable());
    }

    #[test]
    fn display_includes_label_for_special_idents() {
        assert_eq!(Ident(1234).to_string(), "1234");
        assert_eq!(Ident(8186).to_string(), "REGI(8186)");
    }

    proptest! {
        #[test]
        fn classification_is_total(value in 0u16..u16::MAX) {
            // Every raw value classifies without panicking, and only values
            // outside the 13-bit field map to OutOfRange.
            let kind = IdentKind::classify(value);
            prop_assert_eq!(kind == IdentKind::OutOfRange, value > IDENT_MAX);
        }

        #[test]
        fn labels_are_nonempty(value in 0u16..=IDENT_MAX) {
            prop_assert!(!IdentKind::classify(value).label().is_empty());
        }
    }
}
