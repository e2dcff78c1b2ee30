use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Why a primitive was refused.
///
/// Every kind carries a fixed 16-bit code that peers exchange verbatim in
/// negative acknowledgements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorKind {
    /// Refused without a specific cause.
    Unspecified = 0x0000,
    /// Bytes match no known primitive schema.
    MalformedPrimitive = 0x0001,
    /// Signature check failed.
    VerificationFailure = 0x0002,
    /// Author or recipient is not a known identity.
    UnknownIdentity = 0x0003,
    /// Container has no binding at ingestion time.
    UnboundContainer = 0x0004,
    /// The primitive already carries a validated debinding.
    AlreadyDebound = 0x0005,
    /// Target type is illegal for this primitive kind.
    InvalidTarget = 0x0006,
    /// Author does not match the bound object's author.
    InconsistentAuthor = 0x0007,
    /// Requested address is absent.
    DoesNotExist = 0x0008,
    /// Frame history does not chain to the prior frame.
    IllegalDynamicFrame = 0x0009,
    /// Anything else.
    Generic = 0xFFFF,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 11] = [
        ErrorKind::Unspecified,
        ErrorKind::MalformedPrimitive,
        ErrorKind::VerificationFailure,
        ErrorKind::UnknownIdentity,
        ErrorKind::UnboundContainer,
        ErrorKind::AlreadyDebound,
        ErrorKind::InvalidTarget,
        ErrorKind::InconsistentAuthor,
        ErrorKind::DoesNotExist,
        ErrorKind::IllegalDynamicFrame,
        ErrorKind::Generic,
    ];

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Result<Self, TypeError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code() == code)
            .ok_or(TypeError::UnknownCode(code))
    }

    /// Big-endian wire form.
    pub fn to_be_bytes(self) -> [u8; 2] {
        self.code().to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 2]) -> Result<Self, TypeError> {
        Self::from_code(u16::from_be_bytes(bytes))
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Unspecified => "non-specific",
            Self::MalformedPrimitive => "malformed primitive",
            Self::VerificationFailure => "verification failure",
            Self::UnknownIdentity => "unknown author or recipient",
            Self::UnboundContainer => "unbound container",
            Self::AlreadyDebound => "already debound",
            Self::InvalidTarget => "invalid target",
            Self::InconsistentAuthor => "inconsistent author",
            Self::DoesNotExist => "does not exist",
            Self::IllegalDynamicFrame => "illegal dynamic frame",
            Self::Generic => "generic nak",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}: {}", self.code(), self.description())
    }
}

impl From<ErrorKind> for u16 {
    fn from(kind: ErrorKind) -> Self {
        kind.code()
    }
}

impl TryFrom<u16> for ErrorKind {
    type Error = TypeError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

/// A validation outcome that refused a primitive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub kind: ErrorKind,
    pub reason: String,
}

impl Rejection {
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

impl std::error::Error for Rejection {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_table() {
        assert_eq!(ErrorKind::Unspecified.code(), 0x0000);
        assert_eq!(ErrorKind::MalformedPrimitive.code(), 0x0001);
        assert_eq!(ErrorKind::UnboundContainer.code(), 0x0004);
        assert_eq!(ErrorKind::DoesNotExist.code(), 0x0008);
        assert_eq!(ErrorKind::IllegalDynamicFrame.code(), 0x0009);
        assert_eq!(ErrorKind::Generic.to_be_bytes(), [0xFF, 0xFF]);
        assert_eq!(ErrorKind::AlreadyDebound.to_be_bytes(), [0x00, 0x05]);
    }

    #[test]
    fn every_code_survives_the_wire_form() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::from_be_bytes(kind.to_be_bytes()).unwrap(), kind);
        }
    }

    #[test]
    fn zero_code_is_unspecified_not_generic() {
        assert_eq!(ErrorKind::from_be_bytes([0x00, 0x00]).unwrap(), ErrorKind::Unspecified);
        assert_eq!(ErrorKind::Unspecified.to_string(), "0x0000: non-specific");
        let parsed: ErrorKind = serde_json::from_str("0").unwrap();
        assert_eq!(parsed, ErrorKind::Unspecified);
    }

    #[test]
    fn unknown_code_is_an_error() {
        assert_eq!(
            ErrorKind::from_code(0x0042),
            Err(TypeError::UnknownCode(0x0042))
        );
    }

    #[test]
    fn serde_uses_numeric_code() {
        let json = serde_json::to_string(&ErrorKind::InvalidTarget).unwrap();
        assert_eq!(json, "6");
        let parsed: ErrorKind = serde_json::from_str("65535").unwrap();
        assert_eq!(parsed, ErrorKind::Generic);
        assert!(serde_json::from_str::<ErrorKind>("12").is_err());
    }

    #[test]
    fn rejection_display_carries_code() {
        let rejection = Rejection::new(ErrorKind::UnboundContainer, "no binding");
        assert_eq!(rejection.to_string(), "0x0004: unbound container: no binding");
    }
}
