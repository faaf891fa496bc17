use nom::error::{ErrorKind, FromExternalError, ParseError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("An invalid packet type was supplied: {}", .0)]
    InvalidPacketType(u8),
    #[error("The fixed header flags {flags:#06b} are not valid for this packet type")]
    InvalidFlags { flags: u8 },
    #[error("An invalid Quality of Service (QoS) was supplied: {}", .0)]
    InvalidQualityOfService(u8),
    #[error("The remaining length is longer than four bytes allow")]
    RemainingLengthTooLarge,
    #[error("The peer sent an unsupported protocol name: {}", .0)]
    InvalidProtocolName(String),
    #[error("The peer sent an unsupported protocol level: {}", .0)]
    InvalidProtocolLevel(u8),
    #[error("Received a forbidden reserved value")]
    ForbiddenReservedValue,
    #[error("The will flag is unset but will attributes were supplied")]
    InconsistentWillFlag,
    #[error("The DUP flag was set on a publish of Quality of Service level 0")]
    InvalidDupFlag,
    #[error("The packet length does not fit the remaining length")]
    InvalidPacketLength,
    #[error("Received an invalid connect return code: {}", .0)]
    InvalidConnectReturnCode(u8),
    #[error("Received an invalid subscribe return code: {}", .0)]
    InvalidSubscribeReturnCode(u8),
    #[error("A packet identifier of zero is not allowed")]
    ZeroPacketIdentifier,
    #[error("A string contained a null character")]
    NullCharacter,
    #[error("A string was not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("The packet body of {} bytes exceeds the maximum remaining length", .0)]
    PacketTooLarge(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StringError {
    #[error("A string of length {} is too long, the maximum is {}", .0, u16::MAX)]
    TooLong(usize),
    #[error("Strings may not contain a null character")]
    NullCharacter,
}

impl From<StringError> for DecodeError {
    fn from(value: StringError) -> Self {
        match value {
            StringError::TooLong(_) => DecodeError::InvalidPacketLength,
            StringError::NullCharacter => DecodeError::NullCharacter,
        }
    }
}

/// The error type every parser in this crate uses.
///
/// nom's stock error type drops external errors on the floor; this one
/// keeps the wire-level cause, so callers can tell a remaining-length
/// overflow apart from a merely malformed packet.
#[derive(Debug, Clone, PartialEq)]
pub struct WireError<'input> {
    pub input: &'input [u8],
    pub kind: ErrorKind,
    pub cause: Option<DecodeError>,
}

impl<'input> ParseError<&'input [u8]> for WireError<'input> {
    fn from_error_kind(input: &'input [u8], kind: ErrorKind) -> Self {
        WireError {
            input,
            kind,
            cause: None,
        }
    }

    fn append(_input: &'input [u8], _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'input> FromExternalError<&'input [u8], DecodeError> for WireError<'input> {
    fn from_external_error(input: &'input [u8], kind: ErrorKind, e: DecodeError) -> Self {
        WireError {
            input,
            kind,
            cause: Some(e),
        }
    }
}

impl<'input> FromExternalError<&'input [u8], StringError> for WireError<'input> {
    fn from_external_error(input: &'input [u8], kind: ErrorKind, e: StringError) -> Self {
        WireError {
            input,
            kind,
            cause: Some(e.into()),
        }
    }
}

impl<'input> FromExternalError<&'input [u8], std::str::Utf8Error> for WireError<'input> {
    fn from_external_error(input: &'input [u8], kind: ErrorKind, _e: std::str::Utf8Error) -> Self {
        WireError {
            input,
            kind,
            cause: Some(DecodeError::InvalidUtf8),
        }
    }
}
