//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use mqtt_wire::v3::connect_return::ConnectReturnCode;
use mqtt_wire::v3::errors::{DecodeError, WireError};
use mqtt_wire::v3::integers::VARIABLE_INTEGER_MAX;

use crate::client_identifier::ClientIdentifierError;
use crate::codec::MqttPacketCodecError;
use crate::topic::TopicError;

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("The client identifier is not acceptable")]
    ClientIdentifierInvalid(#[from] ClientIdentifierError),

    #[error("The broker rejected the connection: {:?}", .0)]
    ConnectionRefused(ConnectReturnCode),

    #[error("The connect handshake did not complete in time")]
    ConnectTimeout,

    #[error("An I/O error occurred")]
    Io(#[from] std::io::Error),

    #[error("The operation requires an established connection")]
    NoConnection,

    #[error("A connection already exists or is being established")]
    AlreadyConnected,

    #[error("The topic is not valid")]
    InvalidTopic(#[from] TopicError),

    #[error("Received bytes do not form a valid packet header")]
    InvalidHeader,

    #[error("Received bytes do not form a valid packet")]
    InvalidMessage,

    #[error("The remaining length exceeds the maximum of {} bytes", VARIABLE_INTEGER_MAX)]
    InvalidPayloadSize,

    #[error("The connection was lost")]
    Disconnected,

    #[error("No free message identifiers are available")]
    PacketIdentifiersExhausted,

    #[error("A secure connection was requested without TLS configuration")]
    MissingTlsConfig,

    #[error("No private key was found in the configured key file")]
    MissingPrivateKey,

    #[error("The server name is not valid for TLS")]
    InvalidServerName,

    #[error("The TLS configuration could not be applied")]
    Tls(#[from] tokio_rustls::rustls::Error),
}

impl MqttError {
    /// Maps a wire-level decode failure onto the caller-facing kinds:
    /// a remaining-length overflow and fixed-header defects keep their
    /// identity, everything else is a malformed packet.
    pub(crate) fn from_wire(error: &WireError<'_>) -> MqttError {
        match &error.cause {
            Some(DecodeError::RemainingLengthTooLarge) => MqttError::InvalidPayloadSize,
            Some(DecodeError::InvalidPacketType(_)) | Some(DecodeError::InvalidFlags { .. }) => {
                MqttError::InvalidHeader
            }
            _ => MqttError::InvalidMessage,
        }
    }
}

impl From<MqttPacketCodecError> for MqttError {
    fn from(value: MqttPacketCodecError) -> Self {
        match value {
            MqttPacketCodecError::Io(e) => MqttError::Io(e),
            MqttPacketCodecError::MalformedHeader => MqttError::InvalidHeader,
            MqttPacketCodecError::MalformedPacket => MqttError::InvalidMessage,
            MqttPacketCodecError::RemainingLengthExceeded => MqttError::InvalidPayloadSize,
        }
    }
}
