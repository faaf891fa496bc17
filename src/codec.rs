//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use mqtt_wire::v3::errors::DecodeError;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::MqttError;
use crate::packet::MqttPacket;

#[derive(Debug, thiserror::Error)]
pub enum MqttPacketCodecError {
    #[error("A codec error")]
    Io(#[from] std::io::Error),

    #[error("The received bytes do not form a valid fixed header")]
    MalformedHeader,

    #[error("The received bytes do not form a valid packet")]
    MalformedPacket,

    #[error("The received remaining length exceeds the protocol maximum")]
    RemainingLengthExceeded,
}

pub(crate) struct MqttPacketCodec;

impl Decoder for MqttPacketCodec {
    type Item = MqttPacket;

    type Error = MqttPacketCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        // 1. byte: packet type and flags
        // 2.-5. byte: remaining length
        let (header_len, packet_type, remaining_length) =
            match mqtt_wire::v3::header::fixed_header(&src[..]) {
                Ok((rest, header)) => (
                    src.len() - rest.len(),
                    header.packet_type,
                    header.remaining_length as usize,
                ),
                Err(nom::Err::Incomplete(_)) => {
                    src.reserve(1);
                    return Ok(None);
                }
                Err(nom::Err::Error(error)) | Err(nom::Err::Failure(error)) => {
                    return Err(
                        if matches!(error.cause, Some(DecodeError::RemainingLengthTooLarge)) {
                            MqttPacketCodecError::RemainingLengthExceeded
                        } else {
                            MqttPacketCodecError::MalformedHeader
                        },
                    );
                }
            };

        let total_packet_length = header_len + remaining_length;

        if src.len() < total_packet_length {
            src.reserve(total_packet_length - src.len());
            return Ok(None);
        }

        let buffer = src.split_to(total_packet_length).freeze();
        let packet = MqttPacket::from_encoded(packet_type, buffer);

        // Validate the whole body now so handlers never see malformed
        // data; the specific failure kind survives for observers.
        if let Err(error) = packet.get() {
            return Err(match error {
                MqttError::InvalidPayloadSize => MqttPacketCodecError::RemainingLengthExceeded,
                MqttError::InvalidHeader => MqttPacketCodecError::MalformedHeader,
                _ => MqttPacketCodecError::MalformedPacket,
            });
        }

        Ok(Some(packet))
    }
}

impl Encoder<MqttPacket> for MqttPacketCodec {
    type Error = MqttPacketCodecError;

    fn encode(&mut self, packet: MqttPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(packet.as_bytes());
        Ok(())
    }
}
