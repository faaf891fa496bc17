//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use bytes::Bytes;
use mqtt_wire::v3::errors::EncodeError;
use mqtt_wire::v3::header::PacketType;
use mqtt_wire::v3::packet::Packet;
use mqtt_wire::v3::write::PacketSink;

use crate::error::MqttError;

/// An owned, already encoded packet.
///
/// The buffer holds the complete wire representation, so clones are cheap
/// and re-sending (retransmission, tables) never re-encodes. Borrowed
/// views are produced on demand with [`MqttPacket::get`].
#[derive(Clone)]
pub struct MqttPacket {
    packet_type: PacketType,
    buffer: Bytes,
}

impl std::fmt::Debug for MqttPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttPacket")
            .field("packet_type", &self.packet_type)
            .field("len", &self.buffer.len())
            .finish()
    }
}

struct VecSink(Vec<u8>);

impl PacketSink for VecSink {
    fn put_u8(&mut self, byte: u8) {
        self.0.push(byte);
    }

    fn put_slice(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }
}

impl MqttPacket {
    /// Wraps bytes that are already known to hold one whole packet.
    pub(crate) fn from_encoded(packet_type: PacketType, buffer: Bytes) -> MqttPacket {
        MqttPacket {
            packet_type,
            buffer,
        }
    }

    pub fn from_packet(packet: &Packet<'_>) -> Result<MqttPacket, MqttError> {
        let mut sink = VecSink(Vec::with_capacity(packet.binary_size()));
        packet
            .write(&mut sink)
            .map_err(|EncodeError::PacketTooLarge(size)| {
                tracing::error!(size, "Refusing to encode an oversized packet");
                MqttError::InvalidPayloadSize
            })?;

        Ok(MqttPacket {
            packet_type: packet.packet_type(),
            buffer: Bytes::from(sink.0),
        })
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn get(&self) -> Result<Packet<'_>, MqttError> {
        match mqtt_wire::v3::packet::packet(&self.buffer) {
            Ok((&[], packet)) => Ok(packet),
            Ok((_leftover, _)) => Err(MqttError::InvalidMessage),
            Err(nom::Err::Error(error)) | Err(nom::Err::Failure(error)) => {
                Err(MqttError::from_wire(&error))
            }
            Err(nom::Err::Incomplete(_)) => Err(MqttError::InvalidMessage),
        }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use mqtt_wire::v3::packet::Packet;
    use pretty_assertions::assert_eq;

    use super::MqttPacket;

    #[test]
    fn check_roundtrip_through_owned_packet() {
        let owned = MqttPacket::from_packet(&Packet::Pingreq).unwrap();

        assert_eq!(owned.as_bytes(), &[0xC0, 0x00]);
        assert_eq!(owned.get().unwrap(), Packet::Pingreq);
    }
}
