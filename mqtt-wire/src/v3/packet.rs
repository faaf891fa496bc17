//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use nom::error::{ErrorKind, FromExternalError};
use nom::number::complete::be_u16;
use nom::Parser;

use super::connect_return::{connect_return_code, ConnectReturnCode};
use super::errors::{DecodeError, EncodeError, WireError};
use super::header::{fixed_header, FixedHeader, PacketType};
use super::identifier::{packet_identifier, PacketIdentifier};
use super::integers::{variable_u32_binary_size, write_variable_u32, VARIABLE_INTEGER_MAX};
use super::qos::QualityOfService;
use super::strings::{binary, string, MqttStr};
use super::subscription::{
    subscribe_requests, subscribe_return_codes, unsubscribe_topics, SubscribeRequest,
    SubscribeReturnCode,
};
use super::version::ProtocolVersion;
use super::will::LastWill;
use super::write::PacketSink;
use super::WireResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connect<'message> {
    pub protocol_name: MqttStr<'message>,
    pub protocol_level: u8,
    pub clean_session: bool,
    pub will: Option<LastWill<'message>>,
    pub username: Option<MqttStr<'message>>,
    pub password: Option<&'message [u8]>,
    pub keep_alive: u16,
    pub client_id: MqttStr<'message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connack {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publish<'message> {
    pub dup: bool,
    pub qos: QualityOfService,
    pub retain: bool,
    pub topic_name: MqttStr<'message>,
    pub id: Option<PacketIdentifier>,
    pub payload: &'message [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Puback {
    pub id: PacketIdentifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pubrec {
    pub id: PacketIdentifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pubrel {
    pub id: PacketIdentifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pubcomp {
    pub id: PacketIdentifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe<'message> {
    pub id: PacketIdentifier,
    pub requests: Vec<SubscribeRequest<'message>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suback {
    pub id: PacketIdentifier,
    pub codes: Vec<SubscribeReturnCode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe<'message> {
    pub id: PacketIdentifier,
    pub topics: Vec<MqttStr<'message>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsuback {
    pub id: PacketIdentifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet<'message> {
    Connect(Connect<'message>),
    Connack(Connack),
    Publish(Publish<'message>),
    Puback(Puback),
    Pubrec(Pubrec),
    Pubrel(Pubrel),
    Pubcomp(Pubcomp),
    Subscribe(Subscribe<'message>),
    Suback(Suback),
    Unsubscribe(Unsubscribe<'message>),
    Unsuback(Unsuback),
    Pingreq,
    Pingresp,
    Disconnect,
}

impl Connect<'_> {
    /// The protocol name/level pair announced in the variable header, if
    /// it is one this crate speaks.
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        ProtocolVersion::from_parts(&self.protocol_name, self.protocol_level)
    }
}

impl<'message> Packet<'message> {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::Connack(_) => PacketType::Connack,
            Packet::Publish(_) => PacketType::Publish,
            Packet::Puback(_) => PacketType::Puback,
            Packet::Pubrec(_) => PacketType::Pubrec,
            Packet::Pubrel(_) => PacketType::Pubrel,
            Packet::Pubcomp(_) => PacketType::Pubcomp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::Suback(_) => PacketType::Suback,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::Unsuback(_) => PacketType::Unsuback,
            Packet::Pingreq => PacketType::Pingreq,
            Packet::Pingresp => PacketType::Pingresp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    fn remaining_length(&self) -> usize {
        match self {
            Packet::Connect(Connect {
                protocol_name,
                will,
                username,
                password,
                client_id,
                ..
            }) => {
                protocol_name.encoded_len()
                    + 1 // protocol level
                    + 1 // connect flags
                    + 2 // keep alive
                    + client_id.encoded_len()
                    + will.as_ref().map(LastWill::encoded_len).unwrap_or_default()
                    + username
                        .as_ref()
                        .map(MqttStr::encoded_len)
                        .unwrap_or_default()
                    + password.map(|p| 2 + p.len()).unwrap_or_default()
            }
            Packet::Connack(_) => 2,
            Packet::Publish(Publish {
                topic_name,
                id,
                payload,
                ..
            }) => {
                topic_name.encoded_len()
                    + id.as_ref()
                        .map(PacketIdentifier::encoded_len)
                        .unwrap_or_default()
                    + payload.len()
            }
            Packet::Puback(_) | Packet::Pubrec(_) | Packet::Pubrel(_) | Packet::Pubcomp(_) => 2,
            Packet::Subscribe(Subscribe { id, requests }) => {
                id.encoded_len()
                    + requests
                        .iter()
                        .map(SubscribeRequest::encoded_len)
                        .sum::<usize>()
            }
            Packet::Suback(Suback { id, codes }) => id.encoded_len() + codes.len(),
            Packet::Unsubscribe(Unsubscribe { id, topics }) => {
                id.encoded_len() + topics.iter().map(MqttStr::encoded_len).sum::<usize>()
            }
            Packet::Unsuback(_) => 2,
            Packet::Pingreq | Packet::Pingresp | Packet::Disconnect => 0,
        }
    }

    /// The full on-wire size of this packet, fixed header included.
    pub fn binary_size(&self) -> usize {
        let remaining = self.remaining_length();
        1 + variable_u32_binary_size(remaining.min(VARIABLE_INTEGER_MAX as usize) as u32)
            + remaining
    }

    fn first_byte(&self) -> u8 {
        let flags = match self {
            Packet::Publish(Publish {
                dup, qos, retain, ..
            }) => ((*dup as u8) << 3) | (qos.to_byte() << 1) | (*retain as u8),
            _ => self
                .packet_type()
                .required_flags()
                .unwrap_or_default(),
        };

        (self.packet_type().to_nibble() << 4) | flags
    }

    pub fn write<S: PacketSink>(&self, sink: &mut S) -> Result<(), EncodeError> {
        let remaining = self.remaining_length();
        if remaining > VARIABLE_INTEGER_MAX as usize {
            return Err(EncodeError::PacketTooLarge(remaining));
        }

        sink.put_u8(self.first_byte());
        write_variable_u32(remaining as u32, sink)?;

        match self {
            Packet::Connect(Connect {
                protocol_name,
                protocol_level,
                clean_session,
                will,
                username,
                password,
                keep_alive,
                client_id,
            }) => {
                sink.put_string(protocol_name);
                sink.put_u8(*protocol_level);

                let mut connect_flags = 0u8;
                if username.is_some() {
                    connect_flags |= 0b1000_0000;
                }
                if password.is_some() {
                    connect_flags |= 0b0100_0000;
                }
                if let Some(will) = will {
                    if will.retain {
                        connect_flags |= 0b0010_0000;
                    }
                    connect_flags |= will.qos.to_byte() << 3;
                    connect_flags |= 0b0000_0100;
                }
                if *clean_session {
                    connect_flags |= 0b0000_0010;
                }
                sink.put_u8(connect_flags);
                sink.put_u16(*keep_alive);

                sink.put_string(client_id);

                if let Some(will) = will {
                    sink.put_string(&will.topic);
                    sink.put_binary(will.payload);
                }
                if let Some(username) = username {
                    sink.put_string(username);
                }
                if let Some(password) = password {
                    sink.put_binary(password);
                }
            }
            Packet::Connack(Connack {
                session_present,
                return_code,
            }) => {
                sink.put_u8(*session_present as u8);
                sink.put_u8(*return_code as u8);
            }
            Packet::Publish(Publish {
                topic_name,
                id,
                payload,
                ..
            }) => {
                sink.put_string(topic_name);
                if let Some(id) = id {
                    sink.put_u16(id.get());
                }
                sink.put_slice(payload);
            }
            Packet::Puback(Puback { id })
            | Packet::Pubrec(Pubrec { id })
            | Packet::Pubrel(Pubrel { id })
            | Packet::Pubcomp(Pubcomp { id })
            | Packet::Unsuback(Unsuback { id }) => {
                sink.put_u16(id.get());
            }
            Packet::Subscribe(Subscribe { id, requests }) => {
                sink.put_u16(id.get());
                for request in requests {
                    sink.put_string(&request.topic);
                    sink.put_u8(request.qos.to_byte());
                }
            }
            Packet::Suback(Suback { id, codes }) => {
                sink.put_u16(id.get());
                for code in codes {
                    sink.put_u8(*code as u8);
                }
            }
            Packet::Unsubscribe(Unsubscribe { id, topics }) => {
                sink.put_u16(id.get());
                for topic in topics {
                    sink.put_string(topic);
                }
            }
            Packet::Pingreq | Packet::Pingresp | Packet::Disconnect => {}
        }

        Ok(())
    }
}

fn fail(input: &[u8], error: DecodeError) -> nom::Err<WireError<'_>> {
    nom::Err::Error(WireError::from_external_error(
        input,
        ErrorKind::MapRes,
        error,
    ))
}

fn connect_body(input: &[u8]) -> WireResult<'_, Packet<'_>> {
    let (input, protocol_name) = string(input)?;
    let (input, protocol_level) = nom::number::complete::u8(input)?;

    if ProtocolVersion::from_parts(&protocol_name, protocol_level).is_none() {
        let error = match &*protocol_name {
            "MQTT" | "MQIsdp" => DecodeError::InvalidProtocolLevel(protocol_level),
            other => DecodeError::InvalidProtocolName(other.to_string()),
        };
        return Err(fail(input, error));
    }

    let (input, connect_flags) = nom::number::complete::u8(input)?;

    if connect_flags & 0b0000_0001 != 0 {
        return Err(fail(input, DecodeError::ForbiddenReservedValue));
    }

    let username_flag = connect_flags & 0b1000_0000 != 0;
    let password_flag = connect_flags & 0b0100_0000 != 0;
    let will_retain = connect_flags & 0b0010_0000 != 0;
    let will_qos_bits = (connect_flags >> 3) & 0b0000_0011;
    let will_flag = connect_flags & 0b0000_0100 != 0;
    let clean_session = connect_flags & 0b0000_0010 != 0;

    if !will_flag && (will_qos_bits != 0 || will_retain) {
        return Err(fail(input, DecodeError::InconsistentWillFlag));
    }

    let (input, keep_alive) = be_u16(input)?;

    let (input, client_id) = string(input)?;

    let (input, will) = if will_flag {
        let (input, topic) = string(input)?;
        let (input, payload) = binary(input)?;
        let qos = QualityOfService::from_byte(will_qos_bits).map_err(|e| fail(input, e))?;

        (
            input,
            Some(LastWill {
                topic,
                payload,
                qos,
                retain: will_retain,
            }),
        )
    } else {
        (input, None)
    };

    let (input, username) = if username_flag {
        string.map(Some).parse(input)?
    } else {
        (input, None)
    };

    let (input, password) = if password_flag {
        binary.map(Some).parse(input)?
    } else {
        (input, None)
    };

    Ok((
        input,
        Packet::Connect(Connect {
            protocol_name,
            protocol_level,
            clean_session,
            will,
            username,
            password,
            keep_alive,
            client_id,
        }),
    ))
}

fn connack_body(input: &[u8]) -> WireResult<'_, Packet<'_>> {
    let (input, acknowledge_flags) = nom::number::complete::u8(input)?;

    if acknowledge_flags & 0b1111_1110 != 0 {
        return Err(fail(input, DecodeError::ForbiddenReservedValue));
    }

    let (input, return_code) = connect_return_code(input)?;

    Ok((
        input,
        Packet::Connack(Connack {
            session_present: acknowledge_flags & 0b0000_0001 != 0,
            return_code,
        }),
    ))
}

fn publish_body(flags: u8, input: &[u8]) -> WireResult<'_, Packet<'_>> {
    let dup = flags & 0b1000 != 0;
    let retain = flags & 0b0001 != 0;
    let qos = QualityOfService::from_byte((flags & 0b0110) >> 1).map_err(|e| fail(input, e))?;

    if dup && qos == QualityOfService::AtMostOnce {
        return Err(fail(input, DecodeError::InvalidDupFlag));
    }

    let (input, topic_name) = string(input)?;

    let (input, id) = if qos != QualityOfService::AtMostOnce {
        packet_identifier.map(Some).parse(input)?
    } else {
        (input, None)
    };

    // Whatever the variable header left over is the payload.
    let (input, payload) = nom::combinator::rest(input)?;

    Ok((
        input,
        Packet::Publish(Publish {
            dup,
            qos,
            retain,
            topic_name,
            id,
            payload,
        }),
    ))
}

fn packet_body<'message>(
    header: &FixedHeader,
    input: &'message [u8],
) -> WireResult<'message, Packet<'message>> {
    match header.packet_type {
        PacketType::Connect => connect_body(input),
        PacketType::Connack => connack_body(input),
        PacketType::Publish => publish_body(header.flags, input),
        PacketType::Puback => packet_identifier
            .map(|id| Packet::Puback(Puback { id }))
            .parse(input),
        PacketType::Pubrec => packet_identifier
            .map(|id| Packet::Pubrec(Pubrec { id }))
            .parse(input),
        PacketType::Pubrel => packet_identifier
            .map(|id| Packet::Pubrel(Pubrel { id }))
            .parse(input),
        PacketType::Pubcomp => packet_identifier
            .map(|id| Packet::Pubcomp(Pubcomp { id }))
            .parse(input),
        PacketType::Subscribe => {
            let (input, id) = packet_identifier(input)?;
            let (input, requests) = subscribe_requests(input)?;

            Ok((input, Packet::Subscribe(Subscribe { id, requests })))
        }
        PacketType::Suback => {
            let (input, id) = packet_identifier(input)?;
            let (input, codes) = subscribe_return_codes(input)?;

            Ok((input, Packet::Suback(Suback { id, codes })))
        }
        PacketType::Unsubscribe => {
            let (input, id) = packet_identifier(input)?;
            let (input, topics) = unsubscribe_topics(input)?;

            Ok((input, Packet::Unsubscribe(Unsubscribe { id, topics })))
        }
        PacketType::Unsuback => packet_identifier
            .map(|id| Packet::Unsuback(Unsuback { id }))
            .parse(input),
        PacketType::Pingreq => Ok((input, Packet::Pingreq)),
        PacketType::Pingresp => Ok((input, Packet::Pingresp)),
        PacketType::Disconnect => Ok((input, Packet::Disconnect)),
    }
}

/// Parses one whole packet.
///
/// The fixed header is read in streaming mode, so `Incomplete` means the
/// input does not yet hold the whole packet. The body must consume exactly
/// the announced remaining length; leftover bytes are an error.
pub fn packet(input: &[u8]) -> WireResult<'_, Packet<'_>> {
    let (input, header) = fixed_header(input)?;

    let (input, body) = nom::bytes::streaming::take(header.remaining_length)(input)?;

    let (_, packet) = nom::combinator::all_consuming(|i| packet_body(&header, i))(body)?;

    Ok((input, packet))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{packet, Connack, Connect, Packet, Puback, Publish, Pubrel, Subscribe, Suback};
    use crate::v3::connect_return::ConnectReturnCode;
    use crate::v3::identifier::PacketIdentifier;
    use crate::v3::qos::QualityOfService;
    use crate::v3::strings::MqttStr;
    use crate::v3::subscription::{SubscribeRequest, SubscribeReturnCode};
    use crate::v3::will::LastWill;

    fn encode(p: &Packet<'_>) -> Vec<u8> {
        let mut buf = Vec::with_capacity(p.binary_size());
        p.write(&mut buf).unwrap();
        assert_eq!(buf.len(), p.binary_size());
        buf
    }

    #[test]
    fn check_bare_connect_encoding() {
        let connect = Packet::Connect(Connect {
            protocol_name: MqttStr::new("MQTT").unwrap(),
            protocol_level: 4,
            clean_session: true,
            will: None,
            username: None,
            password: None,
            keep_alive: 30,
            client_id: MqttStr::new("c1").unwrap(),
        });

        assert_eq!(
            encode(&connect),
            vec![
                0x10, 0x0E, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x1E, 0x00,
                0x02, b'c', b'1',
            ]
        );
    }

    #[test]
    fn check_connect_roundtrip_with_all_fields() {
        let connect = Packet::Connect(Connect {
            protocol_name: MqttStr::new("MQTT").unwrap(),
            protocol_level: 4,
            clean_session: true,
            will: Some(LastWill {
                topic: MqttStr::new("WORLD").unwrap(),
                payload: &[0xFF],
                qos: QualityOfService::ExactlyOnce,
                retain: true,
            }),
            username: Some(MqttStr::new("ADMIN").unwrap()),
            password: Some(&[0xF0]),
            keep_alive: 16,
            client_id: MqttStr::new("HELLO").unwrap(),
        });

        let bytes = encode(&connect);
        let (rest, parsed) = packet(&bytes).unwrap();

        assert_eq!(rest, &[] as &[u8]);
        assert_eq!(parsed, connect);
    }

    #[test]
    fn check_v3_1_connect_roundtrip() {
        let connect = Packet::Connect(Connect {
            protocol_name: MqttStr::new("MQIsdp").unwrap(),
            protocol_level: 3,
            clean_session: true,
            will: None,
            username: None,
            password: None,
            keep_alive: 60,
            client_id: MqttStr::new("legacy").unwrap(),
        });

        let bytes = encode(&connect);
        let (_, parsed) = packet(&bytes).unwrap();

        assert_eq!(parsed, connect);
    }

    #[test]
    fn check_will_consistency() {
        let input = &[
            0b0001_0000,
            17,
            0x0,
            0x4, // string length
            b'M',
            b'Q',
            b'T',
            b'T',
            0x4,         // level
            0b0000_1000, // connect flags with will QoS 1 but no will flag
            0x0,
            0x10, // keep alive in secs
            0x0,  // client identifier
            0x5,
            b'H',
            b'E',
            b'L',
            b'L',
            b'O',
        ];

        packet(input).unwrap_err();
    }

    #[test]
    fn check_unknown_protocol_rejected() {
        let connect = Packet::Connect(Connect {
            protocol_name: MqttStr::new("MQTTX").unwrap(),
            protocol_level: 4,
            clean_session: true,
            will: None,
            username: None,
            password: None,
            keep_alive: 30,
            client_id: MqttStr::new("c1").unwrap(),
        });

        packet(&encode(&connect)).unwrap_err();
    }

    #[test]
    fn check_connack_parse() {
        let (rest, parsed) = packet(&[0x20, 0x02, 0x00, 0x05]).unwrap();

        assert_eq!(rest, &[] as &[u8]);
        assert_eq!(
            parsed,
            Packet::Connack(Connack {
                session_present: false,
                return_code: ConnectReturnCode::NotAuthorized,
            })
        );
    }

    #[test]
    fn check_connack_reserved_bits_rejected() {
        packet(&[0x20, 0x02, 0x02, 0x00]).unwrap_err();
    }

    #[test]
    fn check_qos1_publish_encoding() {
        let publish = Packet::Publish(Publish {
            dup: false,
            qos: QualityOfService::AtLeastOnce,
            retain: false,
            topic_name: MqttStr::new("a/b").unwrap(),
            id: PacketIdentifier::new(1),
            payload: b"hi",
        });

        assert_eq!(
            encode(&publish),
            vec![0x32, 0x09, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x01, b'h', b'i']
        );
    }

    #[test]
    fn check_publish_roundtrip() {
        for (qos, dup, retain, id) in [
            (QualityOfService::AtMostOnce, false, false, None),
            (QualityOfService::AtLeastOnce, false, true, PacketIdentifier::new(12)),
            (QualityOfService::ExactlyOnce, true, false, PacketIdentifier::new(700)),
        ] {
            let publish = Packet::Publish(Publish {
                dup,
                qos,
                retain,
                topic_name: MqttStr::new("sensors/one/temp").unwrap(),
                id,
                payload: &[0x25, 0x00, 0x11],
            });

            let bytes = encode(&publish);
            let (rest, parsed) = packet(&bytes).unwrap();

            assert_eq!(rest, &[] as &[u8]);
            assert_eq!(parsed, publish);
        }
    }

    #[test]
    fn check_dup_on_qos0_rejected() {
        // 0x38: publish, DUP set, QoS 0
        packet(&[0x38, 0x05, 0x00, 0x01, b'a', b'h', b'i']).unwrap_err();
    }

    #[test]
    fn check_puback_bytes() {
        let (_, parsed) = packet(&[0x40, 0x02, 0x00, 0x01]).unwrap();

        assert_eq!(
            parsed,
            Packet::Puback(Puback {
                id: PacketIdentifier::new(1).unwrap(),
            })
        );

        assert_eq!(encode(&parsed), vec![0x40, 0x02, 0x00, 0x01]);
    }

    #[test]
    fn check_pubrel_nibble_preserved() {
        let pubrel = Packet::Pubrel(Pubrel {
            id: PacketIdentifier::new(5).unwrap(),
        });

        let bytes = encode(&pubrel);
        assert_eq!(bytes, vec![0x62, 0x02, 0x00, 0x05]);

        let (_, parsed) = packet(&bytes).unwrap();
        assert_eq!(parsed, pubrel);
    }

    #[test]
    fn check_subscribe_encoding() {
        let subscribe = Packet::Subscribe(Subscribe {
            id: PacketIdentifier::new(1).unwrap(),
            requests: vec![SubscribeRequest {
                topic: MqttStr::new("sensors/+/temp").unwrap(),
                qos: QualityOfService::AtMostOnce,
            }],
        });

        let bytes = encode(&subscribe);
        assert_eq!(
            bytes,
            vec![
                0x82, 0x13, 0x00, 0x01, 0x00, 0x0E, b's', b'e', b'n', b's', b'o', b'r', b's',
                b'/', b'+', b'/', b't', b'e', b'm', b'p', 0x00,
            ]
        );

        let (_, parsed) = packet(&bytes).unwrap();
        assert_eq!(parsed, subscribe);
    }

    #[test]
    fn check_suback_roundtrip() {
        let suback = Packet::Suback(Suback {
            id: PacketIdentifier::new(1).unwrap(),
            codes: vec![
                SubscribeReturnCode::GrantedAtLeastOnce,
                SubscribeReturnCode::Failure,
            ],
        });

        let bytes = encode(&suback);
        let (_, parsed) = packet(&bytes).unwrap();

        assert_eq!(parsed, suback);
    }

    #[test]
    fn check_flag_only_packets() {
        for (bytes, expected) in [
            (&[0xC0u8, 0x00][..], Packet::Pingreq),
            (&[0xD0, 0x00][..], Packet::Pingresp),
            (&[0xE0, 0x00][..], Packet::Disconnect),
        ] {
            let (rest, parsed) = packet(bytes).unwrap();

            assert_eq!(rest, &[] as &[u8]);
            assert_eq!(parsed, expected);
            assert_eq!(encode(&parsed), bytes.to_vec());
        }
    }

    #[test]
    fn check_leftover_body_bytes_rejected() {
        // A Puback whose remaining length claims three bytes.
        packet(&[0x40, 0x03, 0x00, 0x01, 0xFF]).unwrap_err();
    }

    #[test]
    fn check_truncated_body_is_incomplete() {
        assert!(matches!(
            packet(&[0x40, 0x02, 0x00]),
            Err(nom::Err::Incomplete(_))
        ));
    }

    #[test]
    fn check_trailing_packet_left_in_input() {
        let input = &[0x40, 0x02, 0x00, 0x01, 0xC0, 0x00];

        let (rest, _parsed) = packet(input).unwrap();

        assert_eq!(rest, &[0xC0, 0x00]);
    }
}
