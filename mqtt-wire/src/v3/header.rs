use nom::error::{ErrorKind, FromExternalError};

use super::errors::{DecodeError, WireError};
use super::integers::parse_variable_u32;
use super::WireResult;

/// The fourteen control packet types, as carried in the upper nibble of
/// the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Connect,
    Connack,
    Publish,
    Puback,
    Pubrec,
    Pubrel,
    Pubcomp,
    Subscribe,
    Suback,
    Unsubscribe,
    Unsuback,
    Pingreq,
    Pingresp,
    Disconnect,
}

impl PacketType {
    pub fn from_nibble(nibble: u8) -> Result<PacketType, DecodeError> {
        match nibble {
            0b0001 => Ok(PacketType::Connect),
            0b0010 => Ok(PacketType::Connack),
            0b0011 => Ok(PacketType::Publish),
            0b0100 => Ok(PacketType::Puback),
            0b0101 => Ok(PacketType::Pubrec),
            0b0110 => Ok(PacketType::Pubrel),
            0b0111 => Ok(PacketType::Pubcomp),
            0b1000 => Ok(PacketType::Subscribe),
            0b1001 => Ok(PacketType::Suback),
            0b1010 => Ok(PacketType::Unsubscribe),
            0b1011 => Ok(PacketType::Unsuback),
            0b1100 => Ok(PacketType::Pingreq),
            0b1101 => Ok(PacketType::Pingresp),
            0b1110 => Ok(PacketType::Disconnect),
            invalid => Err(DecodeError::InvalidPacketType(invalid)),
        }
    }

    pub fn to_nibble(self) -> u8 {
        match self {
            PacketType::Connect => 0b0001,
            PacketType::Connack => 0b0010,
            PacketType::Publish => 0b0011,
            PacketType::Puback => 0b0100,
            PacketType::Pubrec => 0b0101,
            PacketType::Pubrel => 0b0110,
            PacketType::Pubcomp => 0b0111,
            PacketType::Subscribe => 0b1000,
            PacketType::Suback => 0b1001,
            PacketType::Unsubscribe => 0b1010,
            PacketType::Unsuback => 0b1011,
            PacketType::Pingreq => 0b1100,
            PacketType::Pingresp => 0b1101,
            PacketType::Disconnect => 0b1110,
        }
    }

    /// The flag nibble every packet type except Publish must carry.
    pub(crate) fn required_flags(self) -> Option<u8> {
        match self {
            PacketType::Publish => None,
            PacketType::Pubrel | PacketType::Subscribe | PacketType::Unsubscribe => Some(0b0010),
            _ => Some(0b0000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: u32,
}

/// Parses the fixed header in streaming mode: an `Incomplete` result means
/// more bytes are needed before the header can be judged.
pub fn fixed_header(input: &[u8]) -> WireResult<'_, FixedHeader> {
    let (input, first) = nom::number::streaming::u8(input)?;

    let packet_type = match PacketType::from_nibble(first >> 4) {
        Ok(packet_type) => packet_type,
        Err(e) => {
            return Err(nom::Err::Failure(WireError::from_external_error(
                input,
                ErrorKind::MapRes,
                e,
            )))
        }
    };
    let flags = first & 0b0000_1111;

    if let Some(required) = packet_type.required_flags() {
        if flags != required {
            return Err(nom::Err::Failure(WireError::from_external_error(
                input,
                ErrorKind::MapRes,
                DecodeError::InvalidFlags { flags },
            )));
        }
    }

    let (input, remaining_length) = parse_variable_u32(input)?;

    Ok((
        input,
        FixedHeader {
            packet_type,
            flags,
            remaining_length,
        },
    ))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{fixed_header, FixedHeader, PacketType};

    #[test]
    fn check_pingreq_header() {
        let (rest, header) = fixed_header(&[0xC0, 0x00]).unwrap();

        assert_eq!(rest, &[] as &[u8]);
        assert_eq!(
            header,
            FixedHeader {
                packet_type: PacketType::Pingreq,
                flags: 0,
                remaining_length: 0,
            }
        );
    }

    #[test]
    fn check_publish_flags_pass_through() {
        let (_, header) = fixed_header(&[0x3D, 0x02, 0xAA, 0xBB]).unwrap();

        assert_eq!(header.packet_type, PacketType::Publish);
        assert_eq!(header.flags, 0b1101);
        assert_eq!(header.remaining_length, 2);
    }

    #[test]
    fn check_pubrel_nibble_enforced() {
        fixed_header(&[0x60, 0x02]).unwrap_err();

        let (_, header) = fixed_header(&[0x62, 0x02]).unwrap();
        assert_eq!(header.packet_type, PacketType::Pubrel);
    }

    #[test]
    fn check_reserved_type_rejected() {
        fixed_header(&[0x00, 0x00]).unwrap_err();
        fixed_header(&[0xF0, 0x00]).unwrap_err();
    }

    #[test]
    fn check_incomplete_header() {
        assert!(matches!(
            fixed_header(&[0x32]),
            Err(nom::Err::Incomplete(_))
        ));
        assert!(matches!(
            fixed_header(&[0x32, 0x80]),
            Err(nom::Err::Incomplete(_))
        ));
    }
}
