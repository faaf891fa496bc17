//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use nom::error::{ErrorKind, FromExternalError};

use super::errors::{DecodeError, EncodeError, WireError};
use super::write::PacketSink;
use super::WireResult;

/// The largest value a four-byte remaining length can carry.
pub const VARIABLE_INTEGER_MAX: u32 = 268_435_455;

/// Parses a variable-length integer of one to four bytes.
///
/// Each byte contributes its low seven bits, the high bit marks that
/// another byte follows. Streaming: an unterminated sequence inside the
/// available input yields `Incomplete`, a fourth byte with the
/// continuation bit still set is an error.
pub fn parse_variable_u32(input: &[u8]) -> WireResult<'_, u32> {
    let mut value: u32 = 0;
    let mut rest = input;

    for exp in 0u32..4 {
        let (after, byte) = nom::number::streaming::u8(rest)?;
        rest = after;
        value += (byte as u32 & 0b0111_1111) * 128u32.pow(exp);

        if byte & 0b1000_0000 == 0 {
            return Ok((rest, value));
        }
    }

    Err(nom::Err::Failure(WireError::from_external_error(
        input,
        ErrorKind::MapRes,
        DecodeError::RemainingLengthTooLarge,
    )))
}

pub fn write_variable_u32<S: PacketSink>(value: u32, sink: &mut S) -> Result<(), EncodeError> {
    if value > VARIABLE_INTEGER_MAX {
        return Err(EncodeError::PacketTooLarge(value as usize));
    }

    let mut remainder = value;
    loop {
        let mut digit = (remainder % 128) as u8;
        remainder /= 128;
        if remainder > 0 {
            digit |= 0b1000_0000;
        }
        sink.put_u8(digit);
        if remainder == 0 {
            return Ok(());
        }
    }
}

pub fn variable_u32_binary_size(value: u32) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{parse_variable_u32, variable_u32_binary_size, write_variable_u32};

    fn roundtrip(value: u32) {
        let mut buf = Vec::new();
        write_variable_u32(value, &mut buf).unwrap();
        assert_eq!(buf.len(), variable_u32_binary_size(value));

        let (rest, parsed) = parse_variable_u32(&buf).unwrap();
        assert_eq!(rest, &[] as &[u8]);
        assert_eq!(parsed, value);
    }

    #[test]
    fn check_boundary_roundtrips() {
        for value in [
            0,
            1,
            64,
            127,
            128,
            321,
            16_383,
            16_384,
            2_097_151,
            2_097_152,
            268_435_455,
        ] {
            roundtrip(value);
        }
    }

    #[test]
    fn check_known_encodings() {
        let mut buf = Vec::new();
        write_variable_u32(321, &mut buf).unwrap();
        assert_eq!(buf, vec![193, 2]);

        let mut buf = Vec::new();
        write_variable_u32(268_435_455, &mut buf).unwrap();
        assert_eq!(buf, vec![0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn check_unterminated_is_incomplete() {
        assert!(matches!(
            parse_variable_u32(&[0x80, 0x80]),
            Err(nom::Err::Incomplete(_))
        ));
    }

    #[test]
    fn check_five_byte_sequence_rejected() {
        parse_variable_u32(&[0x80, 0x80, 0x80, 0x80, 0x01]).unwrap_err();
    }

    #[test]
    fn check_maximum_rejected_on_write() {
        let mut buf = Vec::new();
        write_variable_u32(268_435_456, &mut buf).unwrap_err();
    }
}
