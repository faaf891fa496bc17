use nom::{bytes::complete::take, number::complete::be_u16, Parser};
use nom_supreme::ParserExt;

use super::errors::StringError;
use super::WireResult;

/// An MQTT string: two length bytes (big endian) followed by that many
/// bytes of UTF-8. Zero length is permitted, U+0000 is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MqttStr<'message> {
    value: &'message str,
}

impl<'message> MqttStr<'message> {
    pub fn new(value: &'message str) -> Result<MqttStr<'message>, StringError> {
        if value.len() > u16::MAX as usize {
            Err(StringError::TooLong(value.len()))
        } else if value.contains('\u{0000}') {
            Err(StringError::NullCharacter)
        } else {
            Ok(MqttStr { value })
        }
    }

    pub fn as_str(&self) -> &'message str {
        self.value
    }

    pub(crate) fn encoded_len(&self) -> usize {
        2 + self.value.len()
    }
}

impl std::ops::Deref for MqttStr<'_> {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.value
    }
}

impl AsRef<str> for MqttStr<'_> {
    fn as_ref(&self) -> &str {
        self.value
    }
}

pub fn string(input: &[u8]) -> WireResult<'_, MqttStr<'_>> {
    let len = be_u16;
    let string_data = len.flat_map(take);

    string_data
        .map_res(std::str::from_utf8)
        .map_res(MqttStr::new)
        .parse(input)
}

/// Length-prefixed binary data (passwords, will payloads).
pub fn binary(input: &[u8]) -> WireResult<'_, &[u8]> {
    let (input, len) = be_u16(input)?;
    take(len)(input)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{binary, string};

    #[test]
    fn check_simple_string() {
        let input = [0x00, 0x03, b'a', b'/', b'b'];

        let (rest, s) = string(&input).unwrap();

        assert_eq!(rest, &[] as &[u8]);
        assert_eq!(s.as_str(), "a/b");
    }

    #[test]
    fn check_empty_string() {
        let input = [0x00, 0x00];

        let (rest, s) = string(&input).unwrap();

        assert_eq!(rest, &[] as &[u8]);
        assert_eq!(s.as_str(), "");
    }

    #[test]
    fn check_multibyte_string() {
        let input = [0x00, 0x05, 0x41, 0xF0, 0xAA, 0x9B, 0x94];

        let (_, s) = string(&input).unwrap();

        assert_eq!(s.as_str(), "A\u{2A6D4}");
    }

    #[test]
    fn check_null_character_rejected() {
        let input = [0x00, 0x02, 0x00, 0x01];

        string(&input).unwrap_err();
    }

    #[test]
    fn check_invalid_utf8_rejected() {
        let input = [0x00, 0x02, 0xC3, 0x28];

        string(&input).unwrap_err();
    }

    #[test]
    fn check_length_must_not_exceed_remaining() {
        let input = [0x00, 0x04, b'a', b'b'];

        string(&input).unwrap_err();
    }

    #[test]
    fn check_binary_data() {
        let input = [0x00, 0x02, 0xF0, 0x0F, 0xAA];

        let (rest, data) = binary(&input).unwrap();

        assert_eq!(rest, &[0xAA]);
        assert_eq!(data, &[0xF0, 0x0F]);
    }
}
