//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use std::num::NonZeroU16;

use nom::{number::complete::be_u16, Parser};
use nom_supreme::ParserExt;

use super::errors::DecodeError;
use super::WireResult;

/// A message identifier. Zero is not a valid identifier on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketIdentifier(pub NonZeroU16);

impl PacketIdentifier {
    pub fn new(value: u16) -> Option<PacketIdentifier> {
        NonZeroU16::new(value).map(PacketIdentifier)
    }

    #[inline]
    pub fn get(&self) -> u16 {
        self.0.get()
    }

    pub(crate) fn encoded_len(&self) -> usize {
        2
    }
}

impl From<NonZeroU16> for PacketIdentifier {
    fn from(value: NonZeroU16) -> Self {
        PacketIdentifier(value)
    }
}

impl std::fmt::Display for PacketIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

pub fn packet_identifier(input: &[u8]) -> WireResult<'_, PacketIdentifier> {
    be_u16
        .map_res(|value| PacketIdentifier::new(value).ok_or(DecodeError::ZeroPacketIdentifier))
        .parse(input)
}

#[cfg(test)]
mod tests {
    use super::packet_identifier;

    #[test]
    fn check_simple_identifier() {
        let (rest, id) = packet_identifier(&[0x00, 0x07]).unwrap();

        assert_eq!(rest, &[] as &[u8]);
        assert_eq!(id.get(), 7);
    }

    #[test]
    fn check_zero_identifier_rejected() {
        packet_identifier(&[0x00, 0x00]).unwrap_err();
    }
}
