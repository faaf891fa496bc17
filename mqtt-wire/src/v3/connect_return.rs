//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use nom::Parser;
use nom_supreme::ParserExt;

use super::errors::DecodeError;
use super::WireResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    BrokerUnavailable = 3,
    BadCredentials = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    pub fn from_byte(byte: u8) -> Result<ConnectReturnCode, DecodeError> {
        match byte {
            0 => Ok(ConnectReturnCode::Accepted),
            1 => Ok(ConnectReturnCode::UnacceptableProtocolVersion),
            2 => Ok(ConnectReturnCode::IdentifierRejected),
            3 => Ok(ConnectReturnCode::BrokerUnavailable),
            4 => Ok(ConnectReturnCode::BadCredentials),
            5 => Ok(ConnectReturnCode::NotAuthorized),
            invalid => Err(DecodeError::InvalidConnectReturnCode(invalid)),
        }
    }
}

pub fn connect_return_code(input: &[u8]) -> WireResult<'_, ConnectReturnCode> {
    nom::number::complete::u8
        .map_res(ConnectReturnCode::from_byte)
        .parse(input)
}
