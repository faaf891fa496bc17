//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use super::errors::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QualityOfService {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QualityOfService {
    pub fn from_byte(byte: u8) -> Result<QualityOfService, DecodeError> {
        match byte {
            0b00 => Ok(QualityOfService::AtMostOnce),
            0b01 => Ok(QualityOfService::AtLeastOnce),
            0b10 => Ok(QualityOfService::ExactlyOnce),
            invalid => Err(DecodeError::InvalidQualityOfService(invalid)),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            QualityOfService::AtMostOnce => 0b00,
            QualityOfService::AtLeastOnce => 0b01,
            QualityOfService::ExactlyOnce => 0b10,
        }
    }
}
