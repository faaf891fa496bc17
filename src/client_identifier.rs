//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use mqtt_wire::v3::version::ProtocolVersion;

/// MQTT 3.1 brokers are only required to accept identifiers of up to 23
/// bytes; 3.1.1 raises the limit to the string maximum.
const V3_1_MAXIMUM_LENGTH: usize = 23;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentifier(String);

impl ClientIdentifier {
    pub fn new(
        value: impl Into<String>,
        version: ProtocolVersion,
    ) -> Result<ClientIdentifier, ClientIdentifierError> {
        let value = value.into();

        if value.is_empty() {
            return Err(ClientIdentifierError::Empty);
        }

        let maximum = match version {
            ProtocolVersion::V3_1 => V3_1_MAXIMUM_LENGTH,
            ProtocolVersion::V3_1_1 => u16::MAX as usize,
        };
        if value.len() > maximum {
            return Err(ClientIdentifierError::TooLong {
                length: value.len(),
                maximum,
            });
        }

        Ok(ClientIdentifier(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ClientIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientIdentifierError {
    #[error("A client identifier must not be empty")]
    Empty,
    #[error("A client identifier of {length} bytes exceeds the broker limit of {maximum}")]
    TooLong { length: usize, maximum: usize },
}

#[cfg(test)]
mod tests {
    use mqtt_wire::v3::version::ProtocolVersion;

    use super::{ClientIdentifier, ClientIdentifierError};

    #[test]
    fn check_empty_identifier_rejected() {
        assert_eq!(
            ClientIdentifier::new("", ProtocolVersion::V3_1_1).unwrap_err(),
            ClientIdentifierError::Empty
        );
    }

    #[test]
    fn check_v3_1_length_limit() {
        let long = "x".repeat(24);

        ClientIdentifier::new(long.clone(), ProtocolVersion::V3_1).unwrap_err();
        ClientIdentifier::new(long, ProtocolVersion::V3_1_1).unwrap();
    }
}
