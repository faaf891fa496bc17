//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use nom::{multi::many1, Parser};
use nom_supreme::ParserExt;

use super::errors::DecodeError;
use super::qos::QualityOfService;
use super::strings::{string, MqttStr};
use super::WireResult;

/// One `(topic filter, requested QoS)` entry of a Subscribe payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeRequest<'message> {
    pub topic: MqttStr<'message>,
    pub qos: QualityOfService,
}

impl SubscribeRequest<'_> {
    pub(crate) fn encoded_len(&self) -> usize {
        self.topic.encoded_len() + 1
    }
}

pub fn subscribe_request(input: &[u8]) -> WireResult<'_, SubscribeRequest<'_>> {
    let (input, topic) = string(input)?;
    let (input, qos) = nom::number::complete::u8
        .map_res(QualityOfService::from_byte)
        .parse(input)?;

    Ok((input, SubscribeRequest { topic, qos }))
}

pub fn subscribe_requests(input: &[u8]) -> WireResult<'_, Vec<SubscribeRequest<'_>>> {
    many1(subscribe_request)(input)
}

/// A per-request result carried in a SubAck payload. 0, 1 and 2 grant
/// the corresponding maximum QoS, 0x80 reports failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubscribeReturnCode {
    GrantedAtMostOnce = 0x00,
    GrantedAtLeastOnce = 0x01,
    GrantedExactlyOnce = 0x02,
    Failure = 0x80,
}

impl SubscribeReturnCode {
    pub fn from_byte(byte: u8) -> Result<SubscribeReturnCode, DecodeError> {
        match byte {
            0x00 => Ok(SubscribeReturnCode::GrantedAtMostOnce),
            0x01 => Ok(SubscribeReturnCode::GrantedAtLeastOnce),
            0x02 => Ok(SubscribeReturnCode::GrantedExactlyOnce),
            0x80 => Ok(SubscribeReturnCode::Failure),
            invalid => Err(DecodeError::InvalidSubscribeReturnCode(invalid)),
        }
    }

    pub fn granted_qos(&self) -> Option<QualityOfService> {
        match self {
            SubscribeReturnCode::GrantedAtMostOnce => Some(QualityOfService::AtMostOnce),
            SubscribeReturnCode::GrantedAtLeastOnce => Some(QualityOfService::AtLeastOnce),
            SubscribeReturnCode::GrantedExactlyOnce => Some(QualityOfService::ExactlyOnce),
            SubscribeReturnCode::Failure => None,
        }
    }
}

pub fn subscribe_return_codes(input: &[u8]) -> WireResult<'_, Vec<SubscribeReturnCode>> {
    many1(nom::number::complete::u8.map_res(SubscribeReturnCode::from_byte))(input)
}

pub fn unsubscribe_topics(input: &[u8]) -> WireResult<'_, Vec<MqttStr<'_>>> {
    many1(string)(input)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{subscribe_requests, subscribe_return_codes, SubscribeReturnCode};
    use crate::v3::qos::QualityOfService;

    #[test]
    fn check_subscribe_request_sequence() {
        let input = &[
            0, 3, // length 3
            0x61, 0x2F, 0x62, // "a/b"
            1,    // QoS 1
            0, 3, // length 3
            0x63, 0x2F, 0x64, // "c/d"
            2,    // QoS 2
        ];

        let (rest, requests) = subscribe_requests(input).unwrap();

        assert_eq!(rest, &[] as &[u8]);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].topic.as_str(), "a/b");
        assert_eq!(requests[0].qos, QualityOfService::AtLeastOnce);
        assert_eq!(requests[1].topic.as_str(), "c/d");
        assert_eq!(requests[1].qos, QualityOfService::ExactlyOnce);
    }

    #[test]
    fn check_empty_payload_rejected() {
        subscribe_requests(&[]).unwrap_err();
    }

    #[test]
    fn check_return_codes() {
        let input = &[0x01, 0x02, 0x00, 0x80];

        let (rest, codes) = subscribe_return_codes(input).unwrap();

        assert_eq!(rest, &[] as &[u8]);
        assert_eq!(
            codes,
            vec![
                SubscribeReturnCode::GrantedAtLeastOnce,
                SubscribeReturnCode::GrantedExactlyOnce,
                SubscribeReturnCode::GrantedAtMostOnce,
                SubscribeReturnCode::Failure,
            ]
        );
    }

    #[test]
    fn check_invalid_return_code_rejected() {
        nom::combinator::all_consuming(subscribe_return_codes)(&[0x01, 0x05]).unwrap_err();
    }
}
