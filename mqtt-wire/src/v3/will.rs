//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use super::qos::QualityOfService;
use super::strings::MqttStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastWill<'message> {
    pub topic: MqttStr<'message>,
    pub payload: &'message [u8],
    pub qos: QualityOfService,
    pub retain: bool,
}

impl LastWill<'_> {
    pub(crate) fn encoded_len(&self) -> usize {
        self.topic.encoded_len() + 2 + self.payload.len()
    }
}
