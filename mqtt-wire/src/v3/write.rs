//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

/// A byte sink packets are serialized into.
///
/// Writing into a growable buffer cannot fail; size validation happens in
/// the packet writers before any byte is emitted.
pub trait PacketSink {
    fn put_u8(&mut self, byte: u8);
    fn put_slice(&mut self, bytes: &[u8]);

    fn put_u16(&mut self, value: u16) {
        self.put_slice(&value.to_be_bytes());
    }

    /// A length-prefixed MQTT string. The length must fit a `u16`, which
    /// every validated string type in this crate guarantees.
    fn put_string(&mut self, value: &str) {
        self.put_u16(value.len() as u16);
        self.put_slice(value.as_bytes());
    }

    /// Length-prefixed binary data, used for passwords and will payloads.
    fn put_binary(&mut self, value: &[u8]) {
        self.put_u16(value.len() as u16);
        self.put_slice(value);
    }
}

impl PacketSink for Vec<u8> {
    fn put_u8(&mut self, byte: u8) {
        self.push(byte);
    }

    fn put_slice(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}
