//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use dashmap::DashMap;
use mqtt_wire::v3::header::PacketType;
use mqtt_wire::v3::packet::Packet;

use crate::error::MqttError;
use crate::packet::MqttPacket;

/// A handler receives the owned packet (cheap to clone into tables) plus
/// the parsed borrowed view, so no handler has to re-parse.
pub(crate) type PacketHandler = Box<dyn Fn(&MqttPacket, &Packet<'_>) + Send + Sync>;

/// Routes parsed packets to the handlers registered for their type.
///
/// Registration happens while the client is constructed, before the first
/// Connect is sent; the receive loop only ever reads the registry.
pub(crate) struct Dispatcher {
    handlers: DashMap<PacketType, Vec<PacketHandler>>,
}

impl Dispatcher {
    pub(crate) fn new() -> Dispatcher {
        Dispatcher {
            handlers: DashMap::new(),
        }
    }

    pub(crate) fn register(&self, packet_type: PacketType, handler: PacketHandler) {
        self.handlers
            .entry(packet_type)
            .or_default()
            .push(handler);
    }

    pub(crate) fn has_handler(&self, packet_type: PacketType) -> bool {
        self.handlers
            .get(&packet_type)
            .map(|handlers| !handlers.is_empty())
            .unwrap_or(false)
    }

    pub(crate) fn dispatch(&self, packet: &MqttPacket) -> Result<(), MqttError> {
        let parsed = packet.get()?;
        let packet_type = parsed.packet_type();

        match self.handlers.get(&packet_type) {
            Some(handlers) => {
                for handler in handlers.iter() {
                    handler(packet, &parsed);
                }
            }
            None => {
                tracing::debug!(?packet_type, "No handler registered, dropping packet");
            }
        }

        Ok(())
    }
}
