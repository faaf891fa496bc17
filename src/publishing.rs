//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mqtt_wire::v3::header::PacketType;
use mqtt_wire::v3::identifier::PacketIdentifier;
use mqtt_wire::v3::packet::{Packet, Puback, Pubcomp, Publish, Pubrec, Pubrel};
use mqtt_wire::v3::qos::QualityOfService;
use mqtt_wire::v3::strings::MqttStr;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

use crate::connection::PacketSender;
use crate::dispatcher::Dispatcher;
use crate::error::MqttError;
use crate::packet::MqttPacket;
use crate::packet_identifier::PacketIdentifierAllocator;
use crate::topic::{TopicError, TopicName};

/// A publish that arrived from the broker, broadcast to the
/// subscriptions manager for fan-out.
#[derive(Debug, Clone)]
pub(crate) struct IncomingPublish {
    pub(crate) topic: String,
    pub(crate) payload: Bytes,
}

/// In-flight packets in their original send order.
///
/// Send order matters for retransmission after a reconnect, so removal
/// keeps the order vector in step with the map.
struct OutstandingPackets {
    order: Vec<u16>,
    packets: BTreeMap<u16, MqttPacket>,
}

impl OutstandingPackets {
    fn empty() -> Self {
        Self {
            order: Vec::new(),
            packets: BTreeMap::new(),
        }
    }

    fn insert(&mut self, id: u16, packet: MqttPacket) {
        debug_assert_eq!(self.order.len(), self.packets.len());

        self.order.push(id);
        let previous = self.packets.insert(id, packet);

        debug_assert!(previous.is_none());
    }

    fn update_by_id(&mut self, id: u16, packet: MqttPacket) {
        let previous = self.packets.insert(id, packet);

        debug_assert!(previous.is_some());
    }

    fn get(&self, id: u16) -> Option<&MqttPacket> {
        self.packets.get(&id)
    }

    fn remove_by_id(&mut self, id: u16) -> Option<MqttPacket> {
        // Vec::retain() preserves order
        self.order.retain(|&element| element != id);
        let removed = self.packets.remove(&id);

        debug_assert_eq!(self.order.len(), self.packets.len());
        removed
    }

    fn iter_in_send_order(&self) -> impl Iterator<Item = &MqttPacket> {
        self.order.iter().flat_map(|id| self.packets.get(id))
    }

    fn drain_ids(&mut self) -> Vec<u16> {
        self.packets.clear();
        std::mem::take(&mut self.order)
    }

    fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// A QoS 2 publish received but not yet released by a PubRel.
struct ReceivedPublish {
    topic: String,
    payload: Bytes,
}

struct Qos1Callbacks {
    on_acknowledge: oneshot::Sender<()>,
}

struct Qos2Callbacks {
    on_receive: Option<oneshot::Sender<()>>,
    on_complete: Option<oneshot::Sender<()>>,
}

struct Callbacks {
    qos1: HashMap<u16, Qos1Callbacks>,
    qos2: HashMap<u16, Qos2Callbacks>,
}

impl Callbacks {
    fn new() -> Callbacks {
        Callbacks {
            qos1: HashMap::new(),
            qos2: HashMap::new(),
        }
    }
}

/// Drives the QoS 0/1/2 send and receive flows.
///
/// Send side: a QoS 1 publish sits in `awaiting_puback` until the broker
/// acknowledges it. A QoS 2 publish sits in `qos2_flow`, first as the
/// Publish itself (awaiting PubRec), then replaced by its PubRel
/// (awaiting PubComp). Receive side: QoS 2 publishes are recorded in
/// `received_unreleased` so broker retransmissions are delivered to local
/// observers exactly once.
pub(crate) struct PublishingManager {
    sender: PacketSender,
    allocator: Arc<PacketIdentifierAllocator>,
    event_sender: UnboundedSender<IncomingPublish>,
    awaiting_puback: Mutex<OutstandingPackets>,
    qos2_flow: Mutex<OutstandingPackets>,
    received_unreleased: DashMap<u16, ReceivedPublish>,
    callbacks: Mutex<Callbacks>,
}

impl PublishingManager {
    pub(crate) fn new(
        sender: PacketSender,
        allocator: Arc<PacketIdentifierAllocator>,
        event_sender: UnboundedSender<IncomingPublish>,
    ) -> Arc<PublishingManager> {
        Arc::new(PublishingManager {
            sender,
            allocator,
            event_sender,
            awaiting_puback: Mutex::new(OutstandingPackets::empty()),
            qos2_flow: Mutex::new(OutstandingPackets::empty()),
            received_unreleased: DashMap::new(),
            callbacks: Mutex::new(Callbacks::new()),
        })
    }

    pub(crate) fn register_handlers(self: &Arc<Self>, dispatcher: &Dispatcher) {
        let this = Arc::clone(self);
        dispatcher.register(
            PacketType::Publish,
            Box::new(move |_, parsed| {
                if let Packet::Publish(publish) = parsed {
                    this.handle_publish(publish);
                }
            }),
        );

        let this = Arc::clone(self);
        dispatcher.register(
            PacketType::Puback,
            Box::new(move |_, parsed| {
                if let Packet::Puback(Puback { id }) = parsed {
                    this.handle_puback(*id);
                }
            }),
        );

        let this = Arc::clone(self);
        dispatcher.register(
            PacketType::Pubrec,
            Box::new(move |_, parsed| {
                if let Packet::Pubrec(Pubrec { id }) = parsed {
                    this.handle_pubrec(*id);
                }
            }),
        );

        let this = Arc::clone(self);
        dispatcher.register(
            PacketType::Pubrel,
            Box::new(move |_, parsed| {
                if let Packet::Pubrel(Pubrel { id }) = parsed {
                    this.handle_pubrel(*id);
                }
            }),
        );

        let this = Arc::clone(self);
        dispatcher.register(
            PacketType::Pubcomp,
            Box::new(move |_, parsed| {
                if let Packet::Pubcomp(Pubcomp { id }) = parsed {
                    this.handle_pubcomp(*id);
                }
            }),
        );
    }

    pub(crate) fn publish(
        &self,
        topic: &TopicName,
        qos: QualityOfService,
        payload: &[u8],
        retain: bool,
    ) -> Result<Published, MqttError> {
        let topic_name = MqttStr::new(topic.as_str())
            .map_err(|_| MqttError::InvalidTopic(TopicError::TooLong(topic.as_str().len())))?;

        if qos == QualityOfService::AtMostOnce {
            let packet = Packet::Publish(Publish {
                dup: false,
                qos,
                retain,
                topic_name,
                id: None,
                payload,
            });
            self.sender.send(MqttPacket::from_packet(&packet)?)?;

            return Ok(Published {
                id: None,
                receiver: PublishedReceiver::None,
            });
        }

        let id = self.allocator.allocate("publish")?;

        let packet = Packet::Publish(Publish {
            dup: false,
            qos,
            retain,
            topic_name,
            id: Some(id),
            payload,
        });
        let owned = match MqttPacket::from_packet(&packet) {
            Ok(owned) => owned,
            Err(error) => {
                self.allocator.release(id);
                return Err(error);
            }
        };

        let receiver = match qos {
            QualityOfService::AtMostOnce => unreachable!(),
            QualityOfService::AtLeastOnce => {
                let (on_acknowledge, receiver) = oneshot::channel();
                self.awaiting_puback
                    .lock()
                    .expect("qos1 table lock poisoned")
                    .insert(id.get(), owned.clone());
                self.callbacks
                    .lock()
                    .expect("callback lock poisoned")
                    .qos1
                    .insert(id.get(), Qos1Callbacks { on_acknowledge });
                PublishedReceiver::Once(receiver)
            }
            QualityOfService::ExactlyOnce => {
                let (on_receive, receive_receiver) = oneshot::channel();
                let (on_complete, complete_receiver) = oneshot::channel();
                self.qos2_flow
                    .lock()
                    .expect("qos2 table lock poisoned")
                    .insert(id.get(), owned.clone());
                self.callbacks
                    .lock()
                    .expect("callback lock poisoned")
                    .qos2
                    .insert(
                        id.get(),
                        Qos2Callbacks {
                            on_receive: Some(on_receive),
                            on_complete: Some(on_complete),
                        },
                    );
                PublishedReceiver::Twice(receive_receiver, complete_receiver)
            }
        };

        if let Err(error) = self.sender.send(owned) {
            self.forget_in_flight(id);
            return Err(error);
        }

        Ok(Published {
            id: Some(id),
            receiver,
        })
    }

    /// Re-sends every in-flight publish after a reconnect, in original
    /// send order. A flow already past PubRec re-sends its PubRel.
    pub(crate) fn retransmit_in_flight(&self) -> Result<(), MqttError> {
        let qos1: Vec<MqttPacket> = {
            let table = self.awaiting_puback.lock().expect("qos1 table lock poisoned");
            table.iter_in_send_order().cloned().collect()
        };
        let qos2: Vec<MqttPacket> = {
            let table = self.qos2_flow.lock().expect("qos2 table lock poisoned");
            table.iter_in_send_order().cloned().collect()
        };

        for packet in qos1.into_iter().chain(qos2) {
            let resend = with_dup_flag(&packet)?;
            tracing::debug!(packet_type = ?resend.packet_type(), "Retransmitting in-flight packet");
            self.sender.send(resend)?;
        }

        Ok(())
    }

    /// Aborts in-flight waits. The send tables survive so a reconnect can
    /// retransmit; received-unreleased entries are dropped since a clean
    /// session will never release them.
    pub(crate) fn handle_connection_lost(&self) {
        self.received_unreleased.clear();

        let mut callbacks = self.callbacks.lock().expect("callback lock poisoned");
        callbacks.qos1.clear();
        callbacks.qos2.clear();
    }

    /// Drops every flow and frees their identifiers. Used on a
    /// caller-initiated disconnect, where nothing persists.
    pub(crate) fn reset(&self) {
        let qos1_ids = self
            .awaiting_puback
            .lock()
            .expect("qos1 table lock poisoned")
            .drain_ids();
        let qos2_ids = self
            .qos2_flow
            .lock()
            .expect("qos2 table lock poisoned")
            .drain_ids();

        for id in qos1_ids.into_iter().chain(qos2_ids) {
            if let Some(id) = PacketIdentifier::new(id) {
                self.allocator.release(id);
            }
        }

        self.handle_connection_lost();
    }

    pub(crate) fn has_in_flight_sends(&self) -> bool {
        let qos1_empty = self
            .awaiting_puback
            .lock()
            .expect("qos1 table lock poisoned")
            .is_empty();
        let qos2_empty = self.qos2_flow.lock().expect("qos2 table lock poisoned").is_empty();

        !(qos1_empty && qos2_empty)
    }

    fn forget_in_flight(&self, id: PacketIdentifier) {
        self.awaiting_puback
            .lock()
            .expect("qos1 table lock poisoned")
            .remove_by_id(id.get());
        self.qos2_flow
            .lock()
            .expect("qos2 table lock poisoned")
            .remove_by_id(id.get());

        let mut callbacks = self.callbacks.lock().expect("callback lock poisoned");
        callbacks.qos1.remove(&id.get());
        callbacks.qos2.remove(&id.get());

        self.allocator.release(id);
    }

    fn emit(&self, topic: String, payload: Bytes) {
        if self
            .event_sender
            .send(IncomingPublish { topic, payload })
            .is_err()
        {
            tracing::debug!("No consumer for received publishes");
        }
    }

    fn respond(&self, packet: Packet<'_>) {
        match MqttPacket::from_packet(&packet) {
            Ok(owned) => {
                if let Err(error) = self.sender.send(owned) {
                    tracing::debug!(?error, "Could not send acknowledgement");
                }
            }
            Err(error) => {
                tracing::error!(?error, "Could not encode acknowledgement");
            }
        }
    }

    fn handle_publish(&self, publish: &Publish<'_>) {
        let topic = publish.topic_name.as_str().to_string();
        let payload = Bytes::copy_from_slice(publish.payload);

        match publish.qos {
            QualityOfService::AtMostOnce => {
                self.emit(topic, payload);
            }
            QualityOfService::AtLeastOnce => {
                let Some(id) = publish.id else { return };

                self.emit(topic, payload);
                self.respond(Packet::Puback(Puback { id }));
            }
            QualityOfService::ExactlyOnce => {
                let Some(id) = publish.id else { return };

                match self.received_unreleased.entry(id.get()) {
                    Entry::Occupied(entry) => {
                        tracing::trace!(
                            %id,
                            topic = %entry.get().topic,
                            payload_length = entry.get().payload.len(),
                            "Duplicate publish, not dispatched again"
                        );
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(ReceivedPublish {
                            topic: topic.clone(),
                            payload: payload.clone(),
                        });
                        self.emit(topic, payload);
                    }
                }

                self.respond(Packet::Pubrec(Pubrec { id }));
            }
        }
    }

    fn handle_puback(&self, id: PacketIdentifier) {
        let removed = self
            .awaiting_puback
            .lock()
            .expect("qos1 table lock poisoned")
            .remove_by_id(id.get());

        if removed.is_none() {
            tracing::debug!(%id, "PubAck without a matching entry, ignored");
            return;
        }

        self.allocator.release(id);

        if let Some(callback) = self
            .callbacks
            .lock()
            .expect("callback lock poisoned")
            .qos1
            .remove(&id.get())
        {
            let _ = callback.on_acknowledge.send(());
        }
    }

    fn handle_pubrec(&self, id: PacketIdentifier) {
        let stored_type = {
            let flow = self.qos2_flow.lock().expect("qos2 table lock poisoned");
            flow.get(id.get()).map(MqttPacket::packet_type)
        };

        let Some(stored_type) = stored_type else {
            tracing::debug!(%id, "PubRec without a matching entry, ignored");
            return;
        };

        let pubrel = match MqttPacket::from_packet(&Packet::Pubrel(Pubrel { id })) {
            Ok(pubrel) => pubrel,
            Err(error) => {
                tracing::error!(?error, "Could not encode PubRel");
                return;
            }
        };

        if stored_type == PacketType::Publish {
            self.qos2_flow
                .lock()
                .expect("qos2 table lock poisoned")
                .update_by_id(id.get(), pubrel.clone());

            if let Some(callback) = self
                .callbacks
                .lock()
                .expect("callback lock poisoned")
                .qos2
                .get_mut(&id.get())
            {
                if let Some(on_receive) = callback.on_receive.take() {
                    let _ = on_receive.send(());
                }
            }
        }

        // A duplicate PubRec simply gets the recorded PubRel again.
        if let Err(error) = self.sender.send(pubrel) {
            tracing::debug!(?error, "Could not send PubRel");
        }
    }

    fn handle_pubrel(&self, id: PacketIdentifier) {
        if self.received_unreleased.remove(&id.get()).is_some() {
            self.respond(Packet::Pubcomp(Pubcomp { id }));
        } else {
            tracing::debug!(%id, "PubRel for an unknown identifier dropped");
        }
    }

    fn handle_pubcomp(&self, id: PacketIdentifier) {
        let released = {
            let flow = self.qos2_flow.lock().expect("qos2 table lock poisoned");
            flow.get(id.get())
                .map(|stored| stored.packet_type() == PacketType::Pubrel)
        };

        match released {
            Some(true) => {}
            Some(false) => {
                tracing::debug!(%id, "PubComp before PubRel, ignored");
                return;
            }
            None => {
                tracing::debug!(%id, "PubComp without a matching entry, ignored");
                return;
            }
        }

        self.qos2_flow
            .lock()
            .expect("qos2 table lock poisoned")
            .remove_by_id(id.get());
        self.allocator.release(id);

        if let Some(callback) = self
            .callbacks
            .lock()
            .expect("callback lock poisoned")
            .qos2
            .remove(&id.get())
        {
            if let Some(on_receive) = callback.on_receive {
                let _ = on_receive.send(());
            }
            if let Some(on_complete) = callback.on_complete {
                let _ = on_complete.send(());
            }
        }
    }
}

fn with_dup_flag(packet: &MqttPacket) -> Result<MqttPacket, MqttError> {
    let parsed = packet.get()?;

    match parsed {
        Packet::Publish(mut publish) => {
            publish.dup = true;
            MqttPacket::from_packet(&Packet::Publish(publish))
        }
        _ => Ok(packet.clone()),
    }
}

/// The result of a publish call.
///
/// QoS 0 completes immediately, QoS 1 completes on PubAck, QoS 2 after
/// the full PubRec/PubComp exchange. Waiting is optional; dropping this
/// value does not cancel the flow.
#[derive(Debug)]
pub struct Published {
    id: Option<PacketIdentifier>,
    receiver: PublishedReceiver,
}

#[derive(Debug)]
enum PublishedReceiver {
    None,
    Once(oneshot::Receiver<()>),
    Twice(oneshot::Receiver<()>, oneshot::Receiver<()>),
}

impl Published {
    pub fn packet_identifier(&self) -> Option<PacketIdentifier> {
        self.id
    }

    pub async fn acknowledged(self) -> Result<(), MqttError> {
        match self.receiver {
            PublishedReceiver::None => Ok(()),
            PublishedReceiver::Once(acknowledge) => {
                acknowledge.await.map_err(|_| MqttError::Disconnected)
            }
            PublishedReceiver::Twice(receive, complete) => {
                receive.await.map_err(|_| MqttError::Disconnected)?;
                complete.await.map_err(|_| MqttError::Disconnected)
            }
        }
    }
}
