//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use mqtt_wire::v3::header::PacketType;
use mqtt_wire::v3::identifier::PacketIdentifier;
use mqtt_wire::v3::packet::{Packet, Suback, Subscribe, Unsuback, Unsubscribe};
use mqtt_wire::v3::qos::QualityOfService;
use mqtt_wire::v3::strings::MqttStr;
use mqtt_wire::v3::subscription::SubscribeRequest;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::connection::PacketSender;
use crate::dispatcher::Dispatcher;
use crate::error::MqttError;
use crate::packet::MqttPacket;
use crate::packet_identifier::PacketIdentifierAllocator;
use crate::publishing::IncomingPublish;
use crate::topic::{TopicError, TopicFilter, TopicName};

/// The manager-level view asked for with `subscription_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    DoesNotExist,
    Pending,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Subscribe sent, SubAck not yet received.
    Pending,
    /// The broker granted the subscription.
    Active { granted_qos: QualityOfService },
    /// The broker reported 0x80 for this request.
    Failed,
    Unsubscribed,
}

/// One message delivered to a subscription's observers.
#[derive(Debug, Clone)]
pub struct SubscriptionMessage {
    pub topic: String,
    pub payload: Bytes,
}

struct SubscriptionShared {
    topic: TopicFilter,
    requested_qos: QualityOfService,
    packet_identifier: PacketIdentifier,
    created_at: Instant,
    state: Mutex<SubscriptionState>,
    message_sender: Mutex<Option<UnboundedSender<SubscriptionMessage>>>,
    messages: tokio::sync::Mutex<UnboundedReceiver<SubscriptionMessage>>,
}

/// A cheap handle onto one subscription.
///
/// All clones observe the same message channel; the manager keeps the
/// subscription itself alive. The stream ends once the subscription is
/// gone (unsubscribed, failed or the session was torn down).
#[derive(Clone)]
pub struct Subscription {
    shared: Arc<SubscriptionShared>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        self.shared.topic.as_str()
    }

    pub fn requested_qos(&self) -> QualityOfService {
        self.shared.requested_qos
    }

    pub fn granted_qos(&self) -> Option<QualityOfService> {
        match *self.shared.state.lock().expect("state lock poisoned") {
            SubscriptionState::Active { granted_qos } => Some(granted_qos),
            _ => None,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        *self.shared.state.lock().expect("state lock poisoned")
    }

    pub fn packet_identifier(&self) -> PacketIdentifier {
        self.shared.packet_identifier
    }

    pub fn created_at(&self) -> Instant {
        self.shared.created_at
    }

    /// The next received message matching this subscription, or `None`
    /// once the subscription is gone.
    pub async fn recv(&self) -> Option<SubscriptionMessage> {
        self.shared.messages.lock().await.recv().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.shared.topic.as_str())
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Default)]
struct SubscriptionTables {
    /// Exactly one entry per canonical topic.
    active: HashMap<String, Arc<SubscriptionShared>>,
    /// Keyed by the Subscribe packet's identifier.
    pending: HashMap<u16, Arc<SubscriptionShared>>,
    /// Keyed by the Unsubscribe packet's identifier, not the original
    /// subscribe identifier.
    pending_unsubscribe: HashMap<u16, String>,
}

impl SubscriptionTables {
    fn find_by_topic(&self, topic: &str) -> Option<&Arc<SubscriptionShared>> {
        self.active.get(topic).or_else(|| {
            self.pending
                .values()
                .find(|shared| shared.topic.as_str() == topic)
        })
    }
}

/// Registers subscriptions with the broker and fans received publishes
/// out to the matching observer channels.
pub(crate) struct SubscriptionsManager {
    sender: PacketSender,
    allocator: Arc<PacketIdentifierAllocator>,
    tables: Mutex<SubscriptionTables>,
}

impl SubscriptionsManager {
    pub(crate) fn new(
        sender: PacketSender,
        allocator: Arc<PacketIdentifierAllocator>,
    ) -> Arc<SubscriptionsManager> {
        Arc::new(SubscriptionsManager {
            sender,
            allocator,
            tables: Mutex::new(SubscriptionTables::default()),
        })
    }

    pub(crate) fn register_handlers(self: &Arc<Self>, dispatcher: &Dispatcher) {
        let this = Arc::clone(self);
        dispatcher.register(
            PacketType::Suback,
            Box::new(move |_, parsed| {
                if let Packet::Suback(suback) = parsed {
                    this.handle_suback(suback);
                }
            }),
        );

        let this = Arc::clone(self);
        dispatcher.register(
            PacketType::Unsuback,
            Box::new(move |_, parsed| {
                if let Packet::Unsuback(unsuback) = parsed {
                    this.handle_unsuback(unsuback);
                }
            }),
        );
    }

    /// The fan-out loop: consumes the received-publish event channel and
    /// forwards each message to every matching subscription.
    pub(crate) fn spawn_fan_out(
        manager: Arc<SubscriptionsManager>,
        mut receiver: UnboundedReceiver<IncomingPublish>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                manager.dispatch_publish(&event);
            }
        })
    }

    pub(crate) fn subscribe(
        &self,
        topic: &str,
        qos: QualityOfService,
    ) -> Result<Subscription, MqttError> {
        let filter = TopicFilter::new(topic)?;

        {
            let tables = self.tables.lock().expect("subscription tables lock poisoned");
            if let Some(existing) = tables.find_by_topic(filter.as_str()) {
                return Ok(Subscription {
                    shared: Arc::clone(existing),
                });
            }
        }

        let id = self.allocator.allocate("subscriptions")?;

        let packet = {
            let topic_str = MqttStr::new(filter.as_str())
                .map_err(|_| MqttError::InvalidTopic(TopicError::TooLong(filter.as_str().len())))?;
            Packet::Subscribe(Subscribe {
                id,
                requests: vec![SubscribeRequest {
                    topic: topic_str,
                    qos,
                }],
            })
        };
        let owned = match MqttPacket::from_packet(&packet) {
            Ok(owned) => owned,
            Err(error) => {
                self.allocator.release(id);
                return Err(error);
            }
        };

        let (message_sender, messages) = tokio::sync::mpsc::unbounded_channel();
        let shared = Arc::new(SubscriptionShared {
            topic: filter,
            requested_qos: qos,
            packet_identifier: id,
            created_at: Instant::now(),
            state: Mutex::new(SubscriptionState::Pending),
            message_sender: Mutex::new(Some(message_sender)),
            messages: tokio::sync::Mutex::new(messages),
        });

        {
            let mut tables = self.tables.lock().expect("subscription tables lock poisoned");
            // A concurrent call may have won the race for this topic.
            if let Some(existing) = tables.find_by_topic(shared.topic.as_str()) {
                let existing = Arc::clone(existing);
                drop(tables);
                self.allocator.release(id);
                return Ok(Subscription { shared: existing });
            }
            tables.pending.insert(id.get(), Arc::clone(&shared));
        }

        if let Err(error) = self.sender.send(owned) {
            self.tables
                .lock()
                .expect("subscription tables lock poisoned")
                .pending
                .remove(&id.get());
            self.allocator.release(id);
            return Err(error);
        }

        tracing::debug!(topic = %shared.topic.as_str(), %id, "Subscribe sent");
        Ok(Subscription { shared })
    }

    pub(crate) fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        let filter = TopicFilter::new(topic)?;

        let exists = {
            let tables = self.tables.lock().expect("subscription tables lock poisoned");
            tables.active.contains_key(filter.as_str())
        };
        if !exists {
            tracing::debug!(topic = %filter.as_str(), "No active subscription, nothing to do");
            return Ok(());
        }

        let id = self.allocator.allocate("subscriptions")?;

        let packet = {
            let topic_str = MqttStr::new(filter.as_str())
                .map_err(|_| MqttError::InvalidTopic(TopicError::TooLong(filter.as_str().len())))?;
            Packet::Unsubscribe(Unsubscribe {
                id,
                topics: vec![topic_str],
            })
        };
        let owned = match MqttPacket::from_packet(&packet) {
            Ok(owned) => owned,
            Err(error) => {
                self.allocator.release(id);
                return Err(error);
            }
        };

        self.tables
            .lock()
            .expect("subscription tables lock poisoned")
            .pending_unsubscribe
            .insert(id.get(), filter.as_str().to_string());

        if let Err(error) = self.sender.send(owned) {
            self.tables
                .lock()
                .expect("subscription tables lock poisoned")
                .pending_unsubscribe
                .remove(&id.get());
            self.allocator.release(id);
            return Err(error);
        }

        tracing::debug!(topic = %filter.as_str(), %id, "Unsubscribe sent");
        Ok(())
    }

    pub(crate) fn status(&self, topic: &str) -> SubscriptionStatus {
        let tables = self.tables.lock().expect("subscription tables lock poisoned");

        if tables.active.contains_key(topic) {
            SubscriptionStatus::Active
        } else if tables
            .pending
            .values()
            .any(|shared| shared.topic.as_str() == topic)
        {
            SubscriptionStatus::Pending
        } else {
            SubscriptionStatus::DoesNotExist
        }
    }

    /// Tears every subscription down; observer streams end. Also used
    /// when the session dies: the session is clean, so nothing would be
    /// delivered on a later connection anyway.
    pub(crate) fn reset(&self) {
        let (active, pending, pending_unsubscribe) = {
            let mut tables = self.tables.lock().expect("subscription tables lock poisoned");
            (
                std::mem::take(&mut tables.active),
                std::mem::take(&mut tables.pending),
                std::mem::take(&mut tables.pending_unsubscribe),
            )
        };

        for shared in active.into_values() {
            *shared.state.lock().expect("state lock poisoned") = SubscriptionState::Unsubscribed;
            shared
                .message_sender
                .lock()
                .expect("message sender lock poisoned")
                .take();
        }

        for (id, shared) in pending {
            *shared.state.lock().expect("state lock poisoned") = SubscriptionState::Unsubscribed;
            shared
                .message_sender
                .lock()
                .expect("message sender lock poisoned")
                .take();
            if let Some(id) = PacketIdentifier::new(id) {
                self.allocator.release(id);
            }
        }

        for (id, _topic) in pending_unsubscribe {
            if let Some(id) = PacketIdentifier::new(id) {
                self.allocator.release(id);
            }
        }
    }

    fn dispatch_publish(&self, event: &IncomingPublish) {
        let topic = match TopicName::new(event.topic.as_str()) {
            Ok(topic) => topic,
            Err(error) => {
                tracing::warn!(?error, topic = %event.topic, "Broker sent an invalid topic");
                return;
            }
        };

        let targets: Vec<Arc<SubscriptionShared>> = {
            let tables = self.tables.lock().expect("subscription tables lock poisoned");
            tables
                .active
                .values()
                .filter(|shared| shared.topic.matches(&topic))
                .map(Arc::clone)
                .collect()
        };

        for shared in targets {
            let sender = shared
                .message_sender
                .lock()
                .expect("message sender lock poisoned")
                .clone();

            if let Some(sender) = sender {
                let message = SubscriptionMessage {
                    topic: event.topic.clone(),
                    payload: event.payload.clone(),
                };
                if sender.send(message).is_err() {
                    tracing::trace!(topic = %shared.topic.as_str(), "Observer went away");
                }
            }
        }
    }

    fn handle_suback(&self, suback: &Suback) {
        let shared = {
            let mut tables = self.tables.lock().expect("subscription tables lock poisoned");
            tables.pending.remove(&suback.id.get())
        };

        let Some(shared) = shared else {
            tracing::debug!(id = %suback.id, "SubAck without a matching entry, ignored");
            return;
        };

        self.allocator.release(suback.id);

        match suback.codes.first().and_then(|code| code.granted_qos()) {
            Some(granted_qos) => {
                *shared.state.lock().expect("state lock poisoned") =
                    SubscriptionState::Active { granted_qos };
                tracing::debug!(
                    topic = %shared.topic.as_str(),
                    ?granted_qos,
                    "Subscription confirmed"
                );
                self.tables
                    .lock()
                    .expect("subscription tables lock poisoned")
                    .active
                    .insert(shared.topic.as_str().to_string(), shared);
            }
            None => {
                *shared.state.lock().expect("state lock poisoned") = SubscriptionState::Failed;
                shared
                    .message_sender
                    .lock()
                    .expect("message sender lock poisoned")
                    .take();
                tracing::warn!(topic = %shared.topic.as_str(), "Subscription failed");
            }
        }
    }

    fn handle_unsuback(&self, unsuback: &Unsuback) {
        let topic = {
            let mut tables = self.tables.lock().expect("subscription tables lock poisoned");
            tables.pending_unsubscribe.remove(&unsuback.id.get())
        };

        let Some(topic) = topic else {
            tracing::debug!(id = %unsuback.id, "UnsubAck without a matching entry, ignored");
            return;
        };

        self.allocator.release(unsuback.id);

        let removed = {
            let mut tables = self.tables.lock().expect("subscription tables lock poisoned");
            tables.active.remove(&topic)
        };

        if let Some(shared) = removed {
            *shared.state.lock().expect("state lock poisoned") = SubscriptionState::Unsubscribed;
            shared
                .message_sender
                .lock()
                .expect("message sender lock poisoned")
                .take();
            tracing::debug!(topic = %topic, "Unsubscribed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use mqtt_wire::v3::identifier::PacketIdentifier;
    use mqtt_wire::v3::packet::{Packet, Suback, Unsuback};
    use mqtt_wire::v3::qos::QualityOfService;
    use mqtt_wire::v3::subscription::SubscribeReturnCode;
    use pretty_assertions::assert_eq;

    use super::{SubscriptionState, SubscriptionStatus, SubscriptionsManager};
    use crate::connection::PacketSender;
    use crate::packet::MqttPacket;
    use crate::packet_identifier::PacketIdentifierAllocator;
    use crate::publishing::IncomingPublish;

    struct Harness {
        manager: Arc<SubscriptionsManager>,
        outgoing: tokio::sync::mpsc::UnboundedReceiver<MqttPacket>,
    }

    fn harness() -> Harness {
        let (sender, outgoing) = PacketSender::connected_for_tests();
        let manager =
            SubscriptionsManager::new(sender, Arc::new(PacketIdentifierAllocator::new()));

        Harness { manager, outgoing }
    }

    fn granted(id: u16, code: SubscribeReturnCode) -> Suback {
        Suback {
            id: PacketIdentifier::new(id).unwrap(),
            codes: vec![code],
        }
    }

    #[tokio::test]
    async fn check_subscribe_is_idempotent() {
        let mut harness = harness();

        let first = harness
            .manager
            .subscribe("sensors/+/temp", QualityOfService::AtMostOnce)
            .unwrap();
        let second = harness
            .manager
            .subscribe("sensors/+/temp", QualityOfService::AtMostOnce)
            .unwrap();

        assert!(Arc::ptr_eq(&first.shared, &second.shared));

        // Exactly one Subscribe went out.
        let packet = harness.outgoing.recv().await.unwrap();
        assert!(matches!(packet.get().unwrap(), Packet::Subscribe(_)));
        assert!(harness.outgoing.try_recv().is_err());
    }

    #[tokio::test]
    async fn check_confirm_moves_pending_to_active() {
        let mut harness = harness();

        let subscription = harness
            .manager
            .subscribe("a/b", QualityOfService::AtLeastOnce)
            .unwrap();
        let _subscribe = harness.outgoing.recv().await.unwrap();

        assert_eq!(harness.manager.status("a/b"), SubscriptionStatus::Pending);
        assert_eq!(subscription.state(), SubscriptionState::Pending);

        harness
            .manager
            .handle_suback(&granted(1, SubscribeReturnCode::GrantedAtLeastOnce));

        assert_eq!(harness.manager.status("a/b"), SubscriptionStatus::Active);
        assert_eq!(
            subscription.granted_qos(),
            Some(QualityOfService::AtLeastOnce)
        );
    }

    #[tokio::test]
    async fn check_failure_code_reports_failed() {
        let mut harness = harness();

        let subscription = harness
            .manager
            .subscribe("a/b", QualityOfService::AtMostOnce)
            .unwrap();
        let _subscribe = harness.outgoing.recv().await.unwrap();

        harness
            .manager
            .handle_suback(&granted(1, SubscribeReturnCode::Failure));

        assert_eq!(
            harness.manager.status("a/b"),
            SubscriptionStatus::DoesNotExist
        );
        assert_eq!(subscription.state(), SubscriptionState::Failed);
        assert!(subscription.recv().await.is_none());
    }

    #[tokio::test]
    async fn check_unmatched_suback_is_ignored() {
        let harness = harness();

        harness
            .manager
            .handle_suback(&granted(42, SubscribeReturnCode::GrantedAtMostOnce));
    }

    #[tokio::test]
    async fn check_unsubscribe_uses_fresh_identifier() {
        let mut harness = harness();

        let subscription = harness
            .manager
            .subscribe("a/b", QualityOfService::AtMostOnce)
            .unwrap();
        let _subscribe = harness.outgoing.recv().await.unwrap();
        harness
            .manager
            .handle_suback(&granted(1, SubscribeReturnCode::GrantedAtMostOnce));

        harness.manager.unsubscribe("a/b").unwrap();

        let packet = harness.outgoing.recv().await.unwrap();
        let Packet::Unsubscribe(unsubscribe) = packet.get().unwrap() else {
            panic!("expected an Unsubscribe");
        };
        // The subscribe identifier was 1 and has been released; the
        // unsubscribe gets its own.
        assert_eq!(unsubscribe.id.get(), 2);

        harness.manager.handle_unsuback(&Unsuback {
            id: PacketIdentifier::new(2).unwrap(),
        });

        assert_eq!(
            harness.manager.status("a/b"),
            SubscriptionStatus::DoesNotExist
        );
        assert_eq!(subscription.state(), SubscriptionState::Unsubscribed);
        assert!(subscription.recv().await.is_none());
    }

    #[tokio::test]
    async fn check_fan_out_matches_wildcards() {
        let mut harness = harness();

        let matching = harness
            .manager
            .subscribe("sensors/+/temp", QualityOfService::AtMostOnce)
            .unwrap();
        let _subscribe = harness.outgoing.recv().await.unwrap();
        harness
            .manager
            .handle_suback(&granted(1, SubscribeReturnCode::GrantedAtMostOnce));

        let other = harness
            .manager
            .subscribe("other/topic", QualityOfService::AtMostOnce)
            .unwrap();
        let _subscribe = harness.outgoing.recv().await.unwrap();
        harness
            .manager
            .handle_suback(&granted(2, SubscribeReturnCode::GrantedAtMostOnce));

        harness.manager.dispatch_publish(&IncomingPublish {
            topic: "sensors/A/temp".to_string(),
            payload: Bytes::from_static(&[0x25]),
        });

        let message = matching.recv().await.unwrap();
        assert_eq!(message.topic, "sensors/A/temp");
        assert_eq!(&message.payload[..], &[0x25]);

        harness.manager.reset();
        assert!(other.recv().await.is_none());
    }
}
