//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

//! An MQTT 3.1 / 3.1.1 client protocol engine.
//!
//! The client speaks the protocol over any ordered byte stream: plain
//! TCP, TLS, a WebSocket carrying binary frames, or an in-memory duplex
//! pipe for tests. Publishing drives the three QoS flows with in-flight
//! tables and retransmission, subscriptions fan received messages out to
//! per-subscription observer channels, and a keep-alive heartbeat
//! detects a dead broker.
//!
//! ```no_run
//! # async fn example() -> Result<(), nimbusmqtt::MqttError> {
//! use nimbusmqtt::{MqttClient, MqttClientOptions, QualityOfService};
//!
//! let client = MqttClient::new(
//!     MqttClientOptions::builder()
//!         .server("broker.example")
//!         .client_identifier("nimbus-1")
//!         .build(),
//! )?;
//!
//! client.connect(None).await?;
//!
//! let subscription = client.subscribe("sensors/+/temp", QualityOfService::AtMostOnce)?;
//! client
//!     .publish_message("sensors/a/temp", QualityOfService::AtLeastOnce, b"21.5", false)?
//!     .acknowledged()
//!     .await?;
//!
//! if let Some(message) = subscription.recv().await {
//!     println!("{}: {} bytes", message.topic, message.payload.len());
//! }
//!
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

mod client_identifier;
mod codec;
mod connection;
mod dispatcher;
mod error;
mod keep_alive;
mod packet;
mod packet_identifier;
mod payload;
mod publishing;
mod string;
mod subscriptions;
mod topic;
mod transport;

use std::sync::Arc;

use mqtt_wire::v3::packet::{Connect, Packet};
use mqtt_wire::v3::strings::MqttStr;
use mqtt_wire::v3::will::LastWill;
use tokio::task::JoinHandle;

pub use mqtt_wire::v3::connect_return::ConnectReturnCode;
pub use mqtt_wire::v3::identifier::PacketIdentifier;
pub use mqtt_wire::v3::qos::QualityOfService;
pub use mqtt_wire::v3::version::ProtocolVersion;

pub use crate::client_identifier::{ClientIdentifier, ClientIdentifierError};
pub use crate::connection::{ConnectionState, DisconnectReason, OnDisconnected};
pub use crate::error::MqttError;
pub use crate::keep_alive::{KeepAlive, KeepAliveError};
pub use crate::packet::MqttPacket;
pub use crate::payload::{MqttBytes, MqttBytesError};
pub use crate::publishing::Published;
pub use crate::string::{MqttString, MqttStringError};
pub use crate::subscriptions::{
    Subscription, SubscriptionMessage, SubscriptionState, SubscriptionStatus,
};
pub use crate::topic::{TopicError, TopicFilter, TopicName};
pub use crate::transport::{MqttConnectTransport, TlsConfig, WebSocketByteStream};

use crate::connection::ConnectionHandler;
use crate::dispatcher::Dispatcher;
use crate::packet_identifier::PacketIdentifierAllocator;
use crate::publishing::PublishingManager;
use crate::subscriptions::SubscriptionsManager;

/// Brokers are only guaranteed to take 12 bytes of username/password;
/// longer values produce a warning and are sent anyway.
const RECOMMENDED_CREDENTIAL_LENGTH: usize = 12;

pub struct Credentials {
    pub username: MqttString,
    pub password: Option<MqttBytes>,
}

/// The will the broker publishes should this session die abnormally.
#[derive(typed_builder::TypedBuilder)]
pub struct MqttWill {
    topic: TopicName,
    payload: MqttBytes,
    #[builder(default = QualityOfService::AtMostOnce)]
    qos: QualityOfService,
    #[builder(default = false)]
    retain: bool,
}

/// Overrides for the Connect packet the client sends by default
/// (clean session, configured client identifier, configured keep-alive).
#[derive(typed_builder::TypedBuilder)]
pub struct ConnectMessage {
    #[builder(default = true)]
    clean_session: bool,
    #[builder(default, setter(strip_option))]
    will: Option<MqttWill>,
    #[builder(default, setter(strip_option))]
    keep_alive: Option<KeepAlive>,
}

#[derive(typed_builder::TypedBuilder)]
pub struct MqttClientOptions {
    #[builder(setter(into))]
    server: String,
    #[builder(default = 1883)]
    port: u16,
    #[builder(setter(into))]
    client_identifier: String,
    #[builder(default = ProtocolVersion::V3_1_1)]
    protocol_version: ProtocolVersion,
    #[builder(default = false)]
    use_websocket: bool,
    #[builder(default = false)]
    secure: bool,
    #[builder(default, setter(strip_option))]
    tls: Option<TlsConfig>,
    #[builder(default)]
    keep_alive: KeepAlive,
    #[builder(default, setter(strip_option))]
    connect_message: Option<ConnectMessage>,
    #[builder(default, setter(strip_option))]
    on_disconnected: Option<OnDisconnected>,
}

/// The client object.
///
/// Must be created inside a Tokio runtime; the fan-out loop and, after
/// `connect`, the receive/write/heartbeat tasks run on it.
pub struct MqttClient {
    options: MqttClientOptions,
    client_identifier: ClientIdentifier,
    connection: Arc<ConnectionHandler>,
    publishing: Arc<PublishingManager>,
    subscriptions: Arc<SubscriptionsManager>,
    fan_out: JoinHandle<()>,
}

fn wire_str(value: &str) -> Result<MqttStr<'_>, MqttError> {
    MqttStr::new(value).map_err(|_| MqttError::InvalidMessage)
}

impl MqttClient {
    /// Validates the configuration and wires up the managers. Every
    /// handler the acknowledgement flows need is registered here, before
    /// any Connect can go out.
    pub fn new(mut options: MqttClientOptions) -> Result<MqttClient, MqttError> {
        let client_identifier = ClientIdentifier::new(
            options.client_identifier.clone(),
            options.protocol_version,
        )?;

        let dispatcher = Arc::new(Dispatcher::new());
        let connection = ConnectionHandler::new(Arc::clone(&dispatcher));

        if let Some(callback) = options.on_disconnected.take() {
            connection.set_on_disconnected(callback);
        }

        let allocator = Arc::new(PacketIdentifierAllocator::new());

        let (event_sender, event_receiver) = tokio::sync::mpsc::unbounded_channel();
        let publishing = PublishingManager::new(
            connection.packet_sender(),
            Arc::clone(&allocator),
            event_sender,
        );
        publishing.register_handlers(&dispatcher);

        let subscriptions =
            SubscriptionsManager::new(connection.packet_sender(), Arc::clone(&allocator));
        subscriptions.register_handlers(&dispatcher);

        let fan_out =
            SubscriptionsManager::spawn_fan_out(Arc::clone(&subscriptions), event_receiver);

        {
            let publishing = Arc::clone(&publishing);
            connection.register_close_observer(Box::new(move || {
                publishing.handle_connection_lost();
            }));
        }
        {
            let subscriptions = Arc::clone(&subscriptions);
            connection.register_close_observer(Box::new(move || {
                subscriptions.reset();
            }));
        }

        Ok(MqttClient {
            options,
            client_identifier,
            connection,
            publishing,
            subscriptions,
            fan_out,
        })
    }

    /// Opens the configured transport and runs the connect handshake.
    pub async fn connect(&self, credentials: Option<Credentials>) -> Result<(), MqttError> {
        let transport = self.open_transport().await?;
        self.connect_over(transport, credentials).await
    }

    async fn open_transport(&self) -> Result<MqttConnectTransport, MqttError> {
        let host = self.options.server.as_str();
        let port = self.options.port;

        match (self.options.use_websocket, self.options.secure) {
            (false, false) => MqttConnectTransport::connect_tcp(host, port).await,
            (false, true) => {
                let tls = self.options.tls.as_ref().ok_or(MqttError::MissingTlsConfig)?;
                MqttConnectTransport::connect_tls(host, port, tls).await
            }
            (true, false) => MqttConnectTransport::connect_websocket(host, port).await,
            (true, true) => {
                let tls = self.options.tls.as_ref().ok_or(MqttError::MissingTlsConfig)?;
                MqttConnectTransport::connect_secure_websocket(host, port, tls).await
            }
        }
    }

    /// Runs the connect handshake over a transport the caller opened,
    /// such as an in-memory duplex pipe.
    pub async fn connect_over(
        &self,
        transport: MqttConnectTransport,
        credentials: Option<Credentials>,
    ) -> Result<(), MqttError> {
        if let Some(credentials) = &credentials {
            if credentials.username.as_ref().len() > RECOMMENDED_CREDENTIAL_LENGTH {
                tracing::warn!(
                    length = credentials.username.as_ref().len(),
                    "Username is longer than the recommended {RECOMMENDED_CREDENTIAL_LENGTH} bytes"
                );
            }
            if let Some(password) = &credentials.password {
                if password.as_ref().len() > RECOMMENDED_CREDENTIAL_LENGTH {
                    tracing::warn!(
                        length = password.as_ref().len(),
                        "Password is longer than the recommended {RECOMMENDED_CREDENTIAL_LENGTH} bytes"
                    );
                }
            }
        }

        let version = self.options.protocol_version;
        let message = self.options.connect_message.as_ref();
        let keep_alive = message
            .and_then(|message| message.keep_alive)
            .unwrap_or(self.options.keep_alive);

        let connect_packet = {
            let will = match message.and_then(|message| message.will.as_ref()) {
                Some(will) => Some(LastWill {
                    topic: wire_str(will.topic.as_str())?,
                    payload: will.payload.as_ref(),
                    qos: will.qos,
                    retain: will.retain,
                }),
                None => None,
            };

            let packet = Packet::Connect(Connect {
                protocol_name: wire_str(version.protocol_name())?,
                protocol_level: version.protocol_level(),
                clean_session: message.map(|m| m.clean_session).unwrap_or(true),
                will,
                username: match &credentials {
                    Some(credentials) => Some(wire_str(credentials.username.as_ref())?),
                    None => None,
                },
                password: credentials
                    .as_ref()
                    .and_then(|credentials| credentials.password.as_ref())
                    .map(AsRef::as_ref),
                keep_alive: keep_alive.as_u16(),
                client_id: wire_str(self.client_identifier.as_str())?,
            });

            MqttPacket::from_packet(&packet)?
        };

        self.connection
            .connect(transport, connect_packet, keep_alive)
            .await?;

        // In-flight flows from a lost session continue with DUP set.
        if self.publishing.has_in_flight_sends() {
            self.publishing.retransmit_in_flight()?;
        }

        Ok(())
    }

    /// Publishes `payload` on `topic`.
    ///
    /// QoS 0 is fire-and-forget. For QoS 1 and 2, the returned
    /// [`Published`] carries the allocated message identifier and can be
    /// awaited until the flow completes. Wildcard topics are rejected
    /// without touching the connection.
    pub fn publish_message(
        &self,
        topic: &str,
        qos: QualityOfService,
        payload: impl AsRef<[u8]>,
        retain: bool,
    ) -> Result<Published, MqttError> {
        let topic = TopicName::new(topic)?;
        self.publishing.publish(&topic, qos, payload.as_ref(), retain)
    }

    /// Registers a subscription and sends Subscribe.
    ///
    /// Subscribing to a topic that is already pending or active returns
    /// the existing subscription without another packet on the wire.
    pub fn subscribe(
        &self,
        topic_filter: &str,
        qos: QualityOfService,
    ) -> Result<Subscription, MqttError> {
        if self.connection.state() != ConnectionState::Connected {
            return Err(MqttError::NoConnection);
        }
        self.subscriptions.subscribe(topic_filter, qos)
    }

    pub fn unsubscribe(&self, topic_filter: &str) -> Result<(), MqttError> {
        if self.connection.state() != ConnectionState::Connected {
            return Err(MqttError::NoConnection);
        }
        self.subscriptions.unsubscribe(topic_filter)
    }

    pub fn subscription_status(&self, topic_filter: &str) -> SubscriptionStatus {
        self.subscriptions.status(topic_filter)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Sends Disconnect best-effort, closes the transport and drops all
    /// session state: in-flight flows are aborted and every subscription
    /// stream ends.
    pub async fn disconnect(&self) -> Result<(), MqttError> {
        self.connection.disconnect().await?;
        self.publishing.reset();
        self.subscriptions.reset();
        Ok(())
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        self.fan_out.abort();
    }
}
