//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use std::time::Duration;

use mqtt_wire::v3::connect_return::ConnectReturnCode;
use mqtt_wire::v3::identifier::PacketIdentifier;
use mqtt_wire::v3::packet::{Connack, Packet, Puback, Publish, Pubrel, Suback};
use mqtt_wire::v3::qos::QualityOfService as WireQos;
use mqtt_wire::v3::strings::MqttStr;
use mqtt_wire::v3::subscription::SubscribeReturnCode;
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use nimbusmqtt::{
    ConnectionState, KeepAlive, MqttClient, MqttClientOptions, MqttConnectTransport, MqttError,
    QualityOfService,
};

/// The broker half of an in-memory connection, driven by each test.
struct ScriptedBroker {
    stream: tokio::io::DuplexStream,
    buffer: Vec<u8>,
}

impl ScriptedBroker {
    fn connect_pair() -> (ScriptedBroker, MqttConnectTransport) {
        let (client_end, broker_end) = tokio::io::duplex(4096);

        (
            ScriptedBroker {
                stream: broker_end,
                buffer: Vec::new(),
            },
            MqttConnectTransport::Duplex(client_end),
        )
    }

    /// Reads one whole packet and returns its raw bytes.
    async fn read_packet(&mut self) -> Vec<u8> {
        loop {
            let consumed = match mqtt_wire::v3::packet::packet(&self.buffer) {
                Ok((rest, _)) => Some(self.buffer.len() - rest.len()),
                Err(nom::Err::Incomplete(_)) => None,
                Err(error) => panic!("broker received malformed bytes: {error:?}"),
            };

            if let Some(consumed) = consumed {
                let bytes = self.buffer[..consumed].to_vec();
                self.buffer.drain(..consumed);
                return bytes;
            }

            let mut chunk = [0u8; 1024];
            let n = self
                .stream
                .read(&mut chunk)
                .await
                .expect("broker read failed");
            assert!(n > 0, "client closed the transport unexpectedly");
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Like `read_packet`, but returns the number of bytes read when the
    /// client closes the transport instead of panicking.
    async fn read_until_close(&mut self) -> usize {
        let mut chunk = [0u8; 1024];
        let mut total = 0;
        loop {
            let n = self
                .stream
                .read(&mut chunk)
                .await
                .expect("broker read failed");
            if n == 0 {
                return total;
            }
            total += n;
        }
    }

    async fn send(&mut self, packet: &Packet<'_>) {
        let mut bytes = Vec::new();
        packet.write(&mut bytes).expect("broker packet encodes");
        self.stream
            .write_all(&bytes)
            .await
            .expect("broker write failed");
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream
            .write_all(bytes)
            .await
            .expect("broker write failed");
    }

    /// Expects the Connect packet and accepts the session.
    async fn accept_connect(&mut self) -> Vec<u8> {
        let connect = self.read_packet().await;
        assert_eq!(connect[0], 0x10, "expected a Connect packet");

        self.send(&Packet::Connack(Connack {
            session_present: false,
            return_code: ConnectReturnCode::Accepted,
        }))
        .await;

        connect
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn parse(bytes: &[u8]) -> Packet<'_> {
    let (rest, packet) = mqtt_wire::v3::packet::packet(bytes).expect("valid packet");
    assert!(rest.is_empty());
    packet
}

fn client_options() -> MqttClientOptions {
    MqttClientOptions::builder()
        .server("broker.invalid")
        .client_identifier("c1")
        .keep_alive(KeepAlive::from_secs(0))
        .build()
}

#[tokio::test]
async fn check_connect_handshake_bytes() {
    let (mut broker, transport) = ScriptedBroker::connect_pair();
    let client = MqttClient::new(
        MqttClientOptions::builder()
            .server("broker.invalid")
            .client_identifier("c1")
            .keep_alive(KeepAlive::from_secs(30))
            .build(),
    )
    .unwrap();

    let broker_task = tokio::spawn(async move {
        let connect = broker.accept_connect().await;
        (broker, connect)
    });

    client.connect_over(transport, None).await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Connected);

    let (_broker, connect) = broker_task.await.unwrap();
    assert_eq!(
        connect,
        vec![
            0x10, 0x0E, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x1E, 0x00, 0x02,
            b'c', b'1',
        ]
    );
}

#[tokio::test]
async fn check_refused_connect_surfaces_the_code() {
    let (mut broker, transport) = ScriptedBroker::connect_pair();
    let client = MqttClient::new(client_options()).unwrap();

    let broker_task = tokio::spawn(async move {
        let _connect = broker.read_packet().await;
        broker
            .send(&Packet::Connack(Connack {
                session_present: false,
                return_code: ConnectReturnCode::BadCredentials,
            }))
            .await;
        broker
    });

    let error = client.connect_over(transport, None).await.unwrap_err();
    assert!(matches!(
        error,
        MqttError::ConnectionRefused(ConnectReturnCode::BadCredentials)
    ));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    drop(broker_task.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn check_missing_connack_times_out() {
    let (broker, transport) = ScriptedBroker::connect_pair();
    let client = MqttClient::new(client_options()).unwrap();

    // Hold the broker end open without ever answering.
    let broker_task = tokio::spawn(async move {
        std::future::pending::<()>().await;
        drop(broker);
    });

    let error = client.connect_over(transport, None).await.unwrap_err();
    assert!(matches!(error, MqttError::ConnectTimeout));

    broker_task.abort();
}

#[tokio::test]
async fn check_qos1_publish_flow() {
    let (mut broker, transport) = ScriptedBroker::connect_pair();
    let client = MqttClient::new(client_options()).unwrap();

    let broker_task = tokio::spawn(async move {
        broker.accept_connect().await;

        let publish = broker.read_packet().await;
        assert_eq!(
            publish,
            vec![0x32, 0x09, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x01, b'h', b'i']
        );

        broker
            .send(&Packet::Puback(Puback {
                id: PacketIdentifier::new(1).unwrap(),
            }))
            .await;
        broker
    });

    client.connect_over(transport, None).await.unwrap();

    let published = client
        .publish_message("a/b", QualityOfService::AtLeastOnce, b"hi", false)
        .unwrap();
    assert_eq!(published.packet_identifier().unwrap().get(), 1);

    tokio::time::timeout(Duration::from_secs(5), published.acknowledged())
        .await
        .expect("PubAck should complete the flow")
        .unwrap();

    drop(broker_task.await.unwrap());
}

#[tokio::test]
async fn check_subscribe_and_fan_out() {
    let (mut broker, transport) = ScriptedBroker::connect_pair();
    let client = MqttClient::new(client_options()).unwrap();

    let broker_task = tokio::spawn(async move {
        broker.accept_connect().await;

        let subscribe = broker.read_packet().await;
        {
            let Packet::Subscribe(subscribe) = parse(&subscribe) else {
                panic!("expected a Subscribe packet");
            };
            assert_eq!(subscribe.id.get(), 1);
            assert_eq!(subscribe.requests.len(), 1);
            assert_eq!(subscribe.requests[0].topic.as_str(), "sensors/+/temp");
        }

        broker
            .send(&Packet::Suback(Suback {
                id: PacketIdentifier::new(1).unwrap(),
                codes: vec![SubscribeReturnCode::GrantedAtMostOnce],
            }))
            .await;

        broker
            .send(&Packet::Publish(Publish {
                dup: false,
                qos: WireQos::AtMostOnce,
                retain: false,
                topic_name: MqttStr::new("sensors/A/temp").unwrap(),
                id: None,
                payload: &[0x25],
            }))
            .await;
        broker
    });

    client.connect_over(transport, None).await.unwrap();

    let subscription = client
        .subscribe("sensors/+/temp", QualityOfService::AtMostOnce)
        .unwrap();

    let message = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("fan-out should deliver")
        .expect("subscription is alive");

    assert_eq!(message.topic, "sensors/A/temp");
    assert_eq!(&message.payload[..], &[0x25]);
    assert_eq!(
        client.subscription_status("sensors/+/temp"),
        nimbusmqtt::SubscriptionStatus::Active
    );

    drop(broker_task.await.unwrap());
}

#[tokio::test]
async fn check_qos2_duplicate_is_delivered_once() {
    init_tracing();

    let (mut broker, transport) = ScriptedBroker::connect_pair();
    let client = MqttClient::new(client_options()).unwrap();

    let broker_task = tokio::spawn(async move {
        broker.accept_connect().await;

        let _subscribe = broker.read_packet().await;
        broker
            .send(&Packet::Suback(Suback {
                id: PacketIdentifier::new(1).unwrap(),
                codes: vec![SubscribeReturnCode::GrantedExactlyOnce],
            }))
            .await;

        let publish = Packet::Publish(Publish {
            dup: false,
            qos: WireQos::ExactlyOnce,
            retain: false,
            topic_name: MqttStr::new("a/b").unwrap(),
            id: PacketIdentifier::new(7),
            payload: b"p",
        });
        broker.send(&publish).await;

        let pubrec = broker.read_packet().await;
        assert_eq!(pubrec, vec![0x50, 0x02, 0x00, 0x07]);

        // Retransmission before the release.
        broker
            .send(&Packet::Publish(Publish {
                dup: true,
                qos: WireQos::ExactlyOnce,
                retain: false,
                topic_name: MqttStr::new("a/b").unwrap(),
                id: PacketIdentifier::new(7),
                payload: b"p",
            }))
            .await;

        let pubrec_again = broker.read_packet().await;
        assert_eq!(pubrec_again, vec![0x50, 0x02, 0x00, 0x07]);

        broker
            .send(&Packet::Pubrel(Pubrel {
                id: PacketIdentifier::new(7).unwrap(),
            }))
            .await;

        let pubcomp = broker.read_packet().await;
        assert_eq!(pubcomp, vec![0x70, 0x02, 0x00, 0x07]);
        broker
    });

    client.connect_over(transport, None).await.unwrap();

    let subscription = client.subscribe("a/b", QualityOfService::ExactlyOnce).unwrap();

    let message = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("first publish should be delivered")
        .expect("subscription is alive");
    assert_eq!(&message.payload[..], b"p");

    // The duplicate must not reach the observer.
    let second = tokio::time::timeout(Duration::from_millis(200), subscription.recv()).await;
    assert!(second.is_err(), "duplicate publish reached the observer");

    drop(broker_task.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn check_keep_alive_pings_and_gives_up() {
    init_tracing();

    let (mut broker, transport) = ScriptedBroker::connect_pair();

    let (disconnect_sender, mut disconnected) = tokio::sync::mpsc::unbounded_channel();
    let client = MqttClient::new(
        MqttClientOptions::builder()
            .server("broker.invalid")
            .client_identifier("c1")
            .keep_alive(KeepAlive::from_secs(1))
            .on_disconnected(Box::new(move |reason| {
                let _ = disconnect_sender.send(format!("{reason:?}"));
            }))
            .build(),
    )
    .unwrap();

    let broker_task = tokio::spawn(async move {
        broker.accept_connect().await;

        // First idle period: answer the ping.
        let ping = broker.read_packet().await;
        assert_eq!(ping, vec![0xC0, 0x00]);
        broker.send(&Packet::Pingresp).await;

        // Then go silent; the client keeps trying before giving up.
        let ping = broker.read_packet().await;
        assert_eq!(ping, vec![0xC0, 0x00]);
        let ping = broker.read_packet().await;
        assert_eq!(ping, vec![0xC0, 0x00]);

        // The client tears the connection down.
        let trailing = broker.read_until_close().await;
        assert_eq!(trailing, 0);
        broker
    });

    client.connect_over(transport, None).await.unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(60), disconnected.recv())
        .await
        .expect("keep-alive should give up")
        .expect("callback sender is alive");
    assert!(reason.contains("KeepAliveTimeout"), "reason was {reason}");
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    drop(broker_task.await.unwrap());
}

#[tokio::test]
async fn check_remaining_length_overflow_disconnects_with_payload_size() {
    init_tracing();

    let (mut broker, transport) = ScriptedBroker::connect_pair();

    let (disconnect_sender, mut disconnected) = tokio::sync::mpsc::unbounded_channel();
    let client = MqttClient::new(
        MqttClientOptions::builder()
            .server("broker.invalid")
            .client_identifier("c1")
            .keep_alive(KeepAlive::from_secs(0))
            .on_disconnected(Box::new(move |reason| {
                let _ = disconnect_sender.send(format!("{reason:?}"));
            }))
            .build(),
    )
    .unwrap();

    let broker_task = tokio::spawn(async move {
        broker.accept_connect().await;

        // A publish header whose remaining length never terminates
        // within the four bytes the protocol allows.
        broker.send_raw(&[0x30, 0x80, 0x80, 0x80, 0x80]).await;

        // The decode failure is fatal; the client closes the transport.
        let trailing = broker.read_until_close().await;
        assert_eq!(trailing, 0);
        broker
    });

    client.connect_over(transport, None).await.unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(5), disconnected.recv())
        .await
        .expect("the oversized remaining length should tear the session down")
        .expect("callback sender is alive");
    assert!(
        reason.contains("InvalidPayloadSize"),
        "reason was {reason}"
    );
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    drop(broker_task.await.unwrap());
}

#[tokio::test]
async fn check_invalid_topic_is_rejected_synchronously() {
    let (mut broker, transport) = ScriptedBroker::connect_pair();
    let client = MqttClient::new(client_options()).unwrap();

    let broker_task = tokio::spawn(async move {
        broker.accept_connect().await;
        broker
    });

    client.connect_over(transport, None).await.unwrap();

    let error = client
        .publish_message("a/#", QualityOfService::AtMostOnce, b"x", false)
        .unwrap_err();
    assert!(matches!(error, MqttError::InvalidTopic(_)));

    // The session survives the rejected call.
    assert_eq!(client.connection_state(), ConnectionState::Connected);

    drop(broker_task.await.unwrap());
}

#[tokio::test]
async fn check_operations_require_a_connection() {
    let client = MqttClient::new(client_options()).unwrap();

    let error = client
        .publish_message("a/b", QualityOfService::AtMostOnce, b"x", false)
        .unwrap_err();
    assert!(matches!(error, MqttError::NoConnection));

    let error = client
        .subscribe("a/b", QualityOfService::AtMostOnce)
        .unwrap_err();
    assert!(matches!(error, MqttError::NoConnection));
}

#[tokio::test]
async fn check_in_flight_publish_is_retransmitted_with_dup() {
    let (mut broker, transport) = ScriptedBroker::connect_pair();

    let (disconnect_sender, mut disconnected) = tokio::sync::mpsc::unbounded_channel();
    let client = MqttClient::new(
        MqttClientOptions::builder()
            .server("broker.invalid")
            .client_identifier("c1")
            .keep_alive(KeepAlive::from_secs(0))
            .on_disconnected(Box::new(move |_| {
                let _ = disconnect_sender.send(());
            }))
            .build(),
    )
    .unwrap();

    let broker_task = tokio::spawn(async move {
        broker.accept_connect().await;
        let publish = broker.read_packet().await;
        assert_eq!(publish[0], 0x32);
        // Die without acknowledging.
        drop(broker);
    });

    client.connect_over(transport, None).await.unwrap();

    let published = client
        .publish_message("a/b", QualityOfService::AtLeastOnce, b"hi", false)
        .unwrap();

    broker_task.await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), disconnected.recv())
        .await
        .expect("transport loss should be noticed")
        .expect("callback sender is alive");

    // The aborted wait reports the lost session.
    let error = tokio::time::timeout(Duration::from_secs(5), published.acknowledged())
        .await
        .expect("wait should be aborted")
        .unwrap_err();
    assert!(matches!(error, MqttError::Disconnected));

    // Reconnect: the flow continues with DUP set.
    let (mut broker, transport) = ScriptedBroker::connect_pair();
    let broker_task = tokio::spawn(async move {
        broker.accept_connect().await;

        let resent = broker.read_packet().await;
        assert_eq!(
            resent,
            vec![0x3A, 0x09, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x01, b'h', b'i']
        );

        broker
            .send(&Packet::Puback(Puback {
                id: PacketIdentifier::new(1).unwrap(),
            }))
            .await;
        broker
    });

    client.connect_over(transport, None).await.unwrap();
    drop(broker_task.await.unwrap());
}

#[tokio::test]
async fn check_disconnect_sends_the_packet_and_resets() {
    let (mut broker, transport) = ScriptedBroker::connect_pair();
    let client = MqttClient::new(client_options()).unwrap();

    let broker_task = tokio::spawn(async move {
        broker.accept_connect().await;
        let disconnect = broker.read_packet().await;
        assert_eq!(disconnect, vec![0xE0, 0x00]);
        broker
    });

    client.connect_over(transport, None).await.unwrap();
    client.disconnect().await.unwrap();

    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    drop(broker_task.await.unwrap());
}
