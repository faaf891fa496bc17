//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use mqtt_wire::v3::connect_return::ConnectReturnCode;
use mqtt_wire::v3::header::PacketType;
use mqtt_wire::v3::packet::{Connack, Packet};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::MqttPacketCodec;
use crate::dispatcher::Dispatcher;
use crate::error::MqttError;
use crate::keep_alive::KeepAlive;
use crate::packet::MqttPacket;
use crate::transport::{MqttConnectTransport, MqttConnection};

const CONNACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Faulted,
}

/// Why the session ended without the caller asking for it.
#[derive(Debug)]
pub enum DisconnectReason {
    /// The peer closed the transport underneath us.
    TransportClosed,
    /// Received bytes could not be processed; the error is preserved.
    Protocol(MqttError),
    /// Two consecutive ping requests went unanswered.
    KeepAliveTimeout,
}

pub type OnDisconnected = Box<dyn Fn(&DisconnectReason) + Send + Sync>;
type CloseObserver = Box<dyn Fn() + Send + Sync>;

/// The single entry point for writing packets.
///
/// Outside of **connected**, only the packets that drive a state change
/// are let through: Connect while connecting, Disconnect while
/// disconnecting.
#[derive(Clone)]
pub(crate) struct PacketSender {
    state: Arc<Mutex<ConnectionState>>,
    outgoing: Arc<Mutex<Option<UnboundedSender<MqttPacket>>>>,
}

impl PacketSender {
    /// A sender wired to a plain channel, for exercising the managers
    /// without a transport.
    #[cfg(test)]
    pub(crate) fn connected_for_tests() -> (
        PacketSender,
        tokio::sync::mpsc::UnboundedReceiver<MqttPacket>,
    ) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (
            PacketSender {
                state: Arc::new(Mutex::new(ConnectionState::Connected)),
                outgoing: Arc::new(Mutex::new(Some(sender))),
            },
            receiver,
        )
    }

    pub(crate) fn send(&self, packet: MqttPacket) -> Result<(), MqttError> {
        let state = *self.state.lock().expect("state lock poisoned");

        let allowed = match state {
            ConnectionState::Connected => true,
            ConnectionState::Connecting => packet.packet_type() == PacketType::Connect,
            ConnectionState::Disconnecting => packet.packet_type() == PacketType::Disconnect,
            ConnectionState::Disconnected | ConnectionState::Faulted => false,
        };
        if !allowed {
            return Err(MqttError::NoConnection);
        }

        self.outgoing
            .lock()
            .expect("outgoing lock poisoned")
            .as_ref()
            .ok_or(MqttError::NoConnection)?
            .send(packet)
            .map_err(|_| MqttError::NoConnection)
    }
}

#[derive(Default)]
struct ConnectionTasks {
    read: Option<JoinHandle<()>>,
    write: Option<JoinHandle<()>>,
    keep_alive: Option<JoinHandle<()>>,
}

/// Drives the connect handshake and owns the receive loop.
pub(crate) struct ConnectionHandler {
    dispatcher: Arc<Dispatcher>,
    state: Arc<Mutex<ConnectionState>>,
    outgoing: Arc<Mutex<Option<UnboundedSender<MqttPacket>>>>,
    pending_connack: Arc<Mutex<Option<oneshot::Sender<Connack>>>>,
    on_disconnected: Mutex<Option<OnDisconnected>>,
    close_observers: Mutex<Vec<CloseObserver>>,
    tasks: Mutex<ConnectionTasks>,
    start: tokio::time::Instant,
    last_sent: Arc<AtomicU64>,
    ping_outstanding: Arc<AtomicU32>,
}

impl ConnectionHandler {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>) -> Arc<ConnectionHandler> {
        let pending_connack: Arc<Mutex<Option<oneshot::Sender<Connack>>>> =
            Arc::new(Mutex::new(None));
        let ping_outstanding = Arc::new(AtomicU32::new(0));

        {
            let pending_connack = Arc::clone(&pending_connack);
            dispatcher.register(
                PacketType::Connack,
                Box::new(move |_, parsed| {
                    if let Packet::Connack(connack) = parsed {
                        match pending_connack
                            .lock()
                            .expect("pending connack lock poisoned")
                            .take()
                        {
                            Some(waiting) => {
                                let _ = waiting.send(*connack);
                            }
                            None => {
                                tracing::debug!("Unsolicited ConnAck dropped");
                            }
                        }
                    }
                }),
            );
        }

        {
            let ping_outstanding = Arc::clone(&ping_outstanding);
            dispatcher.register(
                PacketType::Pingresp,
                Box::new(move |_, _| {
                    tracing::trace!("Ping response received");
                    ping_outstanding.store(0, Ordering::Relaxed);
                }),
            );
        }

        Arc::new(ConnectionHandler {
            dispatcher,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            outgoing: Arc::new(Mutex::new(None)),
            pending_connack,
            on_disconnected: Mutex::new(None),
            close_observers: Mutex::new(Vec::new()),
            tasks: Mutex::new(ConnectionTasks::default()),
            start: tokio::time::Instant::now(),
            last_sent: Arc::new(AtomicU64::new(0)),
            ping_outstanding,
        })
    }

    pub(crate) fn packet_sender(&self) -> PacketSender {
        PacketSender {
            state: Arc::clone(&self.state),
            outgoing: Arc::clone(&self.outgoing),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub(crate) fn set_on_disconnected(&self, callback: OnDisconnected) {
        *self
            .on_disconnected
            .lock()
            .expect("callback lock poisoned") = Some(callback);
    }

    /// Close observers run before the user callback whenever the session
    /// ends without the caller asking; managers use them to abort
    /// in-flight waits.
    pub(crate) fn register_close_observer(&self, observer: CloseObserver) {
        self.close_observers
            .lock()
            .expect("observer lock poisoned")
            .push(observer);
    }

    pub(crate) async fn connect(
        self: &Arc<Self>,
        transport: MqttConnectTransport,
        connect_packet: MqttPacket,
        keep_alive: KeepAlive,
    ) -> Result<Connack, MqttError> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            match *state {
                ConnectionState::Disconnected | ConnectionState::Faulted => {
                    *state = ConnectionState::Connecting;
                }
                _ => return Err(MqttError::AlreadyConnected),
            }
        }

        for packet_type in [
            PacketType::Connack,
            PacketType::Publish,
            PacketType::Puback,
            PacketType::Pubrec,
            PacketType::Pubrel,
            PacketType::Pubcomp,
            PacketType::Suback,
            PacketType::Unsuback,
            PacketType::Pingresp,
        ] {
            debug_assert!(
                self.dispatcher.has_handler(packet_type),
                "no handler registered for {packet_type:?}"
            );
        }

        let connection = MqttConnection::from(transport);
        let (read_half, write_half) = tokio::io::split(connection);
        let mut framed_read = FramedRead::new(read_half, MqttPacketCodec);
        let mut framed_write = FramedWrite::new(write_half, MqttPacketCodec);

        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel::<MqttPacket>();
        *self.outgoing.lock().expect("outgoing lock poisoned") = Some(sender);
        self.ping_outstanding.store(0, Ordering::Relaxed);

        let last_sent = Arc::clone(&self.last_sent);
        let start = self.start;
        let write_task = tokio::spawn(async move {
            while let Some(packet) = receiver.recv().await {
                tracing::trace!(packet_type = ?packet.packet_type(), "Writing packet");
                if let Err(error) = framed_write.send(packet).await {
                    tracing::error!(?error, "Transport write failed");
                    break;
                }
                last_sent.store(start.elapsed().as_secs(), Ordering::Relaxed);
            }
            let _ = framed_write.flush().await;
        });

        let this = Arc::clone(self);
        let read_task = tokio::spawn(async move {
            loop {
                match framed_read.next().await {
                    Some(Ok(packet)) => {
                        tracing::trace!(packet_type = ?packet.packet_type(), "Received packet");
                        if let Err(error) = this.dispatcher.dispatch(&packet) {
                            tracing::error!(?error, "Received an unprocessable packet");
                            this.connection_lost(DisconnectReason::Protocol(error));
                            break;
                        }
                    }
                    Some(Err(error)) => {
                        tracing::error!(?error, "Transport decode failed");
                        this.connection_lost(DisconnectReason::Protocol(error.into()));
                        break;
                    }
                    None => {
                        tracing::debug!("Transport closed by peer");
                        this.connection_lost(DisconnectReason::TransportClosed);
                        break;
                    }
                }
            }
        });

        {
            let mut tasks = self.tasks.lock().expect("task lock poisoned");
            tasks.read = Some(read_task);
            tasks.write = Some(write_task);
        }

        let (ack_sender, ack_receiver) = oneshot::channel();
        *self
            .pending_connack
            .lock()
            .expect("pending connack lock poisoned") = Some(ack_sender);

        if let Err(error) = self.packet_sender().send(connect_packet) {
            self.teardown(ConnectionState::Faulted);
            return Err(error);
        }

        let connack = match tokio::time::timeout(CONNACK_TIMEOUT, ack_receiver).await {
            Ok(Ok(connack)) => connack,
            Ok(Err(_)) => {
                self.teardown(ConnectionState::Faulted);
                return Err(MqttError::Disconnected);
            }
            Err(_) => {
                tracing::warn!("No ConnAck within {CONNACK_TIMEOUT:?}");
                self.teardown(ConnectionState::Faulted);
                return Err(MqttError::ConnectTimeout);
            }
        };

        if connack.return_code != ConnectReturnCode::Accepted {
            tracing::warn!(return_code = ?connack.return_code, "Broker refused the connection");
            self.teardown(ConnectionState::Disconnected);
            return Err(MqttError::ConnectionRefused(connack.return_code));
        }

        *self.state.lock().expect("state lock poisoned") = ConnectionState::Connected;

        match keep_alive {
            KeepAlive::Seconds(period) => {
                let handle = crate::keep_alive::spawn(
                    period,
                    self.packet_sender(),
                    Arc::clone(&self.last_sent),
                    Arc::clone(&self.ping_outstanding),
                    self.start,
                    Arc::downgrade(self),
                );
                self.tasks.lock().expect("task lock poisoned").keep_alive = Some(handle);
            }
            KeepAlive::Disabled => {
                tracing::info!("Keep alive is disabled, no ping requests will be sent");
            }
        }

        tracing::debug!("Connection established");
        Ok(connack)
    }

    /// The unsolicited-disconnect path. Fires the user callback exactly
    /// once per established connection.
    pub(crate) fn connection_lost(&self, reason: DisconnectReason) {
        let was_connected = {
            let mut state = self.state.lock().expect("state lock poisoned");
            match *state {
                ConnectionState::Connected => {
                    *state = ConnectionState::Disconnected;
                    true
                }
                ConnectionState::Connecting => {
                    *state = ConnectionState::Faulted;
                    false
                }
                _ => false,
            }
        };

        *self.outgoing.lock().expect("outgoing lock poisoned") = None;
        // A handshake still waiting sees its channel close.
        self.pending_connack
            .lock()
            .expect("pending connack lock poisoned")
            .take();

        if !was_connected {
            return;
        }

        self.abort_tasks();

        tracing::warn!(?reason, "Connection lost");

        {
            let observers = self.close_observers.lock().expect("observer lock poisoned");
            for observer in observers.iter() {
                observer();
            }
        }

        let callback = self.on_disconnected.lock().expect("callback lock poisoned");
        if let Some(callback) = callback.as_ref() {
            callback(&reason);
        }
    }

    /// Sends Disconnect best-effort, drains the writer, closes the
    /// transport and resets the state. Does not fire `on_disconnected`.
    pub(crate) async fn disconnect(&self) -> Result<(), MqttError> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            match *state {
                ConnectionState::Connected => *state = ConnectionState::Disconnecting,
                ConnectionState::Disconnected => return Ok(()),
                _ => {
                    *state = ConnectionState::Disconnecting;
                }
            }
        }

        if let Ok(packet) = MqttPacket::from_packet(&Packet::Disconnect) {
            let _ = self.packet_sender().send(packet);
        }

        // Dropping the sender lets the write task drain what is queued,
        // the Disconnect included, before the transport goes away.
        *self.outgoing.lock().expect("outgoing lock poisoned") = None;

        let write = self.tasks.lock().expect("task lock poisoned").write.take();
        if let Some(write) = write {
            let _ = write.await;
        }

        self.abort_tasks();
        self.pending_connack
            .lock()
            .expect("pending connack lock poisoned")
            .take();

        *self.state.lock().expect("state lock poisoned") = ConnectionState::Disconnected;
        tracing::debug!("Disconnected");

        Ok(())
    }

    fn abort_tasks(&self) {
        let taken = {
            let mut tasks = self.tasks.lock().expect("task lock poisoned");
            [
                tasks.read.take(),
                tasks.write.take(),
                tasks.keep_alive.take(),
            ]
        };
        for handle in taken.into_iter().flatten() {
            handle.abort();
        }
    }

    fn teardown(&self, final_state: ConnectionState) {
        self.abort_tasks();
        *self.outgoing.lock().expect("outgoing lock poisoned") = None;
        self.pending_connack
            .lock()
            .expect("pending connack lock poisoned")
            .take();
        *self.state.lock().expect("state lock poisoned") = final_state;
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionHandler;

    static_assertions::assert_impl_all!(ConnectionHandler: Send, Sync);
}
