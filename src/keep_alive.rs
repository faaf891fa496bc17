//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use std::num::NonZeroU16;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use mqtt_wire::v3::packet::Packet;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::connection::{ConnectionHandler, DisconnectReason, PacketSender};
use crate::packet::MqttPacket;

const DEFAULT_KEEP_ALIVE_SECONDS: u16 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAlive {
    Disabled,
    Seconds(NonZeroU16),
}

impl KeepAlive {
    pub(crate) fn as_u16(&self) -> u16 {
        match self {
            KeepAlive::Disabled => 0,
            KeepAlive::Seconds(s) => s.get(),
        }
    }

    /// Zero disables the heartbeat entirely.
    pub fn from_secs(seconds: u16) -> KeepAlive {
        match NonZeroU16::new(seconds) {
            Some(seconds) => KeepAlive::Seconds(seconds),
            None => KeepAlive::Disabled,
        }
    }
}

impl Default for KeepAlive {
    fn default() -> Self {
        KeepAlive::from_secs(DEFAULT_KEEP_ALIVE_SECONDS)
    }
}

impl TryFrom<Duration> for KeepAlive {
    type Error = KeepAliveError;

    fn try_from(value: Duration) -> Result<Self, Self::Error> {
        let seconds = u16::try_from(value.as_secs())
            .map_err(|_| KeepAliveError::TooLong(value.as_secs()))?;
        Ok(KeepAlive::from_secs(seconds))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeepAliveError {
    #[error("A keep alive of {} seconds does not fit the 16 bit wire field", .0)]
    TooLong(u64),
}

/// The heartbeat task.
///
/// Every period it checks whether anything was written since the last
/// tick; if not, a PingReq goes out. A received PingResp clears the
/// outstanding counter. Two unanswered pings in a row route through the
/// same unsolicited-disconnect path a dead transport would.
pub(crate) fn spawn(
    period: NonZeroU16,
    sender: PacketSender,
    last_sent: Arc<AtomicU64>,
    ping_outstanding: Arc<AtomicU32>,
    start: tokio::time::Instant,
    connection: Weak<ConnectionHandler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period_seconds = u64::from(period.get());
        let mut interval = tokio::time::interval(Duration::from_secs(period_seconds));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;

            if ping_outstanding.load(Ordering::Relaxed) >= 2 {
                tracing::warn!("Two ping requests went unanswered, dropping the connection");
                if let Some(connection) = connection.upgrade() {
                    connection.connection_lost(DisconnectReason::KeepAliveTimeout);
                }
                break;
            }

            let idle = start
                .elapsed()
                .as_secs()
                .saturating_sub(last_sent.load(Ordering::Relaxed));
            if idle < period_seconds {
                continue;
            }

            let Ok(pingreq) = MqttPacket::from_packet(&Packet::Pingreq) else {
                break;
            };

            ping_outstanding.fetch_add(1, Ordering::Relaxed);
            if sender.send(pingreq).is_err() {
                break;
            }
            tracing::trace!("Ping request sent");
        }
    })
}
