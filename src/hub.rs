//! Fan-out of bridge messages to WebSocket listeners.

use std::sync::Arc;

use log::trace;
use tokio::sync::{broadcast, watch};

use crate::messages::{ConnectionStatus, OutboundMessage};
use crate::vitals::VitalsSnapshot;

/// Messages buffered per listener before a slow one starts losing them.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Fire-and-forget broadcaster.
///
/// Listeners that fall behind lose the oldest messages; nobody blocks the
/// serial path. The latest connection status and vitals are also kept so a
/// listener joining late can be brought up to date.
#[derive(Clone)]
pub struct Hub {
    tx: broadcast::Sender<OutboundMessage>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    vitals: Arc<watch::Sender<VitalsSnapshot>>,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        let (status, _) = watch::channel(ConnectionStatus {
            connected: false,
            port: None,
            message: None,
            error: None,
        });
        let (vitals, _) = watch::channel(VitalsSnapshot::default());
        Self {
            tx,
            status: Arc::new(status),
            vitals: Arc::new(vitals),
        }
    }

    /// Send `message` to every current listener.
    pub fn publish(&self, message: OutboundMessage) {
        match &message {
            OutboundMessage::ConnectionStatus(status) => {
                self.status.send_replace(status.clone());
            }
            OutboundMessage::Vitals { data } => {
                self.vitals.send_replace(*data);
            }
            _ => {}
        }
        // No receivers is not an error for a broadcast.
        if self.tx.send(message).is_err() {
            trace!("no listeners for broadcast");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.tx.subscribe()
    }

    /// Most recently published connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Latest connection status and vitals, as a new listener should see them.
    pub fn greeting(&self) -> [OutboundMessage; 2] {
        [
            OutboundMessage::ConnectionStatus(self.status.borrow().clone()),
            OutboundMessage::Vitals {
                data: *self.vitals.borrow(),
            },
        ]
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn every_listener_gets_each_message() {
        let hub = Hub::default();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.listeners(), 2);

        let msg = OutboundMessage::Ecg {
            ecg_value: 10,
            timestamp: 1,
        };
        hub.publish(msg.clone());
        assert_eq!(a.recv().await.unwrap(), msg);
        assert_eq!(b.recv().await.unwrap(), msg);
    }

    #[tokio::test]
    async fn slow_listener_lags_without_blocking() {
        let hub = Hub::new(4);
        let mut slow = hub.subscribe();
        for i in 0..10 {
            hub.publish(OutboundMessage::Ecg {
                ecg_value: i,
                timestamp: u64::from(i),
            });
        }
        assert!(matches!(slow.recv().await, Err(RecvError::Lagged(6))));
        match slow.recv().await.unwrap() {
            OutboundMessage::Ecg { ecg_value, .. } => assert_eq!(ecg_value, 6),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn publishing_without_listeners_is_fine() {
        let hub = Hub::default();
        hub.publish(OutboundMessage::Error {
            message: "nobody home".into(),
        });
        assert_eq!(hub.listeners(), 0);
    }

    #[test]
    fn greeting_reflects_latest_state() {
        let hub = Hub::default();
        let [status, vitals] = hub.greeting();
        assert!(matches!(
            status,
            OutboundMessage::ConnectionStatus(ConnectionStatus { connected: false, .. })
        ));
        assert!(matches!(vitals, OutboundMessage::Vitals { data } if data.heart_rate == 0));

        hub.publish(OutboundMessage::ConnectionStatus(ConnectionStatus::connected(
            "COM3", "ok",
        )));
        hub.publish(OutboundMessage::Vitals {
            data: VitalsSnapshot {
                heart_rate: 64,
                ..Default::default()
            },
        });
        let [status, vitals] = hub.greeting();
        assert!(matches!(
            status,
            OutboundMessage::ConnectionStatus(ConnectionStatus { connected: true, .. })
        ));
        assert!(matches!(vitals, OutboundMessage::Vitals { data } if data.heart_rate == 64));
    }
}
