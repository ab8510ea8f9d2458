//! # forward
//!
//! Outbound position datagrams for a downstream consumer.
//!
//! ```text
//! TAG:0x02006655,X:1.250,Y:-3.000,Z:0.000,T:1718000000.125
//! ```

use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::config::NetworkConfig;

pub fn format_position_message(tag_id: &str, x: f64, y: f64, z: f64, t: f64) -> String {
    format!("TAG:{tag_id},X:{x:.3},Y:{y:.3},Z:{z:.3},T:{t:.3}")
}

struct Sink {
    socket: UdpSocket,
    target: String,
}

/// Disabled unless both `network.sink_host` and `network.sink_port` are set.
pub struct PositionForwarder {
    sink: Option<Sink>,
}

impl PositionForwarder {
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub async fn from_config(net: &NetworkConfig) -> Self {
        let Some(target) = net.sink_addr() else {
            return Self::disabled();
        };
        match UdpSocket::bind("0.0.0.0:0").await {
            Ok(socket) => {
                info!("Forwarding positions to {target}");
                Self { sink: Some(Sink { socket, target }) }
            }
            Err(e) => {
                warn!("Position forwarding disabled, could not bind sender: {e}");
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Fire-and-forget; failures are logged and dropped.
    pub async fn forward(&self, tag_id: &str, x: f64, y: f64, z: f64, t: f64) {
        let Some(sink) = &self.sink else {
            return;
        };
        let msg = format_position_message(tag_id, x, y, z, t);
        if let Err(e) = sink.socket.send_to(msg.as_bytes(), sink.target.as_str()).await {
            warn!("Position forward to {} failed: {e}", sink.target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_format() {
        assert_eq!(
            format_position_message("0x02006655", 1.25, -3.0, 0.0, 1718000000.1254),
            "TAG:0x02006655,X:1.250,Y:-3.000,Z:0.000,T:1718000000.125"
        );
    }

    #[tokio::test]
    async fn unset_sink_disables_forwarding() {
        let mut net = NetworkConfig::default();
        net.sink_host = Some("127.0.0.1".into());
        assert!(!PositionForwarder::from_config(&net).await.is_enabled());
        // no-op rather than an error
        PositionForwarder::disabled().forward("T1", 0.0, 0.0, 0.0, 0.0).await;
    }

    #[tokio::test]
    async fn sends_one_datagram_per_position() {
        let rx = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = rx.local_addr().unwrap().port();
        let net = NetworkConfig {
            sink_host: Some("127.0.0.1".into()),
            sink_port: Some(port),
            ..NetworkConfig::default()
        };
        let fwd = PositionForwarder::from_config(&net).await;
        assert!(fwd.is_enabled());
        fwd.forward("T1", 1.0, 2.0, 3.0, 4.0).await;

        let mut buf = [0u8; 128];
        let (n, _) = rx.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"TAG:T1,X:1.000,Y:2.000,Z:3.000,T:4.000");
    }
}
