//! MQTT wire client.
//!
//! One [`MqttWireClient`] owns at most one TCP connection. A background task
//! per connection performs the CONNECT handshake, reassembles inbound frames,
//! sends keep-alive pings and reports everything to the [`EventBus`]:
//!
//! - `KioskEvent::BrokerConnected` once CONNACK accepts the session
//! - `KioskEvent::MessageReceived` for every inbound PUBLISH, in arrival order
//! - `KioskEvent::BrokerDisconnected` when the connection fails, times out
//!   or closes
//!
//! Publishing to the bus waits for room in subscriber queues, so a reader
//! that falls behind slows the socket reads down instead of losing frames.
//!
//! Nothing here retries on its own; callers watch for the disconnect event
//! and call [`MqttWireClient::connect_to_host`] again if they want to.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use canteen_core::{EventBus, KioskEvent, MqttSettings};
use parking_lot::Mutex;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::decoder::FrameDecoder;
use crate::error::{MqttError, Result};
use crate::packet::{Connect, ConnectReturnCode, Packet, Publish, Subscribe};

const EVENT_SOURCE: &str = "mqtt";
const READ_BUFFER_SIZE: usize = 4096;

/// Connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// TCP connect and CONNECT/CONNACK handshake in progress
    Connecting,
    Connected,
}

/// Client settings.
#[derive(Debug, Clone)]
pub struct MqttClientConfig {
    /// A random number in `0..10000` is appended to form the client id
    pub client_id_prefix: String,
    /// Seconds; 0 disables pings
    pub keep_alive_secs: u16,
    /// Limit for the TCP connect before the attempt is reported as failed
    pub connect_timeout: Duration,
}

impl Default for MqttClientConfig {
    fn default() -> Self {
        MqttClientConfig::from(&MqttSettings::default())
    }
}

impl From<&MqttSettings> for MqttClientConfig {
    fn from(settings: &MqttSettings) -> Self {
        Self {
            client_id_prefix: settings.client_id_prefix.clone(),
            keep_alive_secs: settings.keep_alive_secs,
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
        }
    }
}

/// State shared with the connection task.
struct Shared {
    state: watch::Sender<ConnectionState>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) -> ConnectionState {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "MQTT connection state changed");
        }
        previous
    }

    /// Encode and write one frame, flushing it to the socket.
    async fn send(&self, packet: &Packet) -> Result<()> {
        let frame = packet.encode()?;
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(MqttError::NotConnected)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        trace!(kind = packet.kind(), len = frame.len(), "MQTT frame written");
        Ok(())
    }
}

/// Publish/subscribe client speaking a minimal MQTT 3.1.1 subset.
pub struct MqttWireClient {
    client_id: String,
    keep_alive_secs: u16,
    connect_timeout: Duration,
    bus: EventBus,
    shared: Arc<Shared>,
    connection: Mutex<Option<JoinHandle<()>>>,
}

impl MqttWireClient {
    /// Create a disconnected client that reports into `bus`.
    pub fn new(config: MqttClientConfig, bus: EventBus) -> Self {
        let suffix: u16 = rand::thread_rng().gen_range(0..10000);
        let client_id = format!("{}{}", config.client_id_prefix, suffix);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            client_id,
            keep_alive_secs: config.keep_alive_secs,
            connect_timeout: config.connect_timeout,
            bus,
            shared: Arc::new(Shared {
                state,
                writer: tokio::sync::Mutex::new(None),
            }),
            connection: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Start connecting to `host:port`.
    ///
    /// Any existing connection is torn down first. Returns as soon as the
    /// connection task is started; the outcome arrives on the event bus.
    pub async fn connect_to_host(&self, host: impl Into<String>, port: u16) {
        self.disconnect().await;

        let host = host.into();
        info!(host = %host, port, client_id = %self.client_id, "Connecting to MQTT broker");
        self.shared.set_state(ConnectionState::Connecting);

        let connect = Connect::new(self.client_id.clone(), self.keep_alive_secs);
        let task = tokio::spawn(run_connection(
            self.shared.clone(),
            self.bus.clone(),
            host,
            port,
            self.connect_timeout,
            connect,
        ));
        *self.connection.lock() = Some(task);
    }

    /// Publish `message` to `topic` at QoS 0.
    ///
    /// Outside the `Connected` state nothing is written and the call is
    /// only logged.
    pub async fn publish(&self, topic: &str, message: &str) {
        if !self.is_connected() {
            warn!(topic, "Cannot publish, MQTT not connected");
            return;
        }

        let packet = Packet::Publish(Publish::new(topic, message));
        match self.shared.send(&packet).await {
            Ok(()) => info!(topic, size = message.len(), "MQTT published"),
            Err(e) => warn!(topic, error = %e, "MQTT publish failed"),
        }
    }

    /// Subscribe to `topic` at QoS 0. Ignored unless connected.
    pub async fn subscribe(&self, topic: &str) {
        if !self.is_connected() {
            debug!(topic, "Skipping subscribe, MQTT not connected");
            return;
        }

        match self.shared.send(&Packet::Subscribe(Subscribe::new(topic))).await {
            Ok(()) => info!(topic, "MQTT subscribed"),
            Err(e) => warn!(topic, error = %e, "MQTT subscribe failed"),
        }
    }

    /// Close the connection, sending DISCONNECT first if the session is up.
    pub async fn disconnect(&self) {
        let task = self.connection.lock().take();
        let Some(task) = task else {
            return;
        };

        if self.is_connected() {
            if let Err(e) = self.shared.send(&Packet::Disconnect).await {
                debug!(error = %e, "DISCONNECT not delivered");
            }
        }
        task.abort();
        let _ = task.await;
        self.shared.writer.lock().await.take();

        if self.shared.set_state(ConnectionState::Disconnected) != ConnectionState::Disconnected {
            info!("MQTT disconnected by client");
            self.bus
                .publish_with_source(
                    KioskEvent::BrokerDisconnected {
                        reason: "client disconnect".to_string(),
                    },
                    EVENT_SOURCE,
                )
                .await;
        }
    }
}

impl Drop for MqttWireClient {
    fn drop(&mut self) {
        if let Some(task) = self.connection.get_mut().take() {
            task.abort();
        }
    }
}

async fn run_connection(
    shared: Arc<Shared>,
    bus: EventBus,
    host: String,
    port: u16,
    limit: Duration,
    connect: Connect,
) {
    let reason = match connect_within(limit, TcpStream::connect((host.as_str(), port))).await {
        Ok(stream) => serve(&shared, &bus, stream, connect).await,
        Err(reason) => {
            warn!(host = %host, port, error = %reason, "MQTT transport connect failed");
            reason
        }
    };

    shared.writer.lock().await.take();
    shared.set_state(ConnectionState::Disconnected);
    info!(reason = %reason, "MQTT connection closed");
    bus.publish_with_source(KioskEvent::BrokerDisconnected { reason }, EVENT_SOURCE)
        .await;
}

/// Await a transport connect, failing once `limit` has passed.
async fn connect_within<F>(limit: Duration, connect: F) -> std::result::Result<TcpStream, String>
where
    F: Future<Output = std::io::Result<TcpStream>>,
{
    match tokio::time::timeout(limit, connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("connect timed out after {}s", limit.as_secs())),
    }
}

/// Drive one established transport until it closes; returns the reason.
async fn serve(shared: &Shared, bus: &EventBus, stream: TcpStream, connect: Connect) -> String {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Could not set TCP_NODELAY");
    }
    let (mut reader, writer) = stream.into_split();
    *shared.writer.lock().await = Some(writer);

    let keep_alive = connect.keep_alive;
    debug!(client_id = %connect.client_id, "Transport up, sending CONNECT");
    if let Err(e) = shared.send(&Packet::Connect(connect)).await {
        return format!("CONNECT not sent: {}", e);
    }

    let period = Duration::from_secs(u64::from(keep_alive.max(1)));
    let mut ping = tokio::time::interval_at(Instant::now() + period, period);
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => return "connection closed by broker".to_string(),
                Ok(n) => {
                    decoder.push(&buf[..n]);
                    loop {
                        match decoder.next_packet() {
                            Ok(Some(packet)) => dispatch(shared, bus, packet).await,
                            Ok(None) => break,
                            Err(e) => warn!(error = %e, "Dropping malformed MQTT frame"),
                        }
                    }
                }
                Err(e) => return e.to_string(),
            },
            _ = ping.tick(), if keep_alive > 0 => {
                if shared.state() == ConnectionState::Connected {
                    if let Err(e) = shared.send(&Packet::PingReq).await {
                        return format!("keep-alive failed: {}", e);
                    }
                }
            }
        }
    }
}

async fn dispatch(shared: &Shared, bus: &EventBus, packet: Packet) {
    match packet {
        Packet::ConnAck(ack) if ack.return_code == ConnectReturnCode::Accepted => {
            shared.set_state(ConnectionState::Connected);
            info!(session_present = ack.session_present, "MQTT connected successfully");
            bus.publish_with_source(KioskEvent::BrokerConnected, EVENT_SOURCE)
                .await;
        }
        Packet::ConnAck(ack) => {
            warn!(
                code = ack.return_code.code(),
                reason = %ack.return_code,
                "MQTT broker refused connection"
            );
        }
        Packet::Publish(publish) => {
            let message = publish.message();
            debug!(topic = %publish.topic, size = publish.payload.len(), "MQTT received");
            bus.publish_with_source(
                KioskEvent::MessageReceived {
                    topic: publish.topic,
                    message,
                },
                EVENT_SOURCE,
            )
            .await;
        }
        Packet::SubAck(ack) if ack.is_failure() => {
            warn!(packet_id = ack.packet_id, "MQTT broker rejected subscription");
        }
        Packet::SubAck(ack) => {
            debug!(packet_id = ack.packet_id, granted = ?ack.return_codes, "Subscription acknowledged");
        }
        Packet::PingResp => trace!("PINGRESP"),
        other => debug!(kind = other.kind(), "Ignoring unexpected packet from broker"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_uses_prefix() {
        let config = MqttClientConfig {
            client_id_prefix: "KIOSK_".to_string(),
            ..MqttClientConfig::default()
        };
        let client = MqttWireClient::new(config, EventBus::new());
        let suffix = client.client_id().strip_prefix("KIOSK_").unwrap();
        let n: u32 = suffix.parse().unwrap();
        assert!(n < 10000);
    }

    #[tokio::test]
    async fn test_new_client_is_disconnected() {
        let client = MqttWireClient::new(MqttClientConfig::default(), EventBus::new());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.client_id().starts_with("GEC6818_"));

        // No connection: both are silent no-ops.
        client.publish("t", "hello").await;
        client.subscribe("t").await;
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_limit() {
        let limit = Duration::from_secs(10);
        let started = Instant::now();
        let never = std::future::pending::<std::io::Result<TcpStream>>();
        let reason = connect_within(limit, never).await.unwrap_err();
        assert_eq!(reason, "connect timed out after 10s");
        assert!(started.elapsed() >= limit);
    }

    #[tokio::test]
    async fn test_connect_error_passes_through() {
        let refused = async {
            Err::<TcpStream, _>(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
        };
        let reason = connect_within(Duration::from_secs(10), refused).await.unwrap_err();
        assert!(!reason.contains("timed out"));
    }
}
