//! The kiosk event loop.
//!
//! Broker state and inbound messages arrive on an [`EventBus`], urge-button
//! presses on the key poller channel. Both are handled one at a time on the
//! current-thread runtime. Presses are handled directly rather than
//! published back onto the bus this loop drains, so the loop never waits on
//! its own queue.

use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Result};
use canteen_core::{EventBus, KioskConfig, KioskEvent};
use canteen_hardware::{HardwareContext, KeyEvent};
use canteen_mqtt::{topics, MqttClientConfig, MqttWireClient};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::messages::{ServiceNotice, UrgeRequest};

const BUTTON_SOURCE: &str = "button";

/// What the kiosk does in response to one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Subscribe(&'static str),
    Publish { topic: &'static str, payload: String },
    FlashLed,
    Beep,
}

/// Decide how to react to `event` for the kiosk serving `table`.
pub fn react(event: &KioskEvent, table: u32) -> Vec<Action> {
    match event {
        KioskEvent::BrokerConnected => vec![
            Action::Subscribe(topics::SERVICE_NOTIFY),
            Action::Subscribe(topics::KITCHEN_STATUS),
        ],
        KioskEvent::BrokerDisconnected { reason } => {
            warn!(reason = %reason, "Broker connection lost");
            Vec::new()
        }
        KioskEvent::UrgePressed { timestamp } => match UrgeRequest::new(table).to_json() {
            Ok(payload) => {
                info!(table, timestamp, "Urge button pressed");
                vec![
                    Action::Publish {
                        topic: topics::SERVICE_URGE,
                        payload,
                    },
                    Action::FlashLed,
                    Action::Beep,
                ]
            }
            Err(e) => {
                warn!(error = %e, "Cannot encode urge request");
                Vec::new()
            }
        },
        KioskEvent::MessageReceived { topic, message } if topic == topics::SERVICE_NOTIFY => {
            match ServiceNotice::parse(message) {
                Ok(notice) if notice.is_pickup_for(table) => {
                    info!(
                        table,
                        kind = notice.kind.as_deref().unwrap_or("-"),
                        note = notice.message.as_deref().unwrap_or(""),
                        "Order ready, please pick it up at the counter"
                    );
                    vec![Action::FlashLed, Action::Beep]
                }
                Ok(notice) => {
                    debug!(table = notice.table, action = %notice.action, "Notice for another table");
                    Vec::new()
                }
                Err(e) => {
                    warn!(error = %e, message = %message, "Ignoring malformed service notice");
                    Vec::new()
                }
            }
        }
        KioskEvent::MessageReceived { topic, message } if topic == topics::KITCHEN_STATUS => {
            info!(status = %message, "Kitchen status");
            Vec::new()
        }
        KioskEvent::MessageReceived { topic, .. } => {
            debug!(topic = %topic, "Message on unhandled topic");
            Vec::new()
        }
    }
}

/// One kiosk: messaging client, hardware and the loop that ties them.
pub struct Kiosk {
    table: u32,
    host: String,
    port: u16,
    bus: EventBus,
    mqtt: MqttWireClient,
    hardware: HardwareContext,
    keys: UnboundedReceiver<KeyEvent>,
}

impl Kiosk {
    pub fn new(
        config: &KioskConfig,
        hardware: HardwareContext,
        keys: UnboundedReceiver<KeyEvent>,
    ) -> Self {
        let bus = EventBus::with_name("kiosk");
        let mqtt = MqttWireClient::new(MqttClientConfig::from(&config.mqtt), bus.clone());
        Self {
            table: config.kiosk.table,
            host: config.mqtt.host.clone(),
            port: config.mqtt.port,
            bus,
            mqtt,
            hardware,
            keys,
        }
    }

    /// Connect and handle events until `shutdown` completes.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut events = self.bus.subscribe();
        let mut keys_open = self.hardware.has_button();
        if !keys_open {
            warn!("Urge button unavailable");
        }

        self.mqtt.connect_to_host(self.host.as_str(), self.port).await;
        info!(table = self.table, client_id = %self.mqtt.client_id(), "Kiosk running");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                key = self.keys.recv(), if keys_open => match key {
                    Some(KeyEvent::Pressed) => {
                        let timestamp = chrono::Utc::now().timestamp_millis();
                        debug!(source = BUTTON_SOURCE, "Handling key press");
                        self.handle(&KioskEvent::UrgePressed { timestamp }).await;
                    }
                    None => {
                        warn!("Key poller channel closed");
                        keys_open = false;
                    }
                },
                event = events.recv() => match event {
                    Some((event, meta)) => {
                        debug!(event = event.type_name(), source = %meta.source, seq = meta.sequence, "Handling event");
                        self.handle(&event).await;
                    }
                    None => break,
                },
            }
        }

        // Unsubscribe first: disconnect reports on the bus.
        drop(events);
        self.mqtt.disconnect().await;
        self.hardware.shutdown().await;
        info!("Kiosk stopped");
        Ok(())
    }

    async fn handle(&self, event: &KioskEvent) {
        for action in react(event, self.table) {
            self.perform(action).await;
        }
    }

    async fn perform(&self, action: Action) {
        match action {
            Action::Subscribe(topic) => self.mqtt.subscribe(topic).await,
            Action::Publish { topic, payload } => self.mqtt.publish(topic, &payload).await,
            Action::FlashLed => {
                self.hardware.flash_led_success();
            }
            Action::Beep => {
                if self.hardware.play_success_sound().is_none() {
                    debug!("Buzzer unavailable, skipping tone");
                }
            }
        }
    }
}

/// Run the kiosk until Ctrl-C.
pub async fn run(config: KioskConfig) -> Result<()> {
    let (hardware, keys) = HardwareContext::init(&config.hardware);
    Kiosk::new(&config, hardware, keys)
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
}

/// Connect, publish one message and disconnect.
pub async fn publish_once(
    config: &KioskConfig,
    topic: &str,
    message: &str,
    wait: Duration,
) -> Result<()> {
    let bus = EventBus::new();
    let mut events = bus.subscribe();
    let mqtt = MqttWireClient::new(MqttClientConfig::from(&config.mqtt), bus);
    mqtt.connect_to_host(config.mqtt.host.as_str(), config.mqtt.port).await;

    let outcome = tokio::time::timeout(wait, async {
        while let Some((event, _)) = events.recv().await {
            match event {
                KioskEvent::BrokerConnected => return Ok(()),
                KioskEvent::BrokerDisconnected { reason } => return Err(reason),
                _ => {}
            }
        }
        Err("event bus closed".to_string())
    })
    .await;
    drop(events);

    match outcome {
        Ok(Ok(())) => {
            mqtt.publish(topic, message).await;
            mqtt.disconnect().await;
            Ok(())
        }
        Ok(Err(reason)) => bail!("broker connection failed: {}", reason),
        Err(_) => {
            mqtt.disconnect().await;
            bail!(
                "no CONNACK from {}:{} within {:?}",
                config.mqtt.host,
                config.mqtt.port,
                wait
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use canteen_hardware::{MemoryRegisters, Register, RegisterBlock, TracingBrightness};
    use canteen_mqtt::{ConnAck, ConnectReturnCode, FrameDecoder, Packet, Publish};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    use super::*;

    const WAIT: Duration = Duration::from_secs(3);

    #[test]
    fn test_react_connected_subscribes() {
        assert_eq!(
            react(&KioskEvent::BrokerConnected, 1),
            vec![
                Action::Subscribe("canteen/service/notify"),
                Action::Subscribe("canteen/kitchen/status"),
            ]
        );
    }

    #[test]
    fn test_react_urge() {
        let actions = react(&KioskEvent::UrgePressed { timestamp: 0 }, 4);
        assert_eq!(
            actions,
            vec![
                Action::Publish {
                    topic: "canteen/service/urge",
                    payload: r#"{"type":"service","action":"urge","table":4}"#.to_string(),
                },
                Action::FlashLed,
                Action::Beep,
            ]
        );
    }

    fn message(topic: &str, text: &str) -> KioskEvent {
        KioskEvent::MessageReceived {
            topic: topic.to_string(),
            message: text.to_string(),
        }
    }

    #[test]
    fn test_react_pickup_notice() {
        let notice = r#"{"type":"service","action":"notify","table":1}"#;
        assert_eq!(
            react(&message(topics::SERVICE_NOTIFY, notice), 1),
            vec![Action::FlashLed, Action::Beep]
        );
        assert!(react(&message(topics::SERVICE_NOTIFY, notice), 2).is_empty());
        assert!(react(&message(topics::SERVICE_NOTIFY, "not json"), 1).is_empty());
        // Same payload on another topic is not a notice.
        assert!(react(&message(topics::KITCHEN_STATUS, notice), 1).is_empty());
    }

    #[test]
    fn test_react_passive_events() {
        let disconnected = KioskEvent::BrokerDisconnected {
            reason: "eof".to_string(),
        };
        assert!(react(&disconnected, 1).is_empty());
        assert!(react(&message("other/topic", "x"), 1).is_empty());
    }

    struct Broker {
        stream: TcpStream,
        decoder: FrameDecoder,
    }

    impl Broker {
        async fn expect_packet(&mut self) -> Packet {
            timeout(WAIT, async {
                let mut buf = [0u8; 512];
                loop {
                    if let Some(packet) = self.decoder.next_packet().unwrap() {
                        return packet;
                    }
                    let n = self.stream.read(&mut buf).await.unwrap();
                    assert!(n > 0, "kiosk closed the connection");
                    self.decoder.push(&buf[..n]);
                }
            })
            .await
            .expect("no packet from kiosk")
        }

        async fn send(&mut self, packet: Packet) {
            self.stream.write_all(&packet.encode().unwrap()).await.unwrap();
        }
    }

    fn subscribed_topic(packet: Packet) -> String {
        match packet {
            Packet::Subscribe(sub) => sub.topic,
            other => panic!("expected SUBSCRIBE, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_kiosk_loop_against_broker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = KioskConfig::default();
        config.mqtt.port = listener.local_addr().unwrap().port();
        config.kiosk.table = 7;
        config.hardware.poll_interval_ms = 5;

        let button = Arc::new(MemoryRegisters::new());
        let (hardware, keys) = HardwareContext::with_registers(
            &config.hardware,
            Some(button.clone()),
            Some(Arc::new(MemoryRegisters::new())),
            Arc::new(TracingBrightness),
        );
        let kiosk = Kiosk::new(&config, hardware, keys);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let broker = async move {
            let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
            let mut broker = Broker {
                stream,
                decoder: FrameDecoder::new(),
            };
            assert!(matches!(broker.expect_packet().await, Packet::Connect(_)));
            broker
                .send(Packet::ConnAck(ConnAck {
                    session_present: false,
                    return_code: ConnectReturnCode::Accepted,
                }))
                .await;

            assert_eq!(subscribed_topic(broker.expect_packet().await), topics::SERVICE_NOTIFY);
            assert_eq!(subscribed_topic(broker.expect_packet().await), topics::KITCHEN_STATUS);

            broker
                .send(Packet::Publish(Publish::new(
                    topics::SERVICE_NOTIFY,
                    r#"{"action":"notify","table":7}"#,
                )))
                .await;

            button.clear_bits(Register::Pad, 1 << config.hardware.button_pin);
            match broker.expect_packet().await {
                Packet::Publish(publish) => {
                    assert_eq!(publish.topic, topics::SERVICE_URGE);
                    assert_eq!(publish.message(), r#"{"type":"service","action":"urge","table":7}"#);
                }
                other => panic!("expected urge PUBLISH, got {:?}", other),
            }

            stop_tx.send(()).unwrap();
            assert_eq!(broker.expect_packet().await, Packet::Disconnect);
        };

        let (result, ()) = tokio::join!(
            kiosk.run_until(async {
                let _ = stop_rx.await;
            }),
            broker
        );
        result.unwrap();
    }

    #[tokio::test]
    async fn test_publish_once_without_broker() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut config = KioskConfig::default();
        config.mqtt.port = port;

        let err = publish_once(&config, "t", "m", WAIT).await.unwrap_err();
        assert!(err.to_string().contains("broker connection failed"));
    }
}
