//! Typed MQTT packets and their wire form.
//!
//! | Packet     | First byte | Body                                          |
//! |------------|------------|-----------------------------------------------|
//! | CONNECT    | `0x10`     | "MQTT", level 4, flags, keep-alive, client id |
//! | CONNACK    | `0x20`     | session-present, return code                  |
//! | PUBLISH    | `0x30`     | topic, payload (QoS 0, no packet id)          |
//! | SUBSCRIBE  | `0x82`     | packet id, topic, requested QoS               |
//! | SUBACK     | `0x90`     | packet id, granted QoS per topic              |
//! | PINGREQ    | `0xC0`     | empty                                         |
//! | PINGRESP   | `0xD0`     | empty                                         |
//! | DISCONNECT | `0xE0`     | empty                                         |

use std::fmt;

use crate::codec::{encode_remaining_length, encode_string, string_len, Reader};
use crate::error::{MqttError, Result};

pub const PROTOCOL_NAME: &str = "MQTT";
pub const PROTOCOL_LEVEL: u8 = 0x04;

const CONNECT: u8 = 0x10;
const CONNACK: u8 = 0x20;
const PUBLISH: u8 = 0x30;
const SUBSCRIBE: u8 = 0x80;
const SUBACK: u8 = 0x90;
const PINGREQ: u8 = 0xC0;
const PINGRESP: u8 = 0xD0;
const DISCONNECT: u8 = 0xE0;

const FLAG_CLEAN_SESSION: u8 = 0x02;

/// A single MQTT control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    Subscribe(Subscribe),
    SubAck(SubAck),
    PingReq,
    PingResp,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
}

impl Connect {
    /// Clean-session CONNECT with no will and no credentials.
    pub fn new(client_id: impl Into<String>, keep_alive: u16) -> Self {
        Self {
            client_id: client_id.into(),
            keep_alive,
            clean_session: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

/// CONNACK return codes defined by MQTT 3.1.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUserNameOrPassword,
    NotAuthorized,
    Reserved(u8),
}

impl From<u8> for ConnectReturnCode {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Accepted,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            other => Self::Reserved(other),
        }
    }
}

impl ConnectReturnCode {
    pub fn code(&self) -> u8 {
        match self {
            Self::Accepted => 0,
            Self::UnacceptableProtocolVersion => 1,
            Self::IdentifierRejected => 2,
            Self::ServerUnavailable => 3,
            Self::BadUserNameOrPassword => 4,
            Self::NotAuthorized => 5,
            Self::Reserved(code) => *code,
        }
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Accepted => "accepted",
            Self::UnacceptableProtocolVersion => "unacceptable protocol version",
            Self::IdentifierRejected => "identifier rejected",
            Self::ServerUnavailable => "server unavailable",
            Self::BadUserNameOrPassword => "bad user name or password",
            Self::NotAuthorized => "not authorized",
            Self::Reserved(code) => return write!(f, "reserved code {}", code),
        };
        f.write_str(text)
    }
}

/// QoS 0 publish. The payload is kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Publish {
    pub fn new(topic: impl Into<String>, message: &str) -> Self {
        Self {
            topic: topic.into(),
            payload: message.as_bytes().to_vec(),
        }
    }

    /// Payload as text; invalid UTF-8 sequences are replaced.
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Single-topic SUBSCRIBE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub topic: String,
    pub qos: u8,
}

impl Subscribe {
    /// The kiosk only ever has one subscription in flight, so the packet
    /// identifier is always 1 and the requested QoS always 0.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            packet_id: 1,
            topic: topic.into(),
            qos: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    pub return_codes: Vec<u8>,
}

impl SubAck {
    pub fn is_failure(&self) -> bool {
        self.return_codes.iter().any(|code| *code == 0x80)
    }
}

impl Packet {
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::ConnAck(_) => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::Subscribe(_) => "SUBSCRIBE",
            Packet::SubAck(_) => "SUBACK",
            Packet::PingReq => "PINGREQ",
            Packet::PingResp => "PINGRESP",
            Packet::Disconnect => "DISCONNECT",
        }
    }

    /// Serialize to a complete frame: fixed header, remaining length, body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let (header, body) = match self {
            Packet::Connect(connect) => {
                let mut body = Vec::with_capacity(10 + string_len(&connect.client_id));
                encode_string(PROTOCOL_NAME, &mut body)?;
                body.push(PROTOCOL_LEVEL);
                body.push(if connect.clean_session { FLAG_CLEAN_SESSION } else { 0 });
                body.extend_from_slice(&connect.keep_alive.to_be_bytes());
                encode_string(&connect.client_id, &mut body)?;
                (CONNECT, body)
            }
            Packet::ConnAck(ack) => (
                CONNACK,
                vec![u8::from(ack.session_present), ack.return_code.code()],
            ),
            Packet::Publish(publish) => {
                let mut body = Vec::with_capacity(string_len(&publish.topic) + publish.payload.len());
                encode_string(&publish.topic, &mut body)?;
                body.extend_from_slice(&publish.payload);
                (PUBLISH, body)
            }
            Packet::Subscribe(sub) => {
                let mut body = Vec::with_capacity(3 + string_len(&sub.topic));
                body.extend_from_slice(&sub.packet_id.to_be_bytes());
                encode_string(&sub.topic, &mut body)?;
                body.push(sub.qos);
                (SUBSCRIBE | 0x02, body)
            }
            Packet::SubAck(ack) => {
                let mut body = ack.packet_id.to_be_bytes().to_vec();
                body.extend_from_slice(&ack.return_codes);
                (SUBACK, body)
            }
            Packet::PingReq => (PINGREQ, Vec::new()),
            Packet::PingResp => (PINGRESP, Vec::new()),
            Packet::Disconnect => (DISCONNECT, Vec::new()),
        };

        let mut frame = Vec::with_capacity(body.len() + 5);
        frame.push(header);
        encode_remaining_length(body.len(), &mut frame)?;
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Parse one frame body given its first header byte.
    ///
    /// Returns `Ok(None)` for packet types this client does not handle.
    pub fn decode(header: u8, body: &[u8]) -> Result<Option<Packet>> {
        let packet = match header & 0xF0 {
            CONNECT => {
                let mut r = Reader::new(body, "CONNECT");
                let name = r.string()?;
                let level = r.u8()?;
                if name != PROTOCOL_NAME || level != PROTOCOL_LEVEL {
                    return Err(MqttError::malformed(
                        "CONNECT",
                        format!("unsupported protocol {} level {}", name, level),
                    ));
                }
                let flags = r.u8()?;
                let keep_alive = r.u16()?;
                let client_id = r.string()?;
                Packet::Connect(Connect {
                    client_id,
                    keep_alive,
                    clean_session: flags & FLAG_CLEAN_SESSION != 0,
                })
            }
            CONNACK => {
                if body.len() != 2 {
                    return Err(MqttError::malformed(
                        "CONNACK",
                        format!("expected 2 bytes, got {}", body.len()),
                    ));
                }
                Packet::ConnAck(ConnAck {
                    session_present: body[0] & 0x01 != 0,
                    return_code: ConnectReturnCode::from(body[1]),
                })
            }
            PUBLISH => {
                let qos = (header >> 1) & 0x03;
                let mut r = Reader::new(body, "PUBLISH");
                let topic = r.string()?;
                if qos > 0 {
                    // Packet identifier; only QoS 0 is requested, but a broker
                    // may still forward at a higher level.
                    r.u16()?;
                }
                Packet::Publish(Publish {
                    topic,
                    payload: r.rest().to_vec(),
                })
            }
            SUBSCRIBE => {
                let mut r = Reader::new(body, "SUBSCRIBE");
                let packet_id = r.u16()?;
                let topic = r.string()?;
                let qos = r.u8()?;
                Packet::Subscribe(Subscribe {
                    packet_id,
                    topic,
                    qos,
                })
            }
            SUBACK => {
                let mut r = Reader::new(body, "SUBACK");
                let packet_id = r.u16()?;
                if r.is_empty() {
                    return Err(MqttError::malformed("SUBACK", "no return codes"));
                }
                Packet::SubAck(SubAck {
                    packet_id,
                    return_codes: r.rest().to_vec(),
                })
            }
            PINGREQ => Packet::PingReq,
            PINGRESP => Packet::PingResp,
            DISCONNECT => Packet::Disconnect,
            _ => return Ok(None),
        };
        Ok(Some(packet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_connect_frame_bytes() {
        let frame = Packet::Connect(Connect::new("X1", 60)).encode().unwrap();
        // 10 bytes of variable header plus 4 bytes of payload
        assert_eq!(
            hex(&frame),
            "10 0E 00 04 4D 51 54 54 04 02 00 3C 00 02 58 31"
        );
    }

    #[test]
    fn test_publish_frame_bytes() {
        let frame = Packet::Publish(Publish::new("t", "hello")).encode().unwrap();
        assert_eq!(hex(&frame), "30 08 00 01 74 68 65 6C 6C 6F");
    }

    #[test]
    fn test_subscribe_frame_bytes() {
        let frame = Packet::Subscribe(Subscribe::new("canteen/service/notify"))
            .encode()
            .unwrap();
        assert_eq!(frame[0], 0x82);
        assert_eq!(frame[1] as usize, 2 + 2 + "canteen/service/notify".len() + 1);
        assert_eq!(&frame[2..4], &[0x00, 0x01]);
        assert_eq!(*frame.last().unwrap(), 0x00);
    }

    #[test]
    fn test_empty_packets() {
        assert_eq!(Packet::PingReq.encode().unwrap(), [0xC0, 0x00]);
        assert_eq!(Packet::Disconnect.encode().unwrap(), [0xE0, 0x00]);
    }

    #[test]
    fn test_publish_with_multibyte_length() {
        let message = "m".repeat(300);
        let frame = Packet::Publish(Publish::new("a", &message)).encode().unwrap();
        // 3 bytes of topic field + 300 payload = 303 = 0xAF 0x02
        assert_eq!(&frame[..3], &[0x30, 0xAF, 0x02]);
        assert_eq!(frame.len(), 3 + 303);
    }

    #[test]
    fn test_decode_publish() {
        let packet = Packet::decode(0x30, &[0x00, 0x01, b'a', b'b']).unwrap().unwrap();
        match packet {
            Packet::Publish(publish) => {
                assert_eq!(publish.topic, "a");
                assert_eq!(publish.message(), "b");
            }
            other => panic!("expected PUBLISH, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_qos1_publish_skips_packet_id() {
        let body = [0x00, 0x01, b'a', 0x00, 0x07, b'o', b'k'];
        let packet = Packet::decode(0x32, &body).unwrap().unwrap();
        assert_eq!(
            packet,
            Packet::Publish(Publish {
                topic: "a".into(),
                payload: b"ok".to_vec()
            })
        );
    }

    #[test]
    fn test_decode_publish_topic_overruns_frame() {
        let err = Packet::decode(0x30, &[0x00, 0x09, b'a']).unwrap_err();
        assert!(matches!(err, MqttError::MalformedPacket { kind: "PUBLISH", .. }));
    }

    #[test]
    fn test_decode_connack() {
        let packet = Packet::decode(0x20, &[0x00, 0x05]).unwrap().unwrap();
        assert_eq!(
            packet,
            Packet::ConnAck(ConnAck {
                session_present: false,
                return_code: ConnectReturnCode::NotAuthorized,
            })
        );
        assert!(Packet::decode(0x20, &[0x00]).is_err());
    }

    #[test]
    fn test_decode_unknown_type_is_ignored() {
        // PUBACK
        assert_eq!(Packet::decode(0x40, &[0x00, 0x01]).unwrap(), None);
    }

    #[test]
    fn test_decode_connect_matches_encode() {
        let connect = Packet::Connect(Connect::new("GEC6818_42", 60));
        let frame = connect.encode().unwrap();
        assert_eq!(Packet::decode(frame[0], &frame[2..]).unwrap(), Some(connect));
    }

    #[test]
    fn test_suback_failure() {
        let packet = Packet::decode(0x90, &[0x00, 0x01, 0x80]).unwrap().unwrap();
        match packet {
            Packet::SubAck(ack) => assert!(ack.is_failure()),
            other => panic!("expected SUBACK, got {:?}", other),
        }
    }
}
