//! Newline-delimited JSON frames.
//!
//! client → broker: `{"id":1,"topic":"orders","key":"k","payload":"<base64>"}`
//! broker → client: `{"id":1,"partition":0,"offset":41}` | `{"id":1,"error":"..."}`
//! broker → client (any time): `{"log":{"level":4,"facility":"QUOTA","message":"..."}}`
//!
//! Optional handshake: `{"auth":{...}}` → `{"ok":true}` | `{"ok":false,"error":"..."}`.

use base64::Engine;
use serde::{Deserialize, Serialize};

use broker_api::{BrokerError, DeliveryPosition, OutgoingMessage, SaslConfig};

#[derive(Serialize)]
struct Request<'a> {
    id: u64,
    topic: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    payload: String,
}

/// Request line, `\n` included.
pub fn encode_request(id: u64, message: &OutgoingMessage) -> Result<Vec<u8>, BrokerError> {
    let request = Request {
        id,
        topic: &message.topic,
        key: message.key.as_deref(),
        payload: base64::engine::general_purpose::STANDARD.encode(&message.payload),
    };
    let mut line = serde_json::to_vec(&request)?;
    line.push(b'\n');
    Ok(line)
}

#[derive(Debug, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default)]
    pub partition: Option<i32>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Response {
    pub fn into_result(self, topic: String) -> Result<DeliveryPosition, BrokerError> {
        if let Some(error) = self.error {
            return Err(BrokerError::new(format!("broker rejected '{topic}': {error}")));
        }
        match (self.partition, self.offset) {
            (Some(partition), Some(offset)) => Ok(DeliveryPosition { topic, partition, offset }),
            _ => Err(BrokerError::format(format!(
                "response {} has neither position nor error",
                self.id
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ServerLog {
    pub level: u8,
    #[serde(default)]
    pub facility: String,
    pub message: String,
}

/// Any line the broker may send after the handshake.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Log { log: ServerLog },
    Response(Response),
}

pub fn decode_inbound(line: &str) -> Result<Inbound, BrokerError> {
    Ok(serde_json::from_str(line)?)
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    auth: Auth<'a>,
}

#[derive(Serialize)]
struct Auth<'a> {
    mechanism: &'a str,
    username: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
}

pub fn encode_auth(sasl: &SaslConfig, client_id: Option<&str>) -> Result<Vec<u8>, BrokerError> {
    let request = AuthRequest {
        auth: Auth {
            mechanism: &sasl.mechanism,
            username: &sasl.username,
            password: &sasl.password,
            client_id,
        },
    };
    let mut line = serde_json::to_vec(&request)?;
    line.push(b'\n');
    Ok(line)
}

#[derive(Debug, Deserialize)]
pub struct AuthReply {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}
