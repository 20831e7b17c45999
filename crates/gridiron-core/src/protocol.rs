// Wire protocol for the live simulation stream.
//
// Every frame is a JSON envelope `{ "type": ..., "payload": ... }`. Decoding
// happens in two steps: the envelope first, then the payload for the known
// types. Unknown types decode successfully to `Inbound::Unknown` so the caller
// decides what to do with them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::game::{GameStatePatch, PlayLogEntry};

pub const GAME_UPDATE: &str = "GAME_UPDATE";
pub const PLAY_RESULT: &str = "PLAY_RESULT";
pub const ENGINE_UPDATE: &str = "ENGINE_UPDATE";
pub const PONG: &str = "PONG";
pub const PING: &str = "PING";

/// Bucket used for `ENGINE_UPDATE` payloads that do not name one.
pub const DEFAULT_ENGINE_BUCKET: &str = "engine";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    GameUpdate(GameStatePatch),
    PlayResult(PlayLogEntry),
    EngineUpdate(EngineUpdate),
    Pong,
    /// A well-formed envelope with a type this client does not handle.
    Unknown { kind: String },
}

impl Inbound {
    /// The wire `type` this frame was decoded from.
    pub fn kind(&self) -> &str {
        match self {
            Inbound::GameUpdate(_) => GAME_UPDATE,
            Inbound::PlayResult(_) => PLAY_RESULT,
            Inbound::EngineUpdate(_) => ENGINE_UPDATE,
            Inbound::Pong => PONG,
            Inbound::Unknown { kind } => kind,
        }
    }
}

/// Secondary display data destined for one named bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineUpdate {
    pub bucket: String,
    pub data: Value,
}

impl EngineUpdate {
    /// `{ "bucket": "<name>", "data": ... }` targets that bucket; any other
    /// payload is stored whole under [`DEFAULT_ENGINE_BUCKET`].
    fn from_payload(payload: Value) -> Self {
        match payload {
            Value::Object(mut map)
                if map.get("bucket").is_some_and(Value::is_string) && map.contains_key("data") =>
            {
                let bucket = match map.remove("bucket") {
                    Some(Value::String(s)) => s,
                    _ => DEFAULT_ENGINE_BUCKET.to_string(),
                };
                let data = map.remove("data").unwrap_or(Value::Null);
                EngineUpdate { bucket, data }
            }
            other => EngineUpdate {
                bucket: DEFAULT_ENGINE_BUCKET.to_string(),
                data: other,
            },
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    payload: &'a Value,
}

/// Decode one frame (UTF-8 JSON text, or the same bytes sent as binary).
pub fn decode(frame: &[u8]) -> Result<Inbound, DecodeError> {
    let envelope: Envelope = serde_json::from_slice(frame).map_err(DecodeError::Malformed)?;

    let inbound = match envelope.kind.as_str() {
        GAME_UPDATE => Inbound::GameUpdate(payload_as(GAME_UPDATE, envelope.payload)?),
        PLAY_RESULT => Inbound::PlayResult(payload_as(PLAY_RESULT, envelope.payload)?),
        ENGINE_UPDATE => Inbound::EngineUpdate(EngineUpdate::from_payload(envelope.payload)),
        PONG => Inbound::Pong,
        _ => Inbound::Unknown {
            kind: envelope.kind,
        },
    };
    Ok(inbound)
}

fn payload_as<T: for<'de> Deserialize<'de>>(
    kind: &'static str,
    payload: Value,
) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(|source| DecodeError::Payload { kind, source })
}

/// Encode an outbound frame with the same envelope as inbound ones.
pub fn encode(kind: &str, payload: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(&OutboundEnvelope { kind, payload })
}
