// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The JSON data-channel packet contract shared with the browser meeting UI:
//! `{ "type": <0|1|2>, "data": <object> }`.
//!
//! The numeric `type` tag (rather than a string) is part of the wire
//! contract the browser UI already expects, so `DataPacket` implements
//! `Serialize`/`Deserialize` by hand instead of leaning on
//! `#[serde(tag = "...")]`, which only supports string tags.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_repr::{Deserialize_repr, Serialize_repr};
use ts_rs::TS;

/// One packet published onto the room's reliable data channel.
#[derive(Debug, Clone, PartialEq, TS)]
#[ts(export)]
pub enum DataPacket {
    Transcript(TranscriptPayload),
    State(StatePayload),
    Error(ErrorPayload),
}

impl DataPacket {
    const fn type_tag(&self) -> u8 {
        match self {
            Self::Transcript(_) => 0,
            Self::State(_) => 1,
            Self::Error(_) => 2,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Wire<T> {
    #[serde(rename = "type")]
    kind: u8,
    data: T,
}

impl Serialize for DataPacket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let kind = self.type_tag();
        match self {
            Self::Transcript(data) => Wire { kind, data }.serialize(serializer),
            Self::State(data) => Wire { kind, data }.serialize(serializer),
            Self::Error(data) => Wire { kind, data }.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for DataPacket {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Wire::<serde_json::Value>::deserialize(deserializer)?;
        match raw.kind {
            0 => Ok(Self::Transcript(
                serde_json::from_value(raw.data).map_err(D::Error::custom)?,
            )),
            1 => Ok(Self::State(serde_json::from_value(raw.data).map_err(D::Error::custom)?)),
            2 => Ok(Self::Error(serde_json::from_value(raw.data).map_err(D::Error::custom)?)),
            other => Err(D::Error::custom(format!("unknown data packet type {other}"))),
        }
    }
}

/// Emitted for every interim and final recognizer result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptPayload {
    /// The speaking participant's SFU session id.
    pub sid: String,
    pub name: String,
    pub text: String,
    pub is_final: bool,
}

/// The agent's lifecycle state, mirrored to the UI so it can animate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr, TS)]
#[ts(export)]
#[repr(u8)]
pub enum UiState {
    Idle = 0,
    Loading = 1,
    Speaking = 2,
    Active = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StatePayload {
    pub state: UiState,
}

/// A user-visible diagnostic describing a failed subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ErrorPayload {
    pub message: String,
}

impl DataPacket {
    #[must_use]
    pub fn transcript(sid: impl Into<String>, name: impl Into<String>, text: impl Into<String>, is_final: bool) -> Self {
        Self::Transcript(TranscriptPayload { sid: sid.into(), name: name.into(), text: text.into(), is_final })
    }

    #[must_use]
    pub const fn state(state: UiState) -> Self {
        Self::State(StatePayload { state })
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload { message: message.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_wire_shape() {
        let packet = DataPacket::transcript("sid-1", "Alice", "hello", true);
        let json = serde_json::to_value(&packet).expect("serializes");
        assert_eq!(json["type"], 0);
        assert_eq!(json["data"]["sid"], "sid-1");
        assert_eq!(json["data"]["isFinal"], true);
    }

    #[test]
    fn state_wire_shape_and_roundtrip() {
        let packet = DataPacket::state(UiState::Speaking);
        let json = serde_json::to_value(&packet).expect("serializes");
        assert_eq!(json["type"], 1);
        assert_eq!(json["data"]["state"], 2);

        let back: DataPacket = serde_json::from_value(json).expect("deserializes");
        assert_eq!(back, packet);
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let raw = serde_json::json!({ "type": 9, "data": {} });
        let result: Result<DataPacket, _> = serde_json::from_value(raw);
        assert!(result.is_err());
    }
}
