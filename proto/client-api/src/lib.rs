//! Client API protocol of the Huddle signaling hub.
//!
//! The hub is an RPC channel with named methods invoked by the `Client` and
//! named events pushed by the `Server`. This crate describes both directions:
//!
//! - [`Command`]: invocation sent by `Client`, with its hub method name
//!   ([`Command::method`]) and positional arguments
//!   ([`Command::arguments`]);
//! - [`Event`]: notification pushed by `Server`, decoded from its hub name and
//!   JSON payload with [`Event::parse`].
//!
//! # Wire conventions
//!
//! - Roster payloads ([`User`], [`Room`]) use `PascalCase` keys and may be
//!   delivered as JSON-encoded strings.
//! - [`IceCandidate`]s follow the [RTCIceCandidateInit][1] dictionary.
//! - [`SdpType`]s are sent as the numeric codes of the `Server`'s SDP type
//!   enumeration. Inbound offers also accept the [RTCSdpType][2] string form.
//!
//! [1]: https://w3.org/TR/webrtc/#dom-rtcicecandidateinit
//! [2]: https://w3.org/TR/webrtc/#dom-rtcsdptype

#![deny(broken_intra_doc_links)]
#![forbid(unsafe_code)]

use derive_more::{Display, From};
use medea_macro::dispatchable;
use serde::{
    de::{DeserializeOwned, Error as _},
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::Value;

/// ID of `Room`.
#[derive(
    Clone, Debug, Deserialize, Display, Eq, From, Hash, PartialEq, Serialize,
)]
#[from(forward)]
pub struct RoomId(pub String);

/// ID of `User`.
#[derive(
    Clone, Debug, Deserialize, Display, Eq, From, Hash, PartialEq, Serialize,
)]
#[from(forward)]
pub struct UserId(pub String);

/// ID of the hub connection a `User` is bound to.
#[derive(
    Clone, Debug, Deserialize, Display, Eq, From, Hash, PartialEq, Serialize,
)]
#[from(forward)]
pub struct ConnectionId(pub String);

/// Type of [SDP] message, as enumerated by the `Server`.
///
/// Serialized as the `Server`'s numeric code.
///
/// [SDP]: https://tools.ietf.org/html/rfc4566
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum SdpType {
    /// [SDP answer][1].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype-answer
    #[display(fmt = "answer")]
    Answer,

    /// [SDP offer][1].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype-offer
    #[display(fmt = "offer")]
    Offer,

    /// [Provisional SDP answer][1].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype-pranswer
    #[display(fmt = "pranswer")]
    PrAnswer,

    /// [SDP rollback][1].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype-rollback
    #[display(fmt = "rollback")]
    Rollback,
}

impl SdpType {
    /// Returns numeric code of this [`SdpType`] on the wire.
    #[inline]
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Answer => 0,
            Self::Offer => 1,
            Self::PrAnswer => 2,
            Self::Rollback => 3,
        }
    }

    /// Resolves [`SdpType`] from its numeric wire code.
    #[must_use]
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Answer),
            1 => Some(Self::Offer),
            2 => Some(Self::PrAnswer),
            3 => Some(Self::Rollback),
            _ => None,
        }
    }

    /// Resolves [`SdpType`] from its [RTCSdpType][1] name.
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "answer" => Some(Self::Answer),
            "offer" => Some(Self::Offer),
            "pranswer" => Some(Self::PrAnswer),
            "rollback" => Some(Self::Rollback),
            _ => None,
        }
    }
}

impl Serialize for SdpType {
    #[inline]
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for SdpType {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let raw = RawSdpType::deserialize(deserializer)?;
        raw.resolve().ok_or_else(|| {
            D::Error::custom(format!("unknown SDP type: {}", raw))
        })
    }
}

/// [`SdpType`] exactly as it was received, before being resolved.
#[derive(Clone, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawSdpType {
    /// Numeric code of the `Server`'s SDP type enumeration.
    Code(u64),

    /// [RTCSdpType][1] name.
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype
    Name(String),
}

impl RawSdpType {
    /// Resolves this [`RawSdpType`] into a known [`SdpType`], if any.
    #[must_use]
    pub fn resolve(&self) -> Option<SdpType> {
        match self {
            Self::Code(code) => SdpType::from_code(*code),
            Self::Name(name) => SdpType::from_name(name),
        }
    }
}

/// Complete session description sent by `Client`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SessionDescription {
    /// [SDP] body.
    ///
    /// [SDP]: https://tools.ietf.org/html/rfc4566
    pub sdp: String,

    /// Type of this description.
    #[serde(rename = "type")]
    pub kind: SdpType,
}

impl SessionDescription {
    /// Builds a new [`SdpType::Offer`] description.
    #[inline]
    #[must_use]
    pub fn offer(sdp: String) -> Self {
        Self {
            sdp,
            kind: SdpType::Offer,
        }
    }

    /// Builds a new [`SdpType::Answer`] description.
    #[inline]
    #[must_use]
    pub fn answer(sdp: String) -> Self {
        Self {
            sdp,
            kind: SdpType::Answer,
        }
    }
}

/// Session description as authored by `Server`.
///
/// Both fields are optional on the wire: the `Server` usually omits `type`
/// for its initial offer. Validation is left to the `Client`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ServerSessionDescription {
    /// [SDP] body, if any.
    ///
    /// [SDP]: https://tools.ietf.org/html/rfc4566
    #[serde(default)]
    pub sdp: Option<String>,

    /// Type of this description, if any.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<RawSdpType>,
}

/// Representation of [RTCIceCandidateInit][1].
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcicecandidateinit
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// [`candidate` field][1] of the discovered [RTCIceCandidate][2].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcicecandidate-candidate
    /// [2]: https://w3.org/TR/webrtc/#dom-rtcicecandidate
    pub candidate: String,

    /// [`sdpMLineIndex` field][1] of the discovered [RTCIceCandidate][2].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcicecandidate-sdpmlineindex
    /// [2]: https://w3.org/TR/webrtc/#dom-rtcicecandidate
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,

    /// [`sdpMid` field][1] of the discovered [RTCIceCandidate][2].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcicecandidate-sdpmid
    /// [2]: https://w3.org/TR/webrtc/#dom-rtcicecandidate
    #[serde(default)]
    pub sdp_mid: Option<String>,

    /// [`usernameFragment` field][1] of the discovered [RTCIceCandidate][2].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcicecandidate-usernamefragment
    /// [2]: https://w3.org/TR/webrtc/#dom-rtcicecandidate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// `User` registered on the hub.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    /// ID of this `User`.
    pub id: UserId,

    /// Display name of this `User`.
    pub username: String,

    /// Hub connection of this `User`.
    pub connection_id: ConnectionId,

    /// Indicator whether this `User` takes part in a call.
    #[serde(default, rename = "IsInCall")]
    pub in_call: bool,

    /// `Room` this `User` is a member of.
    #[serde(default)]
    pub room_id: Option<RoomId>,
}

/// `Room` existing on the hub.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Room {
    /// ID of this `Room`.
    pub id: RoomId,

    /// Display name of this `Room`.
    pub name: String,

    /// Members of this `Room`.
    #[serde(default)]
    pub user_ids: Vec<UserId>,
}

/// Invocation sent by `Client` to `Server`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// Registers a new `User` with the given name.
    CreateUser {
        /// Display name of the new `User`.
        username: String,
    },

    /// Creates a new `Room` with the given name.
    CreateRoom {
        /// Display name of the new `Room`.
        name: String,
    },

    /// Request of `Client` to join `Room`.
    JoinRoom {
        /// ID of the `Room` to join.
        room_id: RoomId,
    },

    /// Request of `Client` to leave `Room`.
    LeaveRoom {
        /// ID of the `Room` to leave.
        room_id: RoomId,
    },

    /// Request for the `Server`-authored SDP offer of the joined `Room`.
    ///
    /// Answered with a [`ServerSessionDescription`].
    GetServerOffer,

    /// Delivers SDP answer of `Client` to `Server`.
    SetRemoteDescription(SessionDescription),

    /// Trickles one local [`IceCandidate`] to `Server`.
    AddIceCandidate(IceCandidate),

    /// Delivers SDP offer of a `Client`-initiated renegotiation.
    ///
    /// `Server` may answer with a [`SessionDescription`] of
    /// [`SdpType::Answer`].
    Renegotiate(SessionDescription),
}

impl Command {
    /// Returns the hub method name this [`Command`] is invoked with.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::CreateUser { .. } => "CreateUser",
            Self::CreateRoom { .. } => "CreateRoom",
            Self::JoinRoom { .. } => "JoinRoom",
            Self::LeaveRoom { .. } => "LeaveRoom",
            Self::GetServerOffer => "GetServerOffer",
            Self::SetRemoteDescription(_) => "SetRemoteDescription",
            Self::AddIceCandidate(_) => "AddIceCandidate",
            Self::Renegotiate(_) => "Renegotiate",
        }
    }

    /// Returns positional hub arguments of this [`Command`].
    ///
    /// # Errors
    ///
    /// If any argument fails to serialize.
    pub fn arguments(&self) -> Result<Vec<Value>, serde_json::Error> {
        Ok(match self {
            Self::CreateUser { username } => {
                vec![Value::String(username.clone())]
            }
            Self::CreateRoom { name } => vec![Value::String(name.clone())],
            Self::JoinRoom { room_id } | Self::LeaveRoom { room_id } => {
                vec![Value::String(room_id.0.clone())]
            }
            Self::GetServerOffer => Vec::new(),
            Self::SetRemoteDescription(desc) | Self::Renegotiate(desc) => {
                vec![serde_json::to_value(desc)?]
            }
            Self::AddIceCandidate(candidate) => {
                vec![serde_json::to_value(candidate)?]
            }
        })
    }
}

/// Notification pushed by `Server` to `Client`.
#[dispatchable(self: &Self, async_trait(?Send))]
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Snapshot of all the `Room`s.
    UpdateRooms {
        /// Every `Room` known to `Server`.
        rooms: Vec<Room>,
    },

    /// Snapshot of all the `User`s.
    UpdateUsers {
        /// Every `User` known to `Server`.
        users: Vec<User>,
    },

    /// `User` of this `Client` has been registered.
    UserCreated {
        /// Registered `User`.
        user: User,
    },

    /// Some `User` disconnected from the hub.
    UserExited {
        /// Raw notification payload.
        data: Value,
    },

    /// Some `User` left a `Room`.
    UserExitedRoom {
        /// Raw notification payload.
        data: Value,
    },

    /// `Client` left a `Room`.
    ExitedRoom {
        /// Raw notification payload.
        data: Value,
    },

    /// `Client` joined a `Room`.
    JoinedRoom {
        /// Raw notification payload.
        data: Value,
    },

    /// Some `User` joined a `Room`.
    UserJoinedRoom {
        /// Raw notification payload.
        data: Value,
    },

    /// `Server` discovered a new [`IceCandidate`].
    IceCandidateResult {
        /// Discovered remote [`IceCandidate`].
        candidate: IceCandidate,
    },
}

/// Error of decoding a pushed [`Event`].
#[derive(Debug, Display)]
pub enum ParseEventError {
    /// Hub event name is not known.
    #[display(fmt = "unknown event: {}", _0)]
    UnknownEvent(String),

    /// Payload is not valid for the named event.
    #[display(fmt = "malformed `{}` payload: {}", _0, _1)]
    Payload(&'static str, serde_json::Error),
}

impl std::error::Error for ParseEventError {}

impl Event {
    /// Decodes an [`Event`] from its hub name and JSON payload.
    ///
    /// `Server` pushes roster snapshots as JSON-encoded strings, so string
    /// payloads are decoded once more before use.
    ///
    /// # Errors
    ///
    /// With [`ParseEventError::UnknownEvent`] if `name` is not known, or with
    /// [`ParseEventError::Payload`] if `payload` doesn't match it.
    pub fn parse(name: &str, payload: Value) -> Result<Self, ParseEventError> {
        Ok(match name {
            "UpdateRooms" => Self::UpdateRooms {
                rooms: decode("UpdateRooms", payload)?,
            },
            "UpdateUsers" => Self::UpdateUsers {
                users: decode("UpdateUsers", payload)?,
            },
            "UserCreated" => Self::UserCreated {
                user: decode("UserCreated", payload)?,
            },
            "UserExited" => Self::UserExited { data: payload },
            "UserExitedRoom" => Self::UserExitedRoom { data: payload },
            "ExitedRoom" => Self::ExitedRoom { data: payload },
            "JoinedRoom" => Self::JoinedRoom { data: payload },
            "UserJoinedRoom" => Self::UserJoinedRoom { data: payload },
            "IceCandidateResult" => Self::IceCandidateResult {
                candidate: decode("IceCandidateResult", payload)?,
            },
            _ => return Err(ParseEventError::UnknownEvent(name.to_owned())),
        })
    }

    /// Returns the hub name of this [`Event`].
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateRooms { .. } => "UpdateRooms",
            Self::UpdateUsers { .. } => "UpdateUsers",
            Self::UserCreated { .. } => "UserCreated",
            Self::UserExited { .. } => "UserExited",
            Self::UserExitedRoom { .. } => "UserExitedRoom",
            Self::ExitedRoom { .. } => "ExitedRoom",
            Self::JoinedRoom { .. } => "JoinedRoom",
            Self::UserJoinedRoom { .. } => "UserJoinedRoom",
            Self::IceCandidateResult { .. } => "IceCandidateResult",
        }
    }
}

/// Decodes `payload` as `T`, unwrapping one level of JSON-in-string encoding.
fn decode<T: DeserializeOwned>(
    event: &'static str,
    payload: Value,
) -> Result<T, ParseEventError> {
    match payload {
        Value::String(encoded) => serde_json::from_str(&encoded),
        payload => serde_json::from_value(payload),
    }
    .map_err(|e| ParseEventError::Payload(event, e))
}

#[cfg(test)]
mod sdp_type_spec {
    use serde_json::json;

    use super::*;

    #[test]
    fn answer_is_sent_as_zero() {
        let desc = SessionDescription::answer("Y".to_owned());

        assert_eq!(
            serde_json::to_value(&desc).unwrap(),
            json!({"sdp": "Y", "type": 0}),
        );
    }

    #[test]
    fn server_offer_type_is_optional() {
        let desc: ServerSessionDescription =
            serde_json::from_value(json!({"sdp": "v=0"})).unwrap();

        assert_eq!(desc.sdp.as_deref(), Some("v=0"));
        assert_eq!(desc.kind, None);
    }

    #[test]
    fn server_offer_type_keeps_raw_form() {
        let named: ServerSessionDescription =
            serde_json::from_value(json!({"sdp": "v=0", "type": "answer"}))
                .unwrap();
        let coded: ServerSessionDescription =
            serde_json::from_value(json!({"sdp": "v=0", "type": 1})).unwrap();

        assert_eq!(named.kind, Some(RawSdpType::Name("answer".to_owned())));
        assert_eq!(named.kind.unwrap().resolve(), Some(SdpType::Answer));
        assert_eq!(coded.kind.unwrap().resolve(), Some(SdpType::Offer));
    }

    #[test]
    fn rejects_unknown_sdp_type() {
        let res = serde_json::from_value::<SessionDescription>(
            json!({"sdp": "v=0", "type": 7}),
        );

        assert!(res.is_err());
    }
}
