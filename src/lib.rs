//! Client side of an audio room: WebRTC offer/answer negotiation and ICE
//! candidate trickling against a signaling hub.
//!
//! The host provides the real-time media stack via [`platform`] traits and
//! the hub transport via [`rpc::SignalingPort`], while this crate drives the
//! whole negotiation with [`room::NegotiationCoordinator`].

#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

pub mod conf;
pub mod log;
pub mod peer;
pub mod platform;
pub mod room;
pub mod rpc;
pub mod utils;

#[doc(inline)]
pub use huddle_client_api_proto as proto;

#[doc(inline)]
pub use self::{
    conf::Conf,
    peer::{MediaSession, MediaSessionError, MediaSessionEvent},
    room::{CallState, NegotiationCoordinator, RoomError},
    rpc::{SignalingClient, SignalingError, SignalingPort},
};
