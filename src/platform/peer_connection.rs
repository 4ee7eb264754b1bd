//! Boundary of the host's [RTCPeerConnection][1].
//!
//! [1]: https://w3.org/TR/webrtc/#dom-rtcpeerconnection

use std::rc::Rc;

use async_trait::async_trait;
use derive_more::Display;
use huddle_client_api_proto::IceCandidate;
use tracerr::Traced;

use crate::conf::{Ice, IceServer};

use super::{Error, MediaStreamTrack};

/// Representation of [RTCSdpType] along with the SDP body.
///
/// [RTCSdpType]: https://w3.org/TR/webrtc/#dom-rtcsdptype
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SdpType {
    /// [`offer` type][1] of SDP.
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype-offer
    Offer(String),

    /// [`answer` type][1] of SDP.
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype-answer
    Answer(String),
}

/// [RTCPeerConnectionState][1] representation.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcpeerconnectionstate
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum PeerConnectionState {
    /// At least one of the connection's ICE transports are in the `new`
    /// state, and none of them are in one of the following states:
    /// `connecting`, `checking`, `failed`, or `disconnected`, or all of the
    /// connection's transports are in the `closed` state.
    #[display(fmt = "new")]
    New,

    /// One or more of the ICE transports are currently in the process of
    /// establishing a connection.
    #[display(fmt = "connecting")]
    Connecting,

    /// Every ICE transport used by the connection is either in use (state
    /// `connected` or `completed`) or is closed (state `closed`).
    #[display(fmt = "connected")]
    Connected,

    /// At least one of the ICE transports for the connection is in the
    /// `disconnected` state and none of the other transports are in the state
    /// `failed` or `checking`.
    #[display(fmt = "disconnected")]
    Disconnected,

    /// One or more of the ICE transports on the connection is in the `failed`
    /// state.
    #[display(fmt = "failed")]
    Failed,

    /// The connection has been closed.
    #[display(fmt = "closed")]
    Closed,
}

impl PeerConnectionState {
    /// Indicates whether no transition is possible out of this
    /// [`PeerConnectionState`].
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    /// Indicates whether transition from this [`PeerConnectionState`] into
    /// the `next` one is allowed.
    ///
    /// `disconnected -> connecting` (ICE retry) is allowed, though nothing
    /// reacts to it besides recording.
    #[must_use]
    pub fn can_transit_to(self, next: Self) -> bool {
        use PeerConnectionState as S;

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, S::Closed)
            | (S::New, S::Connecting)
            | (S::Connecting, S::Connected)
            | (S::Connecting, S::Failed)
            | (S::Connected, S::Disconnected)
            | (S::Connected, S::Failed)
            | (S::Disconnected, S::Connecting)
            | (S::Disconnected, S::Connected)
            | (S::Disconnected, S::Failed) => true,
            _ => false,
        }
    }
}

/// [RTCIceGatheringState][1] representation.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcicegatheringstate
#[derive(Clone, Copy, Debug, Display, Eq, Ord, PartialEq, PartialOrd)]
pub enum IceGatheringState {
    /// Nothing has been gathered yet.
    #[display(fmt = "new")]
    New,

    /// ICE agent is gathering candidates.
    #[display(fmt = "gathering")]
    Gathering,

    /// ICE agent has finished gathering candidates.
    #[display(fmt = "complete")]
    Complete,
}

/// [RTCDataChannel][1] opened by the remote side.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcdatachannel
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataChannel {
    /// [Label][1] of this [`DataChannel`].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-datachannel-label
    pub label: String,
}

/// Event fired by [`RtcPeerConnection`].
#[derive(Clone, Debug, PartialEq)]
pub enum PeerConnectionEvent {
    /// [`icecandidate`][1] event with a discovered candidate.
    ///
    /// [1]: https://w3.org/TR/webrtc/#event-icecandidate
    IceCandidate(IceCandidate),

    /// [`icegatheringstatechange`][1] event.
    ///
    /// [1]: https://w3.org/TR/webrtc/#event-icegatheringstatechange
    IceGatheringStateChange(IceGatheringState),

    /// [`connectionstatechange`][1] event.
    ///
    /// [1]: https://w3.org/TR/webrtc/#event-connectionstatechange
    ConnectionStateChange(PeerConnectionState),

    /// [`track`][1] event.
    ///
    /// [1]: https://w3.org/TR/webrtc/#event-track
    Track {
        /// Received remote track.
        track: MediaStreamTrack,

        /// ID of the remote media stream the track belongs to.
        stream_id: String,
    },

    /// [`datachannel`][1] event.
    ///
    /// [1]: https://w3.org/TR/webrtc/#event-datachannel
    DataChannel(DataChannel),

    /// [`message`][1] event of some opened [`DataChannel`].
    ///
    /// [1]: https://w3.org/TR/webrtc/#event-datachannel-message
    DataChannelMessage {
        /// Label of the [`DataChannel`] the message was received on.
        label: String,

        /// Received message.
        data: String,
    },

    /// [`negotiationneeded`][1] event.
    ///
    /// [1]: https://w3.org/TR/webrtc/#event-negotiation
    NegotiationNeeded,
}

/// Handler of [`PeerConnectionEvent`]s, invoked synchronously by the host as
/// soon as an event occurs.
pub type PeerConnectionEventHandler = Box<dyn FnMut(PeerConnectionEvent)>;

/// Errors that may occur during signaling between this and remote
/// [RTCPeerConnection][1].
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcpeerconnection
#[derive(Clone, Debug, Display)]
pub enum RtcPeerConnectionError {
    /// Occurs when cannot add new remote candidate to the
    /// [RTCPeerConnection][1]'s remote description.
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcpeerconnection
    #[display(fmt = "failed to add ICE candidate: {}", _0)]
    AddIceCandidate(Error),

    /// Occurs when a local track cannot be attached.
    #[display(fmt = "failed to add track: {}", _0)]
    AddTrack(Error),

    /// Occurs when cannot obtain [SDP answer][`SdpType::Answer`].
    #[display(fmt = "failed to create SDP answer: {}", _0)]
    CreateAnswer(Error),

    /// Occurs when a new [`RtcPeerConnection`] cannot be created.
    #[display(fmt = "failed to create PeerConnection: {}", _0)]
    CreatePeer(Error),

    /// Occurs when cannot obtain [SDP offer][`SdpType::Offer`].
    #[display(fmt = "failed to create SDP offer: {}", _0)]
    CreateOffer(Error),

    /// Occurs if the local description associated with the
    /// [`RtcPeerConnection`] cannot be changed.
    #[display(fmt = "failed to set local SDP description: {}", _0)]
    SetLocalDescription(Error),

    /// Occurs if the description of the remote end of the
    /// [`RtcPeerConnection`] cannot be changed.
    #[display(fmt = "failed to set remote SDP description: {}", _0)]
    SetRemoteDescription(Error),
}

type Result<T> = std::result::Result<T, Traced<RtcPeerConnectionError>>;

/// Representation of [RTCConfiguration][1].
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcconfiguration
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RtcConfiguration {
    /// [STUN]/[TURN] servers to gather candidates with.
    ///
    /// [STUN]: https://webrtcglossary.com/stun
    /// [TURN]: https://webrtcglossary.com/turn
    pub ice_servers: Vec<IceServer>,

    /// Size of the prefetched ICE candidate pool.
    pub ice_candidate_pool_size: u8,
}

impl From<&Ice> for RtcConfiguration {
    fn from(ice: &Ice) -> Self {
        Self {
            ice_servers: ice.servers.clone(),
            ice_candidate_pool_size: ice.candidate_pool_size,
        }
    }
}

/// Representation of [RTCPeerConnection][1] provided by the host.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcpeerconnection
#[cfg_attr(any(test, feature = "mockable"), mockall::automock)]
#[async_trait(?Send)]
pub trait RtcPeerConnection {
    /// Attaches the given local `track` to this connection.
    ///
    /// # Errors
    ///
    /// With [`RtcPeerConnectionError::AddTrack`] if the host rejects the
    /// track.
    fn add_track(&self, track: &MediaStreamTrack) -> Result<()>;

    /// Obtains a new SDP offer. Doesn't set it as local description.
    ///
    /// # Errors
    ///
    /// With [`RtcPeerConnectionError::CreateOffer`].
    async fn create_offer(&self) -> Result<String>;

    /// Obtains a new SDP answer. Doesn't set it as local description.
    ///
    /// # Errors
    ///
    /// With [`RtcPeerConnectionError::CreateAnswer`].
    async fn create_answer(&self) -> Result<String>;

    /// Sets the provided SDP as local description.
    ///
    /// # Errors
    ///
    /// With [`RtcPeerConnectionError::SetLocalDescription`].
    async fn set_local_description(&self, sdp: SdpType) -> Result<()>;

    /// Sets the provided SDP as remote description.
    ///
    /// # Errors
    ///
    /// With [`RtcPeerConnectionError::SetRemoteDescription`].
    async fn set_remote_description(&self, sdp: SdpType) -> Result<()>;

    /// Adds remote [`IceCandidate`] to this connection.
    ///
    /// # Errors
    ///
    /// With [`RtcPeerConnectionError::AddIceCandidate`].
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Sets the handler receiving every [`PeerConnectionEvent`] of this
    /// connection, replacing the previous one. `None` unsets it.
    fn on_event(&self, handler: Option<PeerConnectionEventHandler>);

    /// Closes this connection, releasing its resources.
    fn close(&self);
}

/// Factory of the host's [`RtcPeerConnection`]s.
#[cfg_attr(any(test, feature = "mockable"), mockall::automock)]
pub trait PeerConnectionFactory {
    /// Creates a new [`RtcPeerConnection`] with the given configuration.
    ///
    /// # Errors
    ///
    /// With [`RtcPeerConnectionError::CreatePeer`].
    fn create(
        &self,
        config: RtcConfiguration,
    ) -> Result<Rc<dyn RtcPeerConnection>>;
}

#[cfg(test)]
mod peer_connection_state_spec {
    use super::PeerConnectionState as S;

    #[test]
    fn terminal_states_are_final() {
        for next in &[S::New, S::Connecting, S::Connected, S::Closed] {
            assert!(!S::Failed.can_transit_to(*next));
            assert!(!S::Closed.can_transit_to(*next));
        }
    }

    #[test]
    fn anything_alive_may_close() {
        for from in &[S::New, S::Connecting, S::Connected, S::Disconnected] {
            assert!(from.can_transit_to(S::Closed));
        }
    }

    #[test]
    fn retry_hop_is_accepted() {
        assert!(S::Disconnected.can_transit_to(S::Connecting));
        assert!(!S::New.can_transit_to(S::Connected));
    }
}
