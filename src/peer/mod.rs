//! Media session over a single [`RtcPeerConnection`].

mod candidate_buffer;
pub mod sdp;

use std::{
    cell::{Cell, RefCell},
    future::Future,
    rc::Rc,
};

use async_trait::async_trait;
use derive_more::Display;
use futures::{
    channel::mpsc,
    future::{self, Either},
    lock::Mutex,
    stream::LocalBoxStream,
    StreamExt as _,
};
use huddle_client_api_proto::{
    IceCandidate, ServerSessionDescription, SessionDescription,
};
use medea_macro::dispatchable;
use medea_reactive::ObservableCell;
use tracerr::Traced;

use crate::platform::{
    self, DataChannel, GetUserMediaError, IceGatheringState, MediaStreamTrack,
    PeerConnectionEvent, PeerConnectionFactory, PeerConnectionState,
    RtcConfiguration, RtcPeerConnection, RtcPeerConnectionError, SdpType,
};

#[doc(inline)]
pub use self::candidate_buffer::{CandidateBuffer, CandidateSink};

#[cfg(any(test, feature = "mockable"))]
#[doc(inline)]
pub use self::candidate_buffer::MockCandidateSink;

/// Errors of local media acquisition.
#[derive(Clone, Debug, Display)]
pub enum MediaAcquisitionError {
    /// Host failed to capture local media.
    #[display(fmt = "{}", _0)]
    GetUserMedia(GetUserMediaError),

    /// Captured track could not be attached to the connection.
    #[display(fmt = "{}", _0)]
    AttachTrack(RtcPeerConnectionError),
}

impl From<GetUserMediaError> for MediaAcquisitionError {
    #[inline]
    fn from(err: GetUserMediaError) -> Self {
        Self::GetUserMedia(err)
    }
}

impl From<RtcPeerConnectionError> for MediaAcquisitionError {
    #[inline]
    fn from(err: RtcPeerConnectionError) -> Self {
        Self::AttachTrack(err)
    }
}

/// Errors of [`MediaSession`] operations.
#[derive(Clone, Debug, Display)]
pub enum MediaSessionError {
    /// Remote candidate arrived before the remote description was set.
    #[display(fmt = "remote description is not set yet")]
    NotReady,

    /// `Server` offer has invalid `type` or `sdp`.
    #[display(fmt = "malformed server offer: {}", _0)]
    MalformedOffer(String),

    /// Local media could not be acquired or attached.
    #[display(fmt = "failed to acquire local media: {}", _0)]
    MediaAcquisition(MediaAcquisitionError),

    /// [`MediaSession`] has been closed.
    #[display(fmt = "media session is closed")]
    Closed,

    /// Offer was requested while no negotiation is needed.
    #[display(fmt = "negotiation is not needed")]
    NegotiationNotNeeded,

    /// Underlying [`RtcPeerConnection`] failed an operation.
    #[display(fmt = "{}", _0)]
    Platform(RtcPeerConnectionError),
}

impl From<MediaAcquisitionError> for MediaSessionError {
    #[inline]
    fn from(err: MediaAcquisitionError) -> Self {
        Self::MediaAcquisition(err)
    }
}

impl From<RtcPeerConnectionError> for MediaSessionError {
    #[inline]
    fn from(err: RtcPeerConnectionError) -> Self {
        Self::Platform(err)
    }
}

type Result<T> = std::result::Result<T, Traced<MediaSessionError>>;

/// Events emitted from [`MediaSession`].
#[dispatchable(self: &Self, async_trait(?Send))]
#[derive(Clone, Debug, PartialEq)]
pub enum MediaSessionEvent {
    /// Local [`IceCandidate`] has been discovered.
    IceCandidateDiscovered {
        /// Discovered candidate.
        candidate: IceCandidate,
    },

    /// [`IceGatheringState`] has changed.
    IceGatheringStateChanged {
        /// New state.
        state: IceGatheringState,
    },

    /// [`PeerConnectionState`] has changed.
    ConnectionStateChanged {
        /// New state.
        state: PeerConnectionState,
    },

    /// Remote track has been received.
    TrackReceived {
        /// Received track.
        track: MediaStreamTrack,

        /// ID of the remote stream the track belongs to.
        stream_id: String,
    },

    /// Remote side opened a [`DataChannel`].
    DataChannelOpened {
        /// Label of the opened channel.
        label: String,
    },

    /// Message has been received on some [`DataChannel`].
    DataChannelMessage {
        /// Label of the channel.
        label: String,

        /// Received message.
        data: String,
    },

    /// Connection requires a new offer/answer round.
    NegotiationNeeded,
}

/// Track received from the remote side.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteTrack {
    /// Received track.
    pub track: MediaStreamTrack,

    /// ID of the remote stream the track belongs to.
    pub stream_id: String,
}

struct InnerMediaSession {
    /// Underlying [`RtcPeerConnection`].
    peer: Rc<dyn RtcPeerConnection>,

    /// Local tracks attached at creation, in attachment order.
    local_tracks: Vec<MediaStreamTrack>,

    remote_tracks: RefCell<Vec<RemoteTrack>>,

    data_channels: RefCell<Vec<DataChannel>>,

    /// Last applied local description.
    local_description: RefCell<Option<SessionDescription>>,

    /// Last applied remote description.
    remote_description: RefCell<Option<SessionDescription>>,

    connection_state: ObservableCell<PeerConnectionState>,

    ice_gathering_state: ObservableCell<IceGatheringState>,

    /// Count of `negotiationneeded` events not consumed by an offer yet.
    negotiation_needed: Cell<usize>,

    is_closed: ObservableCell<bool>,

    /// Subscribers of [`MediaSessionEvent`]s.
    subscribers: RefCell<Vec<mpsc::UnboundedSender<MediaSessionEvent>>>,

    /// Serializes SDP offer/answer rounds.
    sdp_lock: Mutex<()>,
}

/// One negotiation lifecycle over a single [`RtcPeerConnection`].
///
/// Every state change reported by the host is recorded synchronously and
/// then emitted as a [`MediaSessionEvent`] to all the subscribers.
pub struct MediaSession(Rc<InnerMediaSession>);

impl MediaSession {
    /// Creates a new [`RtcPeerConnection`] and attaches every one of the
    /// given `local_tracks` to it.
    ///
    /// # Errors
    ///
    /// - With [`MediaSessionError::Platform`] if connection cannot be created.
    /// - With [`MediaSessionError::MediaAcquisition`] if some track cannot be
    ///   attached. The half-built connection is closed then.
    pub fn create(
        factory: &dyn PeerConnectionFactory,
        config: RtcConfiguration,
        local_tracks: Vec<MediaStreamTrack>,
    ) -> Result<Self> {
        let peer = factory
            .create(config)
            .map_err(tracerr::map_from_and_wrap!())?;

        if let Err(e) = local_tracks.iter().try_for_each(|t| peer.add_track(t))
        {
            peer.close();
            let e: Traced<MediaAcquisitionError> =
                tracerr::map_from_and_new!(e);
            return Err(tracerr::map_from_and_new!(e));
        }

        let inner = Rc::new(InnerMediaSession {
            peer: Rc::clone(&peer),
            local_tracks,
            remote_tracks: RefCell::default(),
            data_channels: RefCell::default(),
            local_description: RefCell::default(),
            remote_description: RefCell::default(),
            connection_state: ObservableCell::new(PeerConnectionState::New),
            ice_gathering_state: ObservableCell::new(IceGatheringState::New),
            negotiation_needed: Cell::new(0),
            is_closed: ObservableCell::new(false),
            subscribers: RefCell::default(),
            sdp_lock: Mutex::new(()),
        });

        let weak_inner = Rc::downgrade(&inner);
        peer.on_event(Some(Box::new(move |event| {
            if let Some(inner) = weak_inner.upgrade() {
                inner.on_platform_event(event);
            }
        })));

        Ok(Self(inner))
    }

    /// Returns [`Stream`] of all the [`MediaSessionEvent`]s of this
    /// [`MediaSession`].
    ///
    /// [`Stream`] ends once this [`MediaSession`] is closed, and yields
    /// nothing emitted before the subscription.
    ///
    /// [`Stream`]: futures::Stream
    pub fn subscribe(&self) -> LocalBoxStream<'static, MediaSessionEvent> {
        let (tx, rx) = mpsc::unbounded();
        if !self.is_closed() {
            self.0.subscribers.borrow_mut().push(tx);
        }
        let weak_inner = Rc::downgrade(&self.0);
        Box::pin(rx.take_while(move |_| {
            future::ready(
                weak_inner.upgrade().map_or(false, |inner| !inner.closed()),
            )
        }))
    }

    /// Generates a new SDP offer and sets it as local description.
    ///
    /// Valid in [`PeerConnectionState::New`] or after
    /// [`MediaSessionEvent::NegotiationNeeded`] fired and hasn't been
    /// consumed by another offer yet.
    ///
    /// # Errors
    ///
    /// - With [`MediaSessionError::NegotiationNotNeeded`] if called outside
    ///   its valid states.
    /// - With [`MediaSessionError::Platform`] if SDP operation fails.
    /// - With [`MediaSessionError::Closed`] if [`MediaSession`] is closed
    ///   before or during this call.
    pub async fn create_offer(&self) -> Result<SessionDescription> {
        let inner = Rc::clone(&self.0);
        self.run_guarded(async move {
            let _round = inner.sdp_lock.lock().await;
            inner.ensure_open()?;

            let pending = inner.negotiation_needed.get();
            if pending == 0
                && inner.connection_state.get() != PeerConnectionState::New
            {
                return Err(tracerr::new!(
                    MediaSessionError::NegotiationNotNeeded
                ));
            }
            let consumed = pending > 0;
            if consumed {
                inner.negotiation_needed.set(pending - 1);
            }

            let offer = inner.make_local_offer().await;
            if offer.is_err() && consumed && !inner.closed() {
                // Failed round doesn't consume the event.
                inner
                    .negotiation_needed
                    .set(inner.negotiation_needed.get() + 1);
            }
            offer
        })
        .await
    }

    /// Validates the given `Server` offer, sets it as remote description,
    /// then creates an answer and sets it as local description.
    ///
    /// # Errors
    ///
    /// - With [`MediaSessionError::MalformedOffer`] if offer `type` or `sdp`
    ///   is invalid.
    /// - With [`MediaSessionError::Platform`] if SDP operation fails.
    /// - With [`MediaSessionError::Closed`] if [`MediaSession`] is closed
    ///   before or during this call.
    pub async fn accept_offer_and_answer(
        &self,
        offer: ServerSessionDescription,
    ) -> Result<SessionDescription> {
        self.0.ensure_open()?;
        let offer = sdp::parse_server_offer(offer)
            .map_err(MediaSessionError::MalformedOffer)
            .map_err(tracerr::wrap!())?;

        let inner = Rc::clone(&self.0);
        self.run_guarded(async move {
            let _round = inner.sdp_lock.lock().await;
            inner.ensure_open()?;

            inner
                .peer
                .set_remote_description(SdpType::Offer(offer.clone()))
                .await
                .map_err(tracerr::map_from_and_wrap!())?;
            inner.ensure_open()?;
            inner
                .remote_description
                .replace(Some(SessionDescription::offer(offer)));

            let answer = inner
                .peer
                .create_answer()
                .await
                .map_err(tracerr::map_from_and_wrap!())?;
            inner.ensure_open()?;
            inner
                .peer
                .set_local_description(SdpType::Answer(answer.clone()))
                .await
                .map_err(tracerr::map_from_and_wrap!())?;
            inner.ensure_open()?;

            let answer = SessionDescription::answer(answer);
            inner.local_description.replace(Some(answer.clone()));
            Ok(answer)
        })
        .await
    }

    /// Sets the given SDP `answer` as remote description, completing a
    /// round started with [`MediaSession::create_offer`].
    ///
    /// # Errors
    ///
    /// - With [`MediaSessionError::Platform`] if SDP operation fails.
    /// - With [`MediaSessionError::Closed`] if [`MediaSession`] is closed
    ///   before or during this call.
    pub async fn apply_remote_answer(&self, answer: String) -> Result<()> {
        let inner = Rc::clone(&self.0);
        self.run_guarded(async move {
            let _round = inner.sdp_lock.lock().await;
            inner.ensure_open()?;

            inner
                .peer
                .set_remote_description(SdpType::Answer(answer.clone()))
                .await
                .map_err(tracerr::map_from_and_wrap!())?;
            inner.ensure_open()?;
            inner
                .remote_description
                .replace(Some(SessionDescription::answer(answer)));
            Ok(())
        })
        .await
    }

    /// Applies the given remote [`IceCandidate`].
    ///
    /// # Errors
    ///
    /// - With [`MediaSessionError::NotReady`] if no remote description is set
    ///   yet.
    /// - With [`MediaSessionError::Platform`] if the host rejects candidate.
    /// - With [`MediaSessionError::Closed`] if [`MediaSession`] is closed
    ///   before or during this call.
    pub async fn apply_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.0.ensure_open()?;
        if !self.has_remote_description() {
            return Err(tracerr::new!(MediaSessionError::NotReady));
        }

        let inner = Rc::clone(&self.0);
        self.run_guarded(async move {
            inner
                .peer
                .add_ice_candidate(candidate)
                .await
                .map_err(tracerr::map_from_and_wrap!())
        })
        .await
    }

    /// Closes this [`MediaSession`] and releases the underlying
    /// [`RtcPeerConnection`].
    ///
    /// Pending operations resolve with [`MediaSessionError::Closed`] and no
    /// [`MediaSessionEvent`]s are emitted afterwards. Idempotent.
    pub fn close(&self) {
        self.0.close();
    }

    /// Indicates whether this [`MediaSession`] is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.closed()
    }

    /// Returns the current [`PeerConnectionState`].
    #[inline]
    #[must_use]
    pub fn connection_state(&self) -> PeerConnectionState {
        self.0.connection_state.get()
    }

    /// Returns [`Stream`] of [`PeerConnectionState`] updates, starting with
    /// the current one.
    ///
    /// [`Stream`]: futures::Stream
    #[inline]
    pub fn on_connection_state(
        &self,
    ) -> LocalBoxStream<'static, PeerConnectionState> {
        self.0.connection_state.subscribe()
    }

    /// Returns the current [`IceGatheringState`].
    #[inline]
    #[must_use]
    pub fn ice_gathering_state(&self) -> IceGatheringState {
        self.0.ice_gathering_state.get()
    }

    /// Returns the last applied local description.
    #[inline]
    #[must_use]
    pub fn local_description(&self) -> Option<SessionDescription> {
        self.0.local_description.borrow().clone()
    }

    /// Returns the last applied remote description.
    #[inline]
    #[must_use]
    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.0.remote_description.borrow().clone()
    }

    /// Indicates whether remote candidates can be applied already.
    #[inline]
    #[must_use]
    pub fn has_remote_description(&self) -> bool {
        self.0.remote_description.borrow().is_some()
    }

    /// Returns local tracks in attachment order.
    #[inline]
    #[must_use]
    pub fn local_tracks(&self) -> &[MediaStreamTrack] {
        &self.0.local_tracks
    }

    /// Returns all the [`RemoteTrack`]s received so far.
    #[inline]
    #[must_use]
    pub fn remote_tracks(&self) -> Vec<RemoteTrack> {
        self.0.remote_tracks.borrow().clone()
    }

    /// Returns all the [`DataChannel`]s opened by the remote side so far.
    #[inline]
    #[must_use]
    pub fn data_channels(&self) -> Vec<DataChannel> {
        self.0.data_channels.borrow().clone()
    }

    /// Runs the given operation until it completes or this [`MediaSession`]
    /// is closed, whichever happens first.
    async fn run_guarded<F, T>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.0.ensure_open()?;
        let closed = self.0.is_closed.when_eq(true);
        match future::select(Box::pin(op), closed).await {
            Either::Left((res, _)) => res,
            Either::Right(_) => Err(tracerr::new!(MediaSessionError::Closed)),
        }
    }
}

#[async_trait(?Send)]
impl CandidateSink for MediaSession {
    #[inline]
    async fn apply_candidate(&self, candidate: IceCandidate) -> Result<()> {
        MediaSession::apply_candidate(self, candidate).await
    }
}

impl InnerMediaSession {
    #[inline]
    fn closed(&self) -> bool {
        self.is_closed.get()
    }

    /// Errors with [`MediaSessionError::Closed`] if closed.
    fn ensure_open(&self) -> Result<()> {
        if self.closed() {
            return Err(tracerr::new!(MediaSessionError::Closed));
        }
        Ok(())
    }

    /// Creates an SDP offer and sets it as local description.
    async fn make_local_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer
            .create_offer()
            .await
            .map_err(tracerr::map_from_and_wrap!())?;
        self.ensure_open()?;
        self.peer
            .set_local_description(SdpType::Offer(offer.clone()))
            .await
            .map_err(tracerr::map_from_and_wrap!())?;
        self.ensure_open()?;

        let offer = SessionDescription::offer(offer);
        self.local_description.replace(Some(offer.clone()));
        Ok(offer)
    }

    /// Sends the given `event` to all the alive subscribers.
    fn emit(&self, event: MediaSessionEvent) {
        self.subscribers
            .borrow_mut()
            .retain(|sub| sub.unbounded_send(event.clone()).is_ok());
    }

    /// Records the given host `event` and emits the matching
    /// [`MediaSessionEvent`].
    fn on_platform_event(&self, event: PeerConnectionEvent) {
        if self.closed() {
            return;
        }
        match event {
            PeerConnectionEvent::IceCandidate(candidate) => {
                self.emit(MediaSessionEvent::IceCandidateDiscovered {
                    candidate,
                });
            }
            PeerConnectionEvent::IceGatheringStateChange(state) => {
                self.on_ice_gathering_state(state);
            }
            PeerConnectionEvent::ConnectionStateChange(state) => {
                self.on_connection_state(state);
            }
            PeerConnectionEvent::Track { track, stream_id } => {
                self.remote_tracks.borrow_mut().push(RemoteTrack {
                    track: track.clone(),
                    stream_id: stream_id.clone(),
                });
                self.emit(MediaSessionEvent::TrackReceived {
                    track,
                    stream_id,
                });
            }
            PeerConnectionEvent::DataChannel(channel) => {
                let label = channel.label.clone();
                self.data_channels.borrow_mut().push(channel);
                self.emit(MediaSessionEvent::DataChannelOpened { label });
            }
            PeerConnectionEvent::DataChannelMessage { label, data } => {
                self.emit(MediaSessionEvent::DataChannelMessage {
                    label,
                    data,
                });
            }
            PeerConnectionEvent::NegotiationNeeded => {
                self.negotiation_needed
                    .set(self.negotiation_needed.get() + 1);
                self.emit(MediaSessionEvent::NegotiationNeeded);
            }
        }
    }

    /// Records a new [`IceGatheringState`].
    ///
    /// Gathering never goes backwards within a round, though a new round may
    /// restart it from `complete` at `gathering`.
    fn on_ice_gathering_state(&self, state: IceGatheringState) {
        let current = self.ice_gathering_state.get();
        if state == current {
            return;
        }
        let is_restart = current == IceGatheringState::Complete
            && state == IceGatheringState::Gathering;
        if state < current && !is_restart {
            log::warn!(
                "Ignoring ICE gathering state change: {} -> {}",
                current,
                state,
            );
            return;
        }
        self.ice_gathering_state.set(state);
        self.emit(MediaSessionEvent::IceGatheringStateChanged { state });
    }

    /// Records a new [`PeerConnectionState`], unless the current one is
    /// terminal.
    fn on_connection_state(&self, state: PeerConnectionState) {
        let current = self.connection_state.get();
        if state == current || current.is_terminal() {
            return;
        }
        if !current.can_transit_to(state) {
            log::warn!("Unexpected connection state: {} -> {}", current, state);
        }
        self.connection_state.set(state);
        self.emit(MediaSessionEvent::ConnectionStateChanged { state });
    }

    fn close(&self) {
        if self.closed() {
            return;
        }
        self.subscribers.borrow_mut().clear();
        self.is_closed.set(true);
        self.connection_state.set(PeerConnectionState::Closed);
        self.peer.on_event(None);
        self.peer.close();
        log::debug!("Media session closed");
    }
}

impl Drop for InnerMediaSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Shortcut for creating a [`MediaSession`] over tracks captured with the
/// given constraints.
///
/// # Errors
///
/// With [`MediaSessionError::MediaAcquisition`] if capture fails, otherwise
/// as [`MediaSession::create`] does.
pub async fn create_with_local_media(
    devices: &dyn platform::MediaDevices,
    factory: &dyn PeerConnectionFactory,
    caps: platform::MediaStreamConstraints,
    config: RtcConfiguration,
) -> Result<MediaSession> {
    let tracks = devices
        .get_user_media(caps)
        .await
        .map_err(tracerr::map_from_and_wrap!(=> MediaAcquisitionError))
        .map_err(tracerr::map_from_and_wrap!())?;
    MediaSession::create(factory, config, tracks)
}
