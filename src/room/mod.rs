//! Orchestration of a [`MediaSession`] against the signaling hub.

mod roster;

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use async_trait::async_trait;
use derive_more::Display;
use futures::{
    channel::mpsc, lock::Mutex, stream::LocalBoxStream, StreamExt as _,
};
use huddle_client_api_proto::{
    Command, EventHandler, IceCandidate, Room, RoomId, SdpType, User,
};
use medea_reactive::ObservableCell;
use serde_json::Value;
use tracerr::Traced;

use crate::{
    conf::Conf,
    peer::{
        self, CandidateBuffer, MediaSession, MediaSessionError,
        MediaSessionEventHandler, RemoteTrack,
    },
    platform::{
        IceGatheringState, MediaDevices, MediaStreamConstraints,
        MediaStreamTrack, PeerConnectionFactory, PeerConnectionState,
        RtcConfiguration,
    },
    rpc::{SignalingClient, SignalingError, SignalingPort},
    utils::{spawn_abortable, TaskHandle},
};

#[doc(inline)]
pub use self::roster::Roster;

/// State of the call as seen by the UI.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CallState {
    /// No call is in progress.
    NotInCall,

    /// Joining the `Room` with the given ID is in progress.
    Joining(RoomId),

    /// Media session with the `Room` with the given ID is negotiated.
    InCall(RoomId),
}

impl CallState {
    /// Returns ID of the `Room` this [`CallState`] relates to, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::NotInCall => None,
            Self::Joining(id) | Self::InCall(id) => Some(id),
        }
    }
}

/// Errors of [`NegotiationCoordinator`] operations.
#[derive(Clone, Debug, Display)]
pub enum RoomError {
    /// [`MediaSession`] operation failed.
    #[display(fmt = "{}", _0)]
    MediaSession(MediaSessionError),

    /// Signaling hub request failed.
    #[display(fmt = "{}", _0)]
    Signaling(SignalingError),

    /// Hub replied to a renegotiation offer with a description which is not
    /// an answer.
    #[display(fmt = "Unexpected `{}` reply to renegotiation", _0)]
    UnexpectedRenegotiationReply(SdpType),
}

impl From<MediaSessionError> for RoomError {
    #[inline]
    fn from(err: MediaSessionError) -> Self {
        Self::MediaSession(err)
    }
}

impl From<SignalingError> for RoomError {
    #[inline]
    fn from(err: SignalingError) -> Self {
        Self::Signaling(err)
    }
}

type Result<T> = std::result::Result<T, Traced<RoomError>>;

/// Drives a [`MediaSession`] through a join-room handshake with the hub and
/// keeps it negotiated afterwards.
///
/// Must be created and used inside a [`tokio::task::LocalSet`].
pub struct NegotiationCoordinator {
    inner: Rc<InnerCoordinator>,

    /// Loop handling hub events.
    _hub_events: TaskHandle,

    /// Worker running queued renegotiation rounds one by one.
    _renegotiations: TaskHandle,
}

impl NegotiationCoordinator {
    /// Creates a new [`NegotiationCoordinator`] and starts listening to hub
    /// events.
    pub fn new(
        port: Rc<dyn SignalingPort>,
        peer_factory: Rc<dyn PeerConnectionFactory>,
        media_devices: Rc<dyn MediaDevices>,
        conf: &Conf,
    ) -> Self {
        let signaling = SignalingClient::new(port, &conf.rpc);
        let mut hub_events = signaling.subscribe();
        let (renegotiation_tx, mut renegotiation_rx) = mpsc::unbounded();

        let inner = Rc::new(InnerCoordinator {
            signaling,
            peer_factory,
            media_devices,
            rtc_config: RtcConfiguration::from(&conf.ice),
            media_caps: MediaStreamConstraints::from(&conf.media),
            session: RefCell::default(),
            session_events: RefCell::default(),
            candidates: CandidateBuffer::new(),
            flushed: Cell::new(false),
            call_state: ObservableCell::new(CallState::NotInCall),
            attempt: Cell::new(0),
            roster: RefCell::default(),
            round_lock: Mutex::new(()),
            renegotiation_tx,
            remote_track_subs: RefCell::default(),
        });

        let weak_inner = Rc::downgrade(&inner);
        let hub_loop = spawn_abortable(async move {
            while let Some(event) = hub_events.next().await {
                let inner = match weak_inner.upgrade() {
                    Some(inner) => inner,
                    None => break,
                };
                let name = event.name();
                if let Err(e) = event.dispatch_with(&*inner).await {
                    log::error!("Failed to handle `{}` event: {}", name, e);
                }
            }
        });

        let weak_inner = Rc::downgrade(&inner);
        let worker = spawn_abortable(async move {
            while let Some(session) = renegotiation_rx.next().await {
                let inner = match weak_inner.upgrade() {
                    Some(inner) => inner,
                    None => break,
                };
                if let Err(e) = inner.renegotiate(session).await {
                    log::error!("Renegotiation failed: {}", e);
                }
            }
        });

        Self {
            inner,
            _hub_events: hub_loop,
            _renegotiations: worker,
        }
    }

    /// Joins the `Room` with the given ID, replacing the current
    /// [`MediaSession`] (if any) with a new one.
    ///
    /// Resolves once the local answer is delivered to the hub.
    ///
    /// # Errors
    ///
    /// If any step of the handshake fails. The new [`MediaSession`] is closed
    /// and the [`CallState`] goes back to [`CallState::NotInCall`] then,
    /// leaving the `Room` on the hub if it has been joined already.
    ///
    /// With [`MediaSessionError::Closed`] if
    /// [`NegotiationCoordinator::leave_room`] is called meanwhile.
    pub async fn join_room(&self, room_id: RoomId) -> Result<()> {
        Rc::clone(&self.inner).join_room(room_id).await
    }

    /// Leaves the current `Room`, closing the [`MediaSession`] and cancelling
    /// an in-flight [`NegotiationCoordinator::join_room`].
    ///
    /// # Errors
    ///
    /// If `LeaveRoom` request fails. The [`MediaSession`] is closed anyway.
    pub async fn leave_room(&self) -> Result<()> {
        self.inner.leave_room().await
    }

    /// Registers a new `User` with the given name on the hub.
    ///
    /// # Errors
    ///
    /// If `CreateUser` request fails.
    pub async fn create_user(&self, username: String) -> Result<()> {
        self.inner
            .send(Command::CreateUser { username })
            .await
            .map(drop)
    }

    /// Creates a new `Room` with the given name on the hub.
    ///
    /// # Errors
    ///
    /// If `CreateRoom` request fails.
    pub async fn create_room(&self, name: String) -> Result<()> {
        self.inner.send(Command::CreateRoom { name }).await.map(drop)
    }

    /// Returns the current [`CallState`].
    #[inline]
    #[must_use]
    pub fn call_state(&self) -> CallState {
        self.inner.call_state.get()
    }

    /// Returns [`Stream`] of [`CallState`] updates, starting with the current
    /// one.
    ///
    /// [`Stream`]: futures::Stream
    #[inline]
    pub fn on_call_state(&self) -> LocalBoxStream<'static, CallState> {
        self.inner.call_state.subscribe()
    }

    /// Returns [`Stream`] of [`RemoteTrack`]s to be routed to an output sink.
    ///
    /// [`Stream`]: futures::Stream
    pub fn on_remote_track(&self) -> LocalBoxStream<'static, RemoteTrack> {
        let (tx, rx) = mpsc::unbounded();
        self.inner.remote_track_subs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    /// Returns the current [`MediaSession`], if any.
    #[inline]
    #[must_use]
    pub fn media_session(&self) -> Option<Rc<MediaSession>> {
        self.inner.current_session()
    }

    /// Returns the current [`Roster`] snapshot.
    #[inline]
    #[must_use]
    pub fn roster(&self) -> Roster {
        self.inner.roster.borrow().clone()
    }

    /// Returns count of the remote candidates waiting for the
    /// [`MediaSession`].
    #[inline]
    #[must_use]
    pub fn pending_candidates(&self) -> usize {
        self.inner.candidates.len()
    }
}

struct InnerCoordinator {
    signaling: SignalingClient,

    peer_factory: Rc<dyn PeerConnectionFactory>,

    media_devices: Rc<dyn MediaDevices>,

    /// Configuration of every created [`MediaSession`].
    rtc_config: RtcConfiguration,

    /// Local media to capture on join.
    media_caps: MediaStreamConstraints,

    /// Current [`MediaSession`].
    session: RefCell<Option<Rc<MediaSession>>>,

    /// Loop handling events of the current [`MediaSession`].
    session_events: RefCell<Option<TaskHandle>>,

    /// Remote candidates the current [`MediaSession`] can't accept yet.
    candidates: CandidateBuffer,

    /// Indicator whether [`InnerCoordinator::candidates`] have been flushed
    /// in the current negotiation round.
    flushed: Cell<bool>,

    call_state: ObservableCell<CallState>,

    /// Number of the current call attempt.
    ///
    /// Bumped by every join and whenever the call ends, so an in-flight join
    /// can tell it has been cancelled.
    attempt: Cell<u64>,

    roster: RefCell<Roster>,

    /// Serializes join and renegotiation rounds.
    round_lock: Mutex<()>,

    /// Queue of renegotiation rounds, tagged with the [`MediaSession`] they
    /// were requested by.
    renegotiation_tx: mpsc::UnboundedSender<Weak<MediaSession>>,

    remote_track_subs: RefCell<Vec<mpsc::UnboundedSender<RemoteTrack>>>,
}

impl InnerCoordinator {
    /// Returns the current [`MediaSession`], if any.
    fn current_session(&self) -> Option<Rc<MediaSession>> {
        self.session.borrow().as_ref().map(Rc::clone)
    }

    /// Indicates whether the given `session` is the current one.
    fn is_current(&self, session: &Rc<MediaSession>) -> bool {
        self.session
            .borrow()
            .as_ref()
            .map_or(false, |current| Rc::ptr_eq(current, session))
    }

    /// Sends the given [`Command`] to the hub.
    async fn send(&self, command: Command) -> Result<Value> {
        self.signaling
            .send(command)
            .await
            .map_err(tracerr::map_from_and_wrap!())
    }

    /// Returns name of the local `User` for logging.
    fn whoami(&self) -> String {
        self.roster
            .borrow()
            .local_user()
            .map_or_else(|| "anonymous".to_owned(), |u| u.username.clone())
    }

    /// Closes the current [`MediaSession`] and drops all the buffered
    /// candidates.
    fn reset_session(&self) {
        drop(self.session_events.borrow_mut().take());
        let session = self.session.borrow_mut().take();
        if let Some(session) = session {
            session.close();
        }
        self.candidates.clear();
        self.flushed.set(false);
    }

    /// Makes the given `session` current and starts handling its events.
    fn install_session(this: &Rc<Self>, session: Rc<MediaSession>) {
        let mut events = session.subscribe();
        let weak_session = Rc::downgrade(&session);
        let weak_inner = Rc::downgrade(this);
        let task = spawn_abortable(async move {
            while let Some(event) = events.next().await {
                let (inner, session) =
                    match (weak_inner.upgrade(), weak_session.upgrade()) {
                        (Some(inner), Some(session)) => (inner, session),
                        _ => break,
                    };
                if !inner.is_current(&session) {
                    break;
                }
                drop(session);
                if let Err(e) = event.dispatch_with(&*inner).await {
                    log::error!("Failed to handle media session event: {}", e);
                }
            }
        });
        this.session.borrow_mut().replace(session);
        this.session_events.borrow_mut().replace(task);
    }

    /// Runs the join-room round.
    async fn join_room(self: Rc<Self>, room_id: RoomId) -> Result<()> {
        let _round = self.round_lock.lock().await;

        self.reset_session();
        let attempt = self.attempt.get() + 1;
        self.attempt.set(attempt);
        self.call_state.set(CallState::Joining(room_id.clone()));
        log::info!("{} joins room `{}`", self.whoami(), room_id);

        let mut joined = false;
        let res =
            Self::negotiate_join(&self, room_id.clone(), attempt, &mut joined)
                .await;
        match res {
            Ok(()) => {
                self.call_state.set(CallState::InCall(room_id));
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to join room `{}`: {}", room_id, e);
                if self.attempt.get() == attempt {
                    if joined {
                        self.abandon_call().await;
                    } else {
                        self.end_call();
                    }
                }
                Err(e)
            }
        }
    }

    /// Performs the join-room handshake on a fresh [`MediaSession`].
    ///
    /// Sets `joined` once the hub acknowledges `JoinRoom`. Fails with
    /// [`MediaSessionError::Closed`] as soon as the given `attempt` is no
    /// longer the current one.
    async fn negotiate_join(
        this: &Rc<Self>,
        room_id: RoomId,
        attempt: u64,
        joined: &mut bool,
    ) -> Result<()> {
        let session = peer::create_with_local_media(
            &*this.media_devices,
            &*this.peer_factory,
            this.media_caps,
            this.rtc_config.clone(),
        )
        .await
        .map_err(tracerr::map_from_and_wrap!())?;
        let session = Rc::new(session);
        if let Err(e) = this.ensure_attempt(attempt) {
            session.close();
            return Err(e);
        }
        Self::install_session(this, Rc::clone(&session));

        this.send(Command::JoinRoom { room_id }).await?;
        this.ensure_attempt(attempt)?;
        *joined = true;

        let offer = this
            .signaling
            .get_server_offer()
            .await
            .map_err(tracerr::map_from_and_wrap!())?;
        this.ensure_attempt(attempt)?;
        let answer = session
            .accept_offer_and_answer(offer)
            .await
            .map_err(tracerr::map_from_and_wrap!())?;
        this.send(Command::SetRemoteDescription(answer)).await?;
        this.ensure_attempt(attempt)?;

        // Triggers may have fired before the remote description was set.
        if session.ice_gathering_state() == IceGatheringState::Complete
            || session.connection_state() == PeerConnectionState::Connected
        {
            this.flush_candidates().await;
        }
        this.ensure_attempt(attempt)
    }

    /// Fails with [`MediaSessionError::Closed`] if the call has ended since
    /// the given `attempt` started.
    fn ensure_attempt(&self, attempt: u64) -> Result<()> {
        if self.attempt.get() == attempt {
            Ok(())
        } else {
            Err(tracerr::new!(RoomError::from(MediaSessionError::Closed)))
        }
    }

    /// Ends the current call attempt locally: closes the [`MediaSession`]
    /// and goes back to [`CallState::NotInCall`].
    fn end_call(&self) {
        self.attempt.set(self.attempt.get() + 1);
        self.reset_session();
        self.call_state.set(CallState::NotInCall);
    }

    /// Tells the hub the local `User` leaves the current `Room` (if any) and
    /// ends the call.
    ///
    /// `LeaveRoom` is sent before the [`MediaSession`] is closed, since this
    /// may run on the loop of that very [`MediaSession`] events, which
    /// [`InnerCoordinator::end_call`] aborts.
    async fn abandon_call(&self) {
        if let Some(room_id) = self.call_state.get().room_id().cloned() {
            log::info!("{} abandons room `{}`", self.whoami(), room_id);
            let leave = Command::LeaveRoom {
                room_id: room_id.clone(),
            };
            if let Err(e) = self.send(leave).await {
                log::warn!("Failed to leave room `{}`: {}", room_id, e);
            }
        }
        self.end_call();
    }

    /// Leaves the current `Room`.
    ///
    /// Cancels the in-flight join, if any.
    async fn leave_room(&self) -> Result<()> {
        let room_id = self.call_state.get().room_id().cloned();
        self.end_call();
        match room_id {
            Some(room_id) => {
                log::info!("{} leaves room `{}`", self.whoami(), room_id);
                self.send(Command::LeaveRoom { room_id }).await.map(drop)
            }
            None => Ok(()),
        }
    }

    /// Runs one renegotiation round requested by the given `session`.
    ///
    /// A round that fails leaves the [`MediaSession`] half-configured, so the
    /// call is abandoned then.
    async fn renegotiate(&self, session: Weak<MediaSession>) -> Result<()> {
        let _round = self.round_lock.lock().await;
        let session = match session.upgrade() {
            Some(s) if self.is_current(&s) => s,
            _ => return Ok(()),
        };
        self.flushed.set(false);

        let res = self.run_renegotiation(&session).await;
        if res.is_err() && self.is_current(&session) {
            self.abandon_call().await;
        }
        res
    }

    /// Sends a fresh offer of the given `session` to the hub and applies the
    /// answer it replies with.
    ///
    /// `null` reply means the hub has nothing to answer yet.
    async fn run_renegotiation(&self, session: &MediaSession) -> Result<()> {
        let offer = session
            .create_offer()
            .await
            .map_err(tracerr::map_from_and_wrap!())?;
        let reply = self
            .signaling
            .renegotiate(offer)
            .await
            .map_err(tracerr::map_from_and_wrap!())?;
        match reply {
            Some(answer) if answer.kind == SdpType::Answer => session
                .apply_remote_answer(answer.sdp)
                .await
                .map_err(tracerr::map_from_and_wrap!()),
            Some(other) => Err(tracerr::new!(
                RoomError::UnexpectedRenegotiationReply(other.kind)
            )),
            None => Ok(()),
        }
    }

    /// Drains buffered candidates into the current [`MediaSession`], once
    /// per negotiation round.
    ///
    /// Does nothing until the remote description is set.
    async fn flush_candidates(&self) {
        let session = match self.current_session() {
            Some(session) => session,
            None => return,
        };
        if self.flushed.get() || !session.has_remote_description() {
            return;
        }
        self.flushed.set(true);

        let pending = self.candidates.len();
        let errors = self.candidates.drain_into(&*session).await;
        log::debug!(
            "Flushed {} buffered candidates, {} failed",
            pending,
            errors.len(),
        );
    }
}

/// Hub events handling.
#[async_trait(?Send)]
impl EventHandler for InnerCoordinator {
    type Output = Result<()>;

    async fn on_update_rooms(&self, rooms: Vec<Room>) -> Self::Output {
        self.roster.borrow_mut().set_rooms(rooms);
        Ok(())
    }

    async fn on_update_users(&self, users: Vec<User>) -> Self::Output {
        self.roster.borrow_mut().set_users(users);
        Ok(())
    }

    async fn on_user_created(&self, user: User) -> Self::Output {
        log::info!("Registered as `{}` ({})", user.username, user.id);
        self.roster.borrow_mut().set_local_user(user);
        Ok(())
    }

    async fn on_user_exited(&self, data: Value) -> Self::Output {
        log::info!("User exited: {}", data);
        Ok(())
    }

    async fn on_user_exited_room(&self, data: Value) -> Self::Output {
        log::info!("User exited room: {}", data);
        Ok(())
    }

    async fn on_exited_room(&self, data: Value) -> Self::Output {
        log::info!("Exited room: {}", data);
        Ok(())
    }

    async fn on_joined_room(&self, data: Value) -> Self::Output {
        log::info!("Joined room: {}", data);
        Ok(())
    }

    async fn on_user_joined_room(&self, data: Value) -> Self::Output {
        log::info!("User joined room: {}", data);
        Ok(())
    }

    /// Applies remote candidate right away if the [`MediaSession`] accepts
    /// candidates and none are waiting before it, otherwise buffers it.
    async fn on_ice_candidate_result(
        &self,
        candidate: IceCandidate,
    ) -> Self::Output {
        let session = match self.current_session() {
            Some(session) => session,
            None => {
                if let CallState::Joining(_) = self.call_state.get() {
                    self.candidates.enqueue(candidate);
                } else {
                    log::warn!("Dropping remote ICE candidate: not in call");
                }
                return Ok(());
            }
        };

        if session.has_remote_description()
            && self.candidates.is_empty()
            && !self.candidates.is_draining()
        {
            session
                .apply_candidate(candidate)
                .await
                .map_err(tracerr::map_from_and_wrap!())
        } else {
            self.candidates.enqueue(candidate);
            Ok(())
        }
    }
}

/// [`MediaSessionEvent`]s handling.
#[async_trait(?Send)]
impl MediaSessionEventHandler for InnerCoordinator {
    type Output = Result<()>;

    /// Trickles local candidate to the hub.
    async fn on_ice_candidate_discovered(
        &self,
        candidate: IceCandidate,
    ) -> Self::Output {
        self.send(Command::AddIceCandidate(candidate)).await.map(drop)
    }

    async fn on_ice_gathering_state_changed(
        &self,
        state: IceGatheringState,
    ) -> Self::Output {
        log::debug!("ICE gathering state: {}", state);
        if state == IceGatheringState::Complete {
            self.flush_candidates().await;
        }
        Ok(())
    }

    async fn on_connection_state_changed(
        &self,
        state: PeerConnectionState,
    ) -> Self::Output {
        match state {
            PeerConnectionState::Connected => {
                log::info!("Media session connected");
                self.flush_candidates().await;
            }
            PeerConnectionState::Failed => {
                log::warn!("Media session failed, leaving the call");
                self.abandon_call().await;
            }
            _ => log::debug!("Connection state: {}", state),
        }
        Ok(())
    }

    async fn on_track_received(
        &self,
        track: MediaStreamTrack,
        stream_id: String,
    ) -> Self::Output {
        log::debug!("Received {} track of stream `{}`", track.kind, stream_id);
        let remote = RemoteTrack { track, stream_id };
        self.remote_track_subs
            .borrow_mut()
            .retain(|sub| sub.unbounded_send(remote.clone()).is_ok());
        Ok(())
    }

    async fn on_data_channel_opened(&self, label: String) -> Self::Output {
        log::debug!("Data channel `{}` opened", label);
        Ok(())
    }

    async fn on_data_channel_message(
        &self,
        label: String,
        data: String,
    ) -> Self::Output {
        log::info!("Data channel `{}` message: {}", label, data);
        Ok(())
    }

    /// Queues one renegotiation round.
    async fn on_negotiation_needed(&self) -> Self::Output {
        if let Some(session) = self.current_session() {
            let queued = self
                .renegotiation_tx
                .unbounded_send(Rc::downgrade(&session));
            if queued.is_err() {
                log::error!("Renegotiation worker is gone, dropping the round");
            }
        }
        Ok(())
    }
}
