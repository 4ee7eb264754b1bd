//! Scripted fakes of the host boundaries.

#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use async_trait::async_trait;
use futures::{
    channel::{mpsc, oneshot},
    stream::{self, LocalBoxStream},
};
use huddle_client::{
    platform::{
        Error, GetUserMediaError, MediaDevices, MediaKind,
        MediaStreamConstraints, MediaStreamTrack, PeerConnectionEvent,
        PeerConnectionEventHandler, PeerConnectionFactory, RtcConfiguration,
        RtcPeerConnection, RtcPeerConnectionError, SdpType,
    },
    proto::IceCandidate,
    SignalingError, SignalingPort,
};
use serde_json::Value;
use tracerr::Traced;

/// Yields to the local executor a few times, letting spawned tasks progress.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

pub fn candidate(n: u16) -> IceCandidate {
    IceCandidate {
        candidate: format!(
            "candidate:{} 1 udp 2122260223 10.0.0.{} 5000 typ host",
            n, n,
        ),
        sdp_m_line_index: Some(0),
        sdp_mid: Some("0".to_owned()),
        username_fragment: None,
    }
}

/// [`RtcPeerConnection`] recording every operation performed on it.
#[derive(Default)]
pub struct FakePeer {
    ops: RefCell<Vec<String>>,
    handler: RefCell<Option<PeerConnectionEventHandler>>,
    closed: Cell<bool>,
    offers_made: Cell<usize>,
    offer_gate: RefCell<Option<oneshot::Receiver<()>>>,
}

impl FakePeer {
    /// Returns the recorded operations.
    pub fn ops(&self) -> Vec<String> {
        self.ops.borrow().clone()
    }

    /// Returns the recorded operations starting with the given `prefix`.
    pub fn ops_with(&self, prefix: &str) -> Vec<String> {
        self.ops
            .borrow()
            .iter()
            .filter(|op| op.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub fn has_handler(&self) -> bool {
        self.handler.borrow().is_some()
    }

    /// Makes the next `create_offer()` hang until the returned sender fires.
    pub fn hold_next_offer(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.offer_gate.replace(Some(rx));
        tx
    }

    /// Fires the given `event` as the host would.
    pub fn fire(&self, event: PeerConnectionEvent) {
        let handler = self.handler.borrow_mut().take();
        if let Some(mut handler) = handler {
            handler(event);
            if !self.closed.get() && self.handler.borrow().is_none() {
                self.handler.replace(Some(handler));
            }
        }
    }

    fn record<S: Into<String>>(&self, op: S) {
        self.ops.borrow_mut().push(op.into());
    }
}

#[async_trait(?Send)]
impl RtcPeerConnection for FakePeer {
    fn add_track(
        &self,
        track: &MediaStreamTrack,
    ) -> Result<(), Traced<RtcPeerConnectionError>> {
        self.record(format!("add_track:{}", track.id));
        Ok(())
    }

    async fn create_offer(
        &self,
    ) -> Result<String, Traced<RtcPeerConnectionError>> {
        self.record("create_offer");
        let gate = self.offer_gate.borrow_mut().take();
        if let Some(gate) = gate {
            if gate.await.is_err() {
                return Err(tracerr::new!(RtcPeerConnectionError::CreateOffer(
                    Error::new("OperationError", "aborted"),
                )));
            }
        }
        self.offers_made.set(self.offers_made.get() + 1);
        Ok(format!("O{}", self.offers_made.get()))
    }

    async fn create_answer(
        &self,
    ) -> Result<String, Traced<RtcPeerConnectionError>> {
        self.record("create_answer");
        Ok("Y".to_owned())
    }

    async fn set_local_description(
        &self,
        sdp: SdpType,
    ) -> Result<(), Traced<RtcPeerConnectionError>> {
        self.record(match sdp {
            SdpType::Offer(sdp) => format!("set_local:offer:{}", sdp),
            SdpType::Answer(sdp) => format!("set_local:answer:{}", sdp),
        });
        Ok(())
    }

    async fn set_remote_description(
        &self,
        sdp: SdpType,
    ) -> Result<(), Traced<RtcPeerConnectionError>> {
        self.record(match sdp {
            SdpType::Offer(sdp) => format!("set_remote:offer:{}", sdp),
            SdpType::Answer(sdp) => format!("set_remote:answer:{}", sdp),
        });
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<(), Traced<RtcPeerConnectionError>> {
        self.record(format!("add_ice_candidate:{}", candidate.candidate));
        Ok(())
    }

    fn on_event(&self, handler: Option<PeerConnectionEventHandler>) {
        self.handler.replace(handler);
    }

    fn close(&self) {
        self.record("close");
        self.closed.set(true);
        self.handler.replace(None);
    }
}

/// [`PeerConnectionFactory`] of [`FakePeer`]s.
#[derive(Default)]
pub struct FakePeerFactory {
    peers: RefCell<Vec<Rc<FakePeer>>>,
}

impl FakePeerFactory {
    /// Returns all the created [`FakePeer`]s.
    pub fn peers(&self) -> Vec<Rc<FakePeer>> {
        self.peers.borrow().clone()
    }

    /// Returns the last created [`FakePeer`].
    pub fn last(&self) -> Rc<FakePeer> {
        Rc::clone(self.peers.borrow().last().expect("no peer created"))
    }
}

impl PeerConnectionFactory for FakePeerFactory {
    fn create(
        &self,
        _: RtcConfiguration,
    ) -> Result<Rc<dyn RtcPeerConnection>, Traced<RtcPeerConnectionError>>
    {
        let peer = Rc::new(FakePeer::default());
        self.peers.borrow_mut().push(Rc::clone(&peer));
        Ok(peer as Rc<dyn RtcPeerConnection>)
    }
}

/// [`MediaDevices`] capturing a single microphone, unless denied.
#[derive(Default)]
pub struct FakeMediaDevices {
    deny: Cell<bool>,
    gate: RefCell<Option<oneshot::Receiver<()>>>,
}

impl FakeMediaDevices {
    pub fn denied() -> Self {
        Self {
            deny: Cell::new(true),
            gate: RefCell::default(),
        }
    }

    /// Makes the next capture hang until the returned sender fires.
    pub fn hold(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gate.replace(Some(rx));
        tx
    }
}

#[async_trait(?Send)]
impl MediaDevices for FakeMediaDevices {
    async fn get_user_media(
        &self,
        _: MediaStreamConstraints,
    ) -> Result<Vec<MediaStreamTrack>, Traced<GetUserMediaError>> {
        let gate = self.gate.borrow_mut().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.deny.get() {
            return Err(tracerr::new!(GetUserMediaError::from(Error::new(
                "NotAllowedError",
                "Permission denied",
            ))));
        }
        Ok(vec![MediaStreamTrack {
            id: "mic".to_owned(),
            kind: MediaKind::Audio,
        }])
    }
}

/// [`SignalingPort`] recording every invocation and answering with scripted
/// responses (`null` by default).
pub struct FakeHub {
    invocations: RefCell<Vec<(String, Vec<Value>)>>,
    responses:
        RefCell<HashMap<&'static str, VecDeque<Result<Value, SignalingError>>>>,
    gates: RefCell<HashMap<&'static str, oneshot::Receiver<()>>>,
    events_tx: mpsc::UnboundedSender<(String, Value)>,
    events_rx: RefCell<Option<mpsc::UnboundedReceiver<(String, Value)>>>,
}

impl Default for FakeHub {
    fn default() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded();
        Self {
            invocations: RefCell::default(),
            responses: RefCell::default(),
            gates: RefCell::default(),
            events_tx,
            events_rx: RefCell::new(Some(events_rx)),
        }
    }
}

impl FakeHub {
    /// Scripts the next response to the given `method`.
    pub fn respond(&self, method: &'static str, response: Value) {
        self.responses
            .borrow_mut()
            .entry(method)
            .or_default()
            .push_back(Ok(response));
    }

    /// Scripts the next invocation of the given `method` to fail.
    pub fn fail(&self, method: &'static str, reason: &str) {
        self.responses
            .borrow_mut()
            .entry(method)
            .or_default()
            .push_back(Err(SignalingError::Transport(reason.to_owned())));
    }

    /// Makes the next invocation of the given `method` hang until the
    /// returned sender fires.
    pub fn hold(&self, method: &'static str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.borrow_mut().insert(method, rx);
        tx
    }

    /// Pushes an event as the hub would.
    pub fn push<N: Into<String>>(&self, name: N, payload: Value) {
        let _ = self.events_tx.unbounded_send((name.into(), payload));
    }

    /// Returns all the invocations made so far.
    pub fn invocations(&self) -> Vec<(String, Vec<Value>)> {
        self.invocations.borrow().clone()
    }

    /// Returns names of all the methods invoked so far.
    pub fn methods(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }

    /// Returns arguments of all the invocations of the given `method`.
    pub fn args_of(&self, method: &str) -> Vec<Vec<Value>> {
        self.invocations
            .borrow()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, args)| args.clone())
            .collect()
    }
}

#[async_trait(?Send)]
impl SignalingPort for FakeHub {
    async fn invoke(
        &self,
        method: &'static str,
        args: Vec<Value>,
    ) -> Result<Value, Traced<SignalingError>> {
        self.invocations
            .borrow_mut()
            .push((method.to_owned(), args));
        let gate = self.gates.borrow_mut().remove(method);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let response = self
            .responses
            .borrow_mut()
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        match response {
            Some(Ok(value)) => Ok(value),
            Some(Err(e)) => Err(tracerr::new!(e)),
            None => Ok(Value::Null),
        }
    }

    fn on_event(&self) -> LocalBoxStream<'static, (String, Value)> {
        match self.events_rx.borrow_mut().take() {
            Some(rx) => Box::pin(rx),
            None => Box::pin(stream::empty()),
        }
    }
}
