//! Platform-specific functionality.
//!
//! The real-time media stack (peer connections and capture devices) is
//! provided by the host through the [`PeerConnectionFactory`] and
//! [`MediaDevices`] traits. Everything else in this crate depends only on the
//! types declared here.

mod media_devices;
mod peer_connection;

use std::future::Future;

use derive_more::Display;

#[doc(inline)]
pub use self::{
    media_devices::{
        GetUserMediaError, MediaDevices, MediaKind, MediaStreamConstraints,
        MediaStreamTrack,
    },
    peer_connection::{
        DataChannel, IceGatheringState, PeerConnectionEvent,
        PeerConnectionEventHandler, PeerConnectionFactory, PeerConnectionState,
        RtcConfiguration, RtcPeerConnection, RtcPeerConnectionError, SdpType,
    },
};

#[cfg(any(test, feature = "mockable"))]
#[doc(inline)]
pub use self::{
    media_devices::MockMediaDevices,
    peer_connection::{MockPeerConnectionFactory, MockRtcPeerConnection},
};

/// Error reported by the host media stack.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
#[display(fmt = "{}: {}", name, message)]
pub struct Error {
    /// Name of this [`Error`], like `InvalidStateError`.
    pub name: String,

    /// Human-readable description of this [`Error`].
    pub message: String,
}

impl Error {
    /// Creates a new [`Error`] with the given `name` and `message`.
    #[inline]
    #[must_use]
    pub fn new<N, M>(name: N, message: M) -> Self
    where
        N: Into<String>,
        M: Into<String>,
    {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Spawns the given `task` on the current thread's local executor.
///
/// Must be called from within a [`tokio::task::LocalSet`] context.
#[inline]
pub fn spawn<F>(task: F)
where
    F: Future<Output = ()> + 'static,
{
    drop(tokio::task::spawn_local(task));
}
