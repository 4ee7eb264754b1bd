//! Boundary of the host's [MediaDevices][1].
//!
//! [1]: https://w3.org/TR/mediacapture-streams#mediadevices

use async_trait::async_trait;
use derive_more::{Display, From};
use tracerr::Traced;

use crate::conf::Media;

use super::Error;

/// Kind of a [`MediaStreamTrack`].
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum MediaKind {
    /// Audio track.
    #[display(fmt = "audio")]
    Audio,

    /// Video track.
    #[display(fmt = "video")]
    Video,
}

/// Handle of a [MediaStreamTrack][1] owned by the host.
///
/// [1]: https://w3.org/TR/mediacapture-streams#mediastreamtrack
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MediaStreamTrack {
    /// [ID][1] of this track.
    ///
    /// [1]: https://w3.org/TR/mediacapture-streams#dom-mediastreamtrack-id
    pub id: String,

    /// [Kind][1] of this track.
    ///
    /// [1]: https://w3.org/TR/mediacapture-streams#dom-mediastreamtrack-kind
    pub kind: MediaKind,
}

/// [MediaStreamConstraints][1] to capture local media with.
///
/// [1]: https://w3.org/TR/mediacapture-streams#dom-mediastreamconstraints
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MediaStreamConstraints {
    /// Whether an audio track is requested.
    pub audio: bool,

    /// Whether a video track is requested.
    pub video: bool,
}

impl From<&Media> for MediaStreamConstraints {
    #[inline]
    fn from(media: &Media) -> Self {
        Self {
            audio: media.audio,
            video: media.video,
        }
    }
}

/// Error of capturing local media.
#[derive(Clone, Debug, Display, From)]
#[display(fmt = "getUserMedia() failed: {}", _0)]
pub struct GetUserMediaError(Error);

/// Representation of the host's [MediaDevices][1].
///
/// [1]: https://w3.org/TR/mediacapture-streams#mediadevices
#[cfg_attr(any(test, feature = "mockable"), mockall::automock)]
#[async_trait(?Send)]
pub trait MediaDevices {
    /// Prompts a user for a permission to use a media input which produces
    /// [`MediaStreamTrack`]s containing the requested types of media.
    ///
    /// Adapter for a [MediaDevices.getUserMedia()][1] function.
    ///
    /// # Errors
    ///
    /// With [`GetUserMediaError`] if the host denies or fails the capture.
    ///
    /// [1]: https://w3.org/TR/mediacapture-streams#dom-mediadevices-getusermedia
    async fn get_user_media(
        &self,
        caps: MediaStreamConstraints,
    ) -> Result<Vec<MediaStreamTrack>, Traced<GetUserMediaError>>;
}
