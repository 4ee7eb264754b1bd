//! [ICE] servers settings.
//!
//! [ICE]: https://webrtcglossary.com/ice

use std::borrow::Cow;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use smart_default::SmartDefault;

/// [ICE] settings of created peer connections.
///
/// [ICE]: https://webrtcglossary.com/ice
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Ice {
    /// Size of the prefetched [ICE candidate pool][1].
    ///
    /// Defaults to `15`.
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcconfiguration-icecandidatepoolsize
    #[default = 15]
    pub candidate_pool_size: u8,

    /// List of [STUN]/[TURN] servers to gather candidates with.
    ///
    /// Defaults to a set of public [STUN] servers.
    ///
    /// [STUN]: https://webrtcglossary.com/stun
    /// [TURN]: https://webrtcglossary.com/turn
    #[default(default_servers())]
    pub servers: Vec<IceServer>,
}

/// [STUN]/[TURN] server settings.
///
/// [STUN]: https://webrtcglossary.com/stun
/// [TURN]: https://webrtcglossary.com/turn
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IceServer {
    /// URLs of this [STUN]/[TURN] server.
    ///
    /// [STUN]: https://webrtcglossary.com/stun
    /// [TURN]: https://webrtcglossary.com/turn
    #[serde(deserialize_with = "IceServer::parse_urls")]
    pub urls: Vec<Cow<'static, str>>,

    /// Username to use during the authentication process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<Cow<'static, str>>,

    /// The credential to use when logging into the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<Cow<'static, str>>,
}

impl IceServer {
    /// Creates a new credential-less [`IceServer`] with the given `url`.
    #[inline]
    #[must_use]
    pub fn stun(url: &'static str) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// Parses [`IceServer::urls`] from the provided [`Deserializer`] either as
    /// a list or as CSV (comma-separated values) string.
    ///
    /// # Errors
    ///
    /// - If cannot parse CSV strings.
    /// - If parsed [`IceServer::urls`] is empty or contains empty values.
    fn parse_urls<'de, D>(d: D) -> Result<Vec<Cow<'static, str>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Urls {
            Csv(String),
            List(Vec<String>),
        }

        let split = |urls: &str| -> Vec<Cow<'static, str>> {
            urls.split(',').map(|u| u.trim().to_owned().into()).collect()
        };
        let out = match Urls::deserialize(d)? {
            Urls::Csv(urls) => split(&urls),
            Urls::List(list) => list.iter().flat_map(|u| split(u)).collect(),
        };

        if out.is_empty() || out.iter().any(|url| url.is_empty()) {
            return Err(D::Error::custom("Empty values are not allowed"));
        }

        Ok(out)
    }
}

/// Returns the public [STUN] servers used by default.
///
/// [STUN]: https://webrtcglossary.com/stun
fn default_servers() -> Vec<IceServer> {
    [
        "stun:stun1.l.google.com:19302",
        "stun:stun2.l.google.com:19302",
        "stun:stun3.l.google.com:19302",
        "stun:stun4.l.google.com:19302",
        "stun:stun.ekiga.net",
        "stun:stun.ideasip.com",
    ]
    .iter()
    .copied()
    .map(IceServer::stun)
    .collect()
}
