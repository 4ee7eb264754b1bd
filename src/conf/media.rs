//! Local media acquisition settings.

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Local media acquisition settings.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Media {
    /// Whether to capture an audio track. Defaults to `true`.
    #[default = true]
    pub audio: bool,

    /// Whether to capture a video track. Defaults to `false`.
    pub video: bool,
}
