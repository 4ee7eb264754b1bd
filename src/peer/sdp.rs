//! Validation of session descriptions received from `Server`.

use huddle_client_api_proto::{SdpType, ServerSessionDescription};

/// Validates the `Server`-authored `offer` and returns its SDP body.
///
/// Absent `type` defaults to `offer`. Both the [RTCSdpType][1] name and the
/// numeric code of `offer` are accepted.
///
/// # Errors
///
/// With a description of the problem if `type` is present and is not
/// `offer`, or if `sdp` is missing or empty.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype
pub fn parse_server_offer(
    offer: ServerSessionDescription,
) -> Result<String, String> {
    if let Some(kind) = &offer.kind {
        match kind.resolve() {
            Some(SdpType::Offer) => (),
            Some(other) => {
                return Err(format!("expected `offer` type, got `{}`", other))
            }
            None => return Err(format!("unknown SDP type `{}`", kind)),
        }
    }
    match offer.sdp {
        Some(sdp) if !sdp.trim().is_empty() => Ok(sdp),
        _ => Err("SDP body is missing".to_owned()),
    }
}
