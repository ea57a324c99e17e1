//! Stream profile selection.
//!
//! The controller exposes a ladder of encodings per camera; one is picked
//! per streaming request. For a relay path the rule is best-match: the
//! smallest profile at least as large as the request in both dimensions,
//! falling back to the largest available when the request exceeds the
//! ladder. A transcode path instead takes the highest quality outright,
//! since the encoder does better work fed high-quality input.

use crate::nvr_client::StreamProfile;

/// Smallest profile with both dimensions >= the request, or the largest
/// profile when none qualifies. Returns None for an empty ladder.
pub fn best_match(profiles: &[StreamProfile], width: u32, height: u32) -> Option<&StreamProfile> {
    let qualifying = profiles
        .iter()
        .filter(|p| p.width >= width && p.height >= height)
        .min_by_key(|p| (p.width as u64 * p.height as u64, p.width));

    match qualifying {
        Some(profile) => Some(profile),
        None => highest(profiles),
    }
}

/// Highest-resolution profile in the ladder.
pub fn highest(profiles: &[StreamProfile]) -> Option<&StreamProfile> {
    profiles
        .iter()
        .max_by_key(|p| (p.width as u64 * p.height as u64, p.width))
}

/// Pick the profile for a request.
///
/// `transcode` selects the re-encode path, which is biased to the highest
/// available quality instead of the requested size.
pub fn select<'a>(
    profiles: &'a [StreamProfile],
    width: u32,
    height: u32,
    transcode: bool,
) -> Option<&'a StreamProfile> {
    if transcode {
        highest(profiles)
    } else {
        best_match(profiles, width, height)
    }
}
