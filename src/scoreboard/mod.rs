//! Scoreboard payload decoding.
//!
//! The remote API answers every scoreboard GET with one JSON object holding
//! an `events` array. [`decode`] turns those raw bytes into domain events,
//! tolerating absent optional fields and ignoring fields it does not know,
//! so newer API revisions do not break older clients.

pub mod source;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::model::ScoreEvent;

/// Wire container: an object with an `events` array. A day with no games is
/// an empty array, and a missing key decodes the same way.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Scoreboard {
    #[serde(default)]
    pub events: Vec<ScoreEvent>,
}

/// Decode one raw scoreboard payload into score events.
///
/// Pure function of the input bytes, no side effects. Returns
/// [`DecodeError::Malformed`] when the payload is not valid JSON, a required
/// field (event id, name, date, competitions; competition competitors and
/// status; team displayName) is missing or mistyped, or two events in the
/// payload share an id.
pub fn decode(payload: &[u8]) -> Result<Vec<ScoreEvent>, DecodeError> {
    let scoreboard: Scoreboard =
        serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let mut seen = HashSet::new();
    for event in &scoreboard.events {
        if !seen.insert(event.id.as_str()) {
            return Err(DecodeError::Malformed(format!(
                "duplicate event id {:?} in payload",
                event.id
            )));
        }
    }

    Ok(scoreboard.events)
}
