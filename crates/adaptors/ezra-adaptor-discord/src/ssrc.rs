//! SSRC to user resolution
//!
//! Voice state events do not carry SSRCs, so frames the bridge could not
//! attribute arrive tagged `ssrc:<n>`. An unknown SSRC is bound to a user
//! only when exactly one unmuted member is in the channel. Frames that stay
//! unresolved are dropped by the caller.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

const SSRC_PREFIX: &str = "ssrc:";

/// Parse an ingress id of the form `ssrc:<n>`
pub fn parse_ssrc_tag(id: &str) -> Option<u32> {
    id.strip_prefix(SSRC_PREFIX)?.parse().ok()
}

/// Per-session SSRC map and channel membership
#[derive(Default)]
pub struct SsrcResolver {
    bindings: Mutex<HashMap<u32, String>>,
    // user id -> muted
    members: Mutex<HashMap<String, bool>>,
}

impl SsrcResolver {
    /// Empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an explicit binding
    pub fn bind(&self, ssrc: u32, user_id: &str) {
        self.bindings.lock().insert(ssrc, user_id.to_string());
        debug!(ssrc, user_id, "Set SSRC mapping");
    }

    /// A user entered the channel or changed mute state
    pub fn member_update(&self, user_id: &str, muted: bool) {
        self.members.lock().insert(user_id.to_string(), muted);
    }

    /// A user left the channel; their bindings go with them
    pub fn member_left(&self, user_id: &str) {
        self.members.lock().remove(user_id);
        self.bindings.lock().retain(|_, bound| bound != user_id);
    }

    /// Whether the user is currently in the channel
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.lock().contains_key(user_id)
    }

    /// Resolve `ssrc`, binding it heuristically when unambiguous
    pub fn resolve(&self, ssrc: u32) -> Option<String> {
        if let Some(user) = self.bindings.lock().get(&ssrc) {
            return Some(user.clone());
        }

        let candidate = {
            let members = self.members.lock();
            let mut unmuted = members.iter().filter(|(_, muted)| !**muted).map(|(id, _)| id);
            let first = unmuted.next().cloned();
            let ambiguous = unmuted.next().is_some();
            match first {
                Some(only) if !ambiguous => only,
                _ => return None,
            }
        };

        self.bindings.lock().insert(ssrc, candidate.clone());
        debug!(ssrc, user_id = %candidate, "Mapped SSRC to user (single speaker)");
        Some(candidate)
    }
}
