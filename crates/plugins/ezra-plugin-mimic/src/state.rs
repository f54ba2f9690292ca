//! Per-agent mimic state

use crate::profile::PersonalityProfile;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Mimic state of one agent
#[derive(Debug, Clone, Default)]
pub struct MimicState {
    /// Whether mimic mode is on
    pub active: bool,
    /// Personality saved before activation
    pub original_personality: String,
    /// Profile of the mimicked user
    pub profile: Option<PersonalityProfile>,
}

impl MimicState {
    /// User id of the active target
    pub fn target(&self) -> Option<&str> {
        if !self.active {
            return None;
        }
        self.profile.as_ref().map(|p| p.user_id.as_str())
    }
}

/// Mimic states keyed by agent id
///
/// Readers get snapshots; writes happen only through the tool handlers.
#[derive(Default)]
pub struct MimicRegistry {
    states: Mutex<HashMap<String, MimicState>>,
}

impl MimicRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of an agent's state
    pub fn snapshot(&self, agent_id: &str) -> MimicState {
        self.states.lock().get(agent_id).cloned().unwrap_or_default()
    }

    /// Whether `agent_id` is mimicking someone
    pub fn is_active(&self, agent_id: &str) -> bool {
        self.states
            .lock()
            .get(agent_id)
            .map(|s| s.active)
            .unwrap_or(false)
    }

    /// Profile being mimicked, if active
    pub fn active_profile(&self, agent_id: &str) -> Option<PersonalityProfile> {
        let states = self.states.lock();
        let state = states.get(agent_id)?;
        if state.active {
            state.profile.clone()
        } else {
            None
        }
    }

    /// Style prompt overriding the agent's own personality while active
    pub fn style_prompt(&self, agent_id: &str) -> Option<String> {
        self.active_profile(agent_id).map(|p| p.style_prompt)
    }

    /// Turn mimic mode on for `agent_id`
    ///
    /// The saved personality from an earlier activation is kept when the
    /// agent switches targets without reverting first.
    pub fn activate(&self, agent_id: &str, original_personality: String, profile: PersonalityProfile) {
        let mut states = self.states.lock();
        let state = states.entry(agent_id.to_string()).or_default();
        if !state.active {
            state.original_personality = original_personality;
        }
        state.active = true;
        state.profile = Some(profile);
    }

    /// Turn mimic mode off, returning the state it had
    pub fn deactivate(&self, agent_id: &str) -> Option<MimicState> {
        let mut states = self.states.lock();
        match states.get(agent_id) {
            Some(state) if state.active => states.remove(agent_id),
            _ => None,
        }
    }
}
