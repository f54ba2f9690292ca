//! Style profiles and mimic mode for Ezra
//!
//! A profile summarizes how a Discord user writes. While an agent mimics
//! that user its personality is replaced by a style prompt rendered from
//! the profile, and a background poster writes to the mimic channel in
//! the same voice.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analyzer;
pub mod facts;
mod plugin;
pub mod profile;
pub mod prompt;
pub mod scheduler;
pub mod state;
pub mod tools;

pub use analyzer::StyleAnalyzer;
pub use plugin::{MimicPlugin, MimicServices};
pub use profile::{FormatHabits, LengthDistribution, PersonalityProfile};
pub use scheduler::{MimicScheduler, SchedulerConfig};
pub use state::{MimicRegistry, MimicState};
pub use tools::{MimicToolExecutor, MIMIC_TOOLS};

#[cfg(test)]
mod tests {
    use super::*;
    use ezra_core::testing::{InMemoryRepository, RecordingDirectory, ScriptedModel, StaticSearch};
    use ezra_core::MimicSettings;
    use std::sync::Arc;

    fn services() -> MimicServices {
        MimicServices {
            directory: Arc::new(RecordingDirectory::new()),
            repository: Arc::new(InMemoryRepository::new()),
            model: Arc::new(ScriptedModel::new("")),
            search: Arc::new(StaticSearch::default()),
        }
    }

    #[test]
    fn test_plugin_without_channel_has_no_poster() {
        let plugin = MimicPlugin::new(&MimicSettings::default(), "bot", services());
        assert_eq!(plugin.name(), "mimic");
        assert!(plugin.scheduler().is_none());
        assert!(plugin.style_prompt("ezra").is_none());
    }

    #[test]
    fn test_plugin_with_channel_has_poster() {
        let settings = MimicSettings {
            channel_id: Some("mimic".to_string()),
            admin_user_id: None,
        };
        let plugin = MimicPlugin::new(&settings, "bot", services());
        assert_eq!(plugin.scheduler().unwrap().config().channel_id, "mimic");
    }
}
