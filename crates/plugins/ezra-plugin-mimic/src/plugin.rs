use crate::scheduler::{MimicScheduler, SchedulerConfig};
use crate::state::MimicRegistry;
use crate::tools::MimicToolExecutor;
use ezra_core::{
    ChannelDirectory, ChannelMessage, LanguageModel, MimicSettings, PersonalityRepository, WebSearch,
};
use std::sync::Arc;
use tracing::info;

/// Collaborators the mimic subsystem needs
#[derive(Clone)]
pub struct MimicServices {
    /// Discord text surface
    pub directory: Arc<dyn ChannelDirectory>,
    /// Memory and profile store
    pub repository: Arc<dyn PersonalityRepository>,
    /// Text generation
    pub model: Arc<dyn LanguageModel>,
    /// Web search for grounded posts
    pub search: Arc<dyn WebSearch>,
}

/// Mimic mode wired together
///
/// The background poster only exists when a mimic channel is configured;
/// without one the tools still switch the agent's style.
pub struct MimicPlugin {
    registry: Arc<MimicRegistry>,
    scheduler: Option<Arc<MimicScheduler>>,
    tools: MimicToolExecutor,
}

impl MimicPlugin {
    /// Build the plugin from settings
    pub fn new(settings: &MimicSettings, bot_user_id: &str, services: MimicServices) -> Self {
        let registry = Arc::new(MimicRegistry::new());
        let scheduler = settings.channel_id.as_ref().map(|channel_id| {
            Arc::new(MimicScheduler::new(
                SchedulerConfig::new(channel_id.clone(), bot_user_id),
                registry.clone(),
                services.model.clone(),
                services.search.clone(),
                services.directory.clone(),
            ))
        });

        let mut tools = MimicToolExecutor::new(services.directory, services.repository, registry.clone())
            .with_admin(settings.admin_user_id.clone());
        if let Some(scheduler) = &scheduler {
            tools = tools.with_scheduler(scheduler.clone());
        }

        info!(
            channel_id = settings.channel_id.as_deref().unwrap_or("unset"),
            poster = scheduler.is_some(),
            "Mimic plugin ready"
        );
        Self {
            registry,
            scheduler,
            tools,
        }
    }

    /// Plugin name
    pub fn name(&self) -> &'static str {
        "mimic"
    }

    /// Tool handlers
    pub fn tools(&self) -> &MimicToolExecutor {
        &self.tools
    }

    /// Shared mimic state
    pub fn registry(&self) -> &Arc<MimicRegistry> {
        &self.registry
    }

    /// Background poster, if a mimic channel is configured
    pub fn scheduler(&self) -> Option<&Arc<MimicScheduler>> {
        self.scheduler.as_ref()
    }

    /// Style prompt replacing `agent_id`'s personality while mimicking
    pub fn style_prompt(&self, agent_id: &str) -> Option<String> {
        self.registry.style_prompt(agent_id)
    }

    /// Forward a channel message to the reply handlers
    pub fn on_channel_message(&self, message: ChannelMessage) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.publish(message);
        }
    }

    /// Stop all background posting
    pub fn shutdown(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown();
        }
    }
}
