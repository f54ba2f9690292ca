//! Profile analysis with a per-guild cache

use crate::facts::{extract_facts, to_memories};
use crate::profile::PersonalityProfile;
use crate::prompt::{render_style_prompt, with_memories, MEMORY_LIMIT, MEMORY_QUERY};
use ezra_core::{ChannelDirectory, EzraError, PersonalityRepository, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Guild key used for channels outside any guild
pub const DM_GUILD: &str = "dm";

/// Builds and caches personality profiles
pub struct StyleAnalyzer {
    directory: Arc<dyn ChannelDirectory>,
    repository: Arc<dyn PersonalityRepository>,
}

impl StyleAnalyzer {
    /// Create an analyzer over the given collaborators
    pub fn new(directory: Arc<dyn ChannelDirectory>, repository: Arc<dyn PersonalityRepository>) -> Self {
        Self { directory, repository }
    }

    /// Profile for `user_id`, read from cache unless `force_refresh` is set
    ///
    /// A cached profile gets a freshly rendered style prompt so newly
    /// approved memories are picked up. A fresh analysis stores extracted
    /// opinion facts and then caches the profile JSON.
    pub async fn analyze(
        &self,
        channel_id: &str,
        user_id: &str,
        message_count: usize,
        force_refresh: bool,
    ) -> Result<PersonalityProfile> {
        let guild_id = self
            .directory
            .channel_guild(channel_id)
            .await?
            .unwrap_or_else(|| DM_GUILD.to_string());

        if !force_refresh {
            match self.repository.get_personality_profile(user_id, &guild_id).await {
                Ok(Some(json)) => match serde_json::from_str::<PersonalityProfile>(&json) {
                    Ok(mut profile) => {
                        debug!(user_id = %user_id, guild_id = %guild_id, "Using cached personality profile");
                        profile.style_prompt = self.style_prompt(&profile).await;
                        return Ok(profile);
                    }
                    Err(e) => warn!(user_id = %user_id, error = %e, "Cached profile unreadable, re-analyzing"),
                },
                Ok(None) => {}
                Err(e) => warn!(user_id = %user_id, error = %e, "Profile cache lookup failed"),
            }
        }

        let messages = self
            .directory
            .fetch_user_messages(channel_id, user_id, message_count)
            .await?;
        if messages.is_empty() {
            return Err(EzraError::ProfileCorpusEmpty(user_id.to_string()));
        }
        let username = self.directory.username(user_id).await?;

        let mut profile = PersonalityProfile::derive(user_id, &username, &messages);

        let texts: Vec<String> = messages.into_iter().map(|m| m.content).collect();
        let memories = to_memories(user_id, channel_id, extract_facts(&texts));
        let extracted = memories.len();
        for memory in memories {
            if let Err(e) = self.repository.store_personality_memory(memory).await {
                warn!(user_id = %user_id, error = %e, "Failed to store personality fact");
            }
        }

        profile.style_prompt = self.style_prompt(&profile).await;

        let json = serde_json::to_string(&profile)?;
        if let Err(e) = self
            .repository
            .store_personality_profile(user_id, &guild_id, &json)
            .await
        {
            warn!(user_id = %user_id, error = %e, "Failed to cache personality profile");
        }

        info!(
            user_id = %user_id,
            guild_id = %guild_id,
            messages = profile.message_count,
            facts = extracted,
            "Personality profile analyzed"
        );
        Ok(profile)
    }

    async fn style_prompt(&self, profile: &PersonalityProfile) -> String {
        let base = render_style_prompt(profile);
        match self
            .repository
            .retrieve_personality_memories(&profile.user_id, MEMORY_QUERY, MEMORY_LIMIT)
            .await
        {
            Ok(memories) => with_memories(base, &memories),
            Err(e) => {
                warn!(user_id = %profile.user_id, error = %e, "Memory retrieval failed");
                base
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ezra_core::testing::{message, InMemoryRepository, RecordingDirectory};

    fn fixture() -> (Arc<RecordingDirectory>, Arc<InMemoryRepository>, StyleAnalyzer) {
        let directory = Arc::new(RecordingDirectory::new());
        let repository = Arc::new(InMemoryRepository::new());
        directory.add_channel("c1", "g1");
        directory.add_user("u1", "sam");
        let analyzer = StyleAnalyzer::new(directory.clone(), repository.clone());
        (directory, repository, analyzer)
    }

    #[tokio::test]
    async fn test_empty_corpus_is_an_error() {
        let (_, _, analyzer) = fixture();
        let err = analyzer.analyze("c1", "u1", 100, false).await.unwrap_err();
        assert_eq!(err.kind(), "profile_corpus_empty");
    }

    #[tokio::test]
    async fn test_cached_profile_is_reused_with_fresh_prompt() {
        let (directory, repository, analyzer) = fixture();
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        directory.add_message(message("c1", "u1", "i love neovim so much honestly", ts));
        directory.add_message(message("c1", "u1", "neovim lol", ts));

        let first = analyzer.analyze("c1", "u1", 100, false).await.unwrap();
        assert_eq!(first.username, "sam");
        assert_eq!(first.message_count, 2);
        assert_eq!(repository.profile_writes(), 1);
        assert!(repository.cached_profile("u1", "g1").is_some());
        assert_eq!(repository.memories_for("u1").len(), 1);
        assert!(first.style_prompt.contains("- i love neovim so much honestly"));

        repository.add_memory("u1", "prefers dark themes");
        directory.add_message(message("c1", "u1", "new message", ts));
        let second = analyzer.analyze("c1", "u1", 100, false).await.unwrap();
        assert_eq!(repository.profile_writes(), 1);
        assert_eq!(second.message_count, 2);
        assert!(second.style_prompt.contains("- prefers dark themes"));

        let forced = analyzer.analyze("c1", "u1", 100, true).await.unwrap();
        assert_eq!(forced.message_count, 3);
        assert_eq!(repository.profile_writes(), 2);
    }

    fn base_fields(profile: &PersonalityProfile) -> String {
        let mut base = profile.clone();
        base.style_prompt.clear();
        serde_json::to_string(&base).unwrap()
    }

    #[tokio::test]
    async fn test_cached_profile_round_trips_byte_for_byte() {
        let (directory, repository, analyzer) = fixture();
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        for (i, text) in ["i think tabs are better. fight me", "lol ok", "Shipping it today!", "why..."]
            .iter()
            .enumerate()
        {
            directory.add_message(message("c1", "u1", text, ts + chrono::Duration::seconds(i as i64 * 45)));
        }

        let first = analyzer.analyze("c1", "u1", 100, false).await.unwrap();
        let cached = repository.cached_profile("u1", "g1").unwrap();
        assert_eq!(serde_json::to_string(&first).unwrap(), cached);

        let second = analyzer.analyze("c1", "u1", 100, false).await.unwrap();
        assert_eq!(serde_json::to_string(&second).unwrap(), cached);

        // a new memory only changes the regenerated prompt
        repository.add_memory("u1", "prefers dark themes");
        let third = analyzer.analyze("c1", "u1", 100, false).await.unwrap();
        assert_ne!(third.style_prompt, first.style_prompt);
        assert_eq!(base_fields(&third), base_fields(&first));
        assert_eq!(repository.cached_profile("u1", "g1").unwrap(), cached);
    }

    #[tokio::test]
    async fn test_force_refresh_rederives_profile() {
        let (directory, repository, analyzer) = fixture();
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        directory.add_message(message("c1", "u1", "lol ok", ts));
        let first = analyzer.analyze("c1", "u1", 100, false).await.unwrap();
        assert_eq!(first.capitalization, "lowercase");

        directory.add_message(message("c1", "u1", "THIS IS HUGE NEWS", ts + chrono::Duration::seconds(10)));
        directory.add_message(message("c1", "u1", "WE SHIP TODAY", ts + chrono::Duration::seconds(20)));
        let cached = analyzer.analyze("c1", "u1", 100, false).await.unwrap();
        assert_eq!(base_fields(&cached), base_fields(&first));

        let forced = analyzer.analyze("c1", "u1", 100, true).await.unwrap();
        assert_eq!(forced.message_count, 3);
        assert_eq!(forced.capitalization, "uppercase");
        assert_ne!(base_fields(&forced), base_fields(&first));
        assert_eq!(
            repository.cached_profile("u1", "g1").unwrap(),
            serde_json::to_string(&forced).unwrap()
        );
    }

    #[tokio::test]
    async fn test_dm_channels_cache_under_dm() {
        let (directory, repository, analyzer) = fixture();
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        directory.add_message(message("dm-7", "u1", "hey there", ts));

        analyzer.analyze("dm-7", "u1", 100, false).await.unwrap();
        assert!(repository.cached_profile("u1", DM_GUILD).is_some());
    }
}
