//! Opinion and preference extraction from a user's messages

use ezra_core::NewPersonalityMemory;

/// Phrases that mark a sentence as a stated opinion
pub const OPINION_PATTERNS: &[&str] = &[
    "i hate",
    "i love",
    "i dislike",
    "i prefer",
    "i always",
    "i never",
    "i think",
    "i believe",
    "i feel",
    "my favorite",
    "my least favorite",
    "i'm a fan of",
    "i can't stand",
    "i'm into",
    "i'm not into",
];

/// Source recorded on extracted memories
pub const FACT_SOURCE: &str = "discord_analysis";
/// Tag recorded on extracted memories
pub const FACT_TAG: &str = "auto_extracted";

/// Distinct opinion sentences, in first-seen order
pub fn extract_facts(messages: &[String]) -> Vec<String> {
    let mut facts: Vec<String> = Vec::new();

    for msg in messages {
        let lower = msg.to_lowercase();
        for pattern in OPINION_PATTERNS {
            if !lower.contains(pattern) {
                continue;
            }
            let sentence = lower
                .split('.')
                .find(|s| s.contains(pattern))
                .map(str::trim)
                .filter(|s| (11..200).contains(&s.chars().count()));
            if let Some(sentence) = sentence {
                if !facts.iter().any(|f| f == sentence) {
                    facts.push(sentence.to_string());
                }
            }
        }
    }

    facts
}

/// Memory records for extracted facts
pub fn to_memories(user_id: &str, channel_id: &str, facts: Vec<String>) -> Vec<NewPersonalityMemory> {
    facts
        .into_iter()
        .map(|content| NewPersonalityMemory {
            user_id: user_id.to_string(),
            content,
            source: FACT_SOURCE.to_string(),
            channel_id: channel_id.to_string(),
            tags: vec![FACT_TAG.to_string()],
            consented: true,
        })
        .collect()
}
