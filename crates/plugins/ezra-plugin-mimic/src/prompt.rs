//! Prompt rendering for mimic mode

use crate::profile::PersonalityProfile;
use ezra_core::{PersonalityMemory, SearchResult};
use std::fmt::Write;

/// Query used to pull approved memories into a style prompt
pub const MEMORY_QUERY: &str = "preference opinion fact";
/// Memories appended to a style prompt
pub const MEMORY_LIMIT: usize = 5;

const SAMPLE_CUT: usize = 140;

/// System prompt for query generation
pub const QUERY_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that generates search queries. Respond with only the search query, nothing else.";

/// Join a list for a prompt, `"none"` when empty
pub fn join_or_none(items: &[String], sep: &str) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(sep)
    }
}

/// Render the system prompt that makes the model write as the profiled user
pub fn render_style_prompt(profile: &PersonalityProfile) -> String {
    let mut b = String::new();

    let _ = writeln!(b, "You ARE {}. You are writing as yourself on Discord.", profile.username);
    b.push_str("Write exactly as you normally would. Be authentic to your own communication style.\n\n");

    b.push_str("STYLE RULES:\n");
    b.push_str(match profile.capitalization.as_str() {
        "lowercase" => "- lowercase style: mostly lowercase, minimal sentence caps.\n",
        "uppercase" => "- emphasis caps: occasional ALL CAPS for emphasis.\n",
        "mixed" => "- mixed casual capitalization.\n",
        _ => "- normal capitalization.\n",
    });
    let _ = writeln!(b, "- punctuation: {}", profile.punctuation_style);

    if !profile.tone_indicators.is_empty() {
        let _ = writeln!(b, "- tone: {}", profile.tone_indicators.join(", "));
    }
    if !profile.common_words.is_empty() {
        let _ = writeln!(b, "- common words: {}", profile.common_words.join(", "));
    }
    if !profile.common_phrases.is_empty() {
        let _ = writeln!(b, "- common phrases: {}", profile.common_phrases.join(", "));
    }
    if profile.emoji_usage.is_empty() {
        b.push_str("- emoji: rarely\n");
    } else {
        let _ = writeln!(b, "- emoji set: {}", profile.emoji_usage.join(" "));
    }

    let habits = &profile.format_habits;
    b.push_str("- formatting habits:\n");
    let _ = writeln!(
        b,
        "  - code ticks rate ~{:.2}, code blocks ~{:.2}, multiline ~{:.2}, ellipses ~{:.2}",
        habits.code_ticks_rate, habits.code_block_rate, habits.multi_line_rate, habits.ellipsis_rate
    );

    if profile.avg_message_length < 50.0 {
        b.push_str("- message length: short and concise\n");
    } else if profile.avg_message_length > 150.0 {
        b.push_str("- message length: longer, detailed messages\n");
    }

    b.push_str("\nIMPORTANT GUIDELINES:\n");
    b.push_str("- Write naturally and authentically in your own style.\n");
    b.push_str("- Do NOT quote the provided examples verbatim - use them as style reference only.\n");
    b.push_str("- Stay true to your communication patterns and vocabulary.\n");
    b.push_str("- Be authentic to yourself in every response.\n");

    if !profile.sample_messages.is_empty() {
        b.push_str("\nEXAMPLES (pattern only, never copy):\n");
        for sample in &profile.sample_messages {
            let flat = sample.replace('\n', " ");
            let line = if flat.chars().count() > SAMPLE_CUT {
                let cut: String = flat.chars().take(SAMPLE_CUT).collect();
                format!("{cut}…")
            } else {
                flat
            };
            let _ = writeln!(b, "- {line}");
        }
    }

    b.push_str("\nRespond naturally as yourself. Be authentic to your communication style in every message.\n");
    b
}

/// Append approved memories to a rendered style prompt
///
/// Returns the base prompt unchanged when no memory has content.
pub fn with_memories(base: String, memories: &[PersonalityMemory]) -> String {
    let facts: Vec<&str> = memories
        .iter()
        .map(|m| m.content.as_str())
        .filter(|c| !c.is_empty())
        .collect();
    if facts.is_empty() {
        return base;
    }

    let mut b = base;
    b.push_str("\n\nREFERENCE MEMORIES (approved facts - do not invent new ones):\n");
    for fact in facts {
        let _ = writeln!(b, "- {fact}");
    }
    b.push_str("\nUse these memories to stay consistent. Do not claim knowledge beyond these approved memories.\n");
    b
}

fn style_guidelines(profile: &PersonalityProfile) -> String {
    format!(
        "Style guidelines:\n- Capitalization: {}\n- Punctuation: {}\n- Tone: {}\n- Common phrases: {}\n- Emoji usage: {}",
        profile.capitalization,
        profile.punctuation_style,
        join_or_none(&profile.tone_indicators, ", "),
        join_or_none(&profile.common_phrases, ", "),
        join_or_none(&profile.emoji_usage, " "),
    )
}

/// Ask for a short search query matching the user's interests
pub fn search_query_prompt(profile: &PersonalityProfile) -> String {
    format!(
        "Based on this user's communication style and interests, generate a search query for something they would find fascinating or want to share.\n\n\
         User profile:\n- Common words/phrases: {}\n- Tone: {}\n- Interests (from messages): {}\n\n\
         Generate a single, specific search query (2-5 words) for something interesting, recent, or relevant that this person would want to share.\n\n\
         Search query:",
        join_or_none(&profile.common_words, ", "),
        join_or_none(&profile.tone_indicators, ", "),
        join_or_none(&profile.common_phrases, ", "),
    )
}

/// Ask for a post sharing a search result
pub fn grounded_post_prompt(profile: &PersonalityProfile, result: &SearchResult) -> String {
    format!(
        "You are posting as {}. Write a short Discord message (1-2 sentences max) sharing this article in their style.\n\n\
         Article:\nTitle: {}\nURL: {}\nSnippet: {}\n\n{}\n\n\
         Write a casual, engaging message that they would write. Include the URL. Keep it authentic to their style.",
        profile.username,
        result.title,
        result.url,
        result.snippet,
        style_guidelines(profile),
    )
}

/// Ask for a self-contained post
pub fn free_post_prompt(profile: &PersonalityProfile) -> String {
    format!(
        "You are {}. Write a short Discord message (1-2 sentences max) that they would naturally post, \
         such as a thought, a reaction or something they find interesting.\n\n{}\n\n\
         Write something authentic to their style. Don't reference external links or articles.",
        profile.username,
        style_guidelines(profile),
    )
}

/// Ask for a reply to someone else's channel message
pub fn reply_prompt(profile: &PersonalityProfile, original: &str, author: &str) -> String {
    format!(
        "You are {}. Someone posted this message in the channel:\n\n\"{}\" (by {})\n\n\
         Write a short response (1-2 sentences max) that they would naturally post.\n\n{}\n\n\
         Write something authentic to their style. Keep it natural and conversational.",
        profile.username,
        original,
        author,
        style_guidelines(profile),
    )
}

/// Normalize a model-generated search query
///
/// Trims, strips surrounding quotes, folds newlines and collapses runs of
/// whitespace into single spaces.
pub fn clean_query(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = trimmed.trim_matches(|c| c == '"' || c == '\'');
    unquoted.split_whitespace().collect::<Vec<_>>().join(" ")
}
