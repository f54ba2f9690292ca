//! Writing-style profile derived from a user's messages
//!
//! Every statistic here is a pure function of the corpus. Ranked lists are
//! ordered by frequency and then alphabetically, so the same corpus always
//! yields the same profile.

use chrono::{DateTime, Utc};
use ezra_core::ChannelMessage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Words ignored when ranking vocabulary
pub const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall", "i", "you",
    "he", "she", "it", "we", "they", "me", "him", "her", "us", "them", "my", "your", "his", "its",
    "our", "their", "this", "that", "these", "those", "and", "but", "or", "so", "if", "then",
    "than", "of", "in", "on", "at", "to", "for", "with", "by", "from", "up", "about", "into",
    "through", "during", "before", "after", "above", "below", "between", "under", "again",
    "further", "once", "just", "like", "dont", "im",
];

/// Top words kept in a profile
pub const TOP_WORDS: usize = 10;
/// Top bigrams kept in a profile
pub const TOP_PHRASES: usize = 12;
/// Top emojis kept in a profile
pub const TOP_EMOJIS: usize = 5;
/// Sample messages kept in a profile
pub const SAMPLE_COUNT: usize = 5;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z]+").expect("valid word regex"));
static PHRASE_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z0-9']+").expect("valid token regex"));
static EMOJI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[\x{1F600}-\x{1F64F}]|[\x{1F300}-\x{1F5FF}]|[\x{1F680}-\x{1F6FF}]|[\x{2600}-\x{26FF}]|[\x{2700}-\x{27BF}]|<:\w+:\d+>|:\w+:",
    )
    .expect("valid emoji regex")
});
static STOP_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| STOP_WORDS.iter().copied().collect());

/// Per-message rates of Discord formatting habits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatHabits {
    /// Inline code ticks
    pub code_ticks_rate: f64,
    /// Triple-backtick blocks
    pub code_block_rate: f64,
    /// `*` or `**` emphasis
    pub emphasis_rate: f64,
    /// Lines starting with `>`
    pub quote_rate: f64,
    /// Messages spanning several lines
    pub multi_line_rate: f64,
    /// `...`
    pub ellipsis_rate: f64,
}

/// Message length percentiles and burstiness
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LengthDistribution {
    /// 25th percentile
    pub p25: f64,
    /// Median
    pub p50: f64,
    /// 75th percentile
    pub p75: f64,
    /// Fraction of consecutive messages less than 60 s apart
    pub burstiness: f64,
}

/// A user's communication style
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonalityProfile {
    /// Discord user id
    pub user_id: String,
    /// Display name
    pub username: String,
    /// Messages analyzed
    pub message_count: usize,
    /// Mean length in characters
    pub avg_message_length: f64,
    /// Length statistics
    pub length_distribution: LengthDistribution,
    /// Most frequent words
    pub common_words: Vec<String>,
    /// Most frequent bigrams
    pub common_phrases: Vec<String>,
    /// Most frequent emojis
    pub emoji_usage: Vec<String>,
    /// `lowercase`, `uppercase`, `normal` or `mixed`
    pub capitalization: String,
    /// `minimal`, `normal` or `heavy`
    pub punctuation_style: String,
    /// Tone labels
    pub tone_indicators: Vec<String>,
    /// Formatting habits
    pub format_habits: FormatHabits,
    /// Representative messages
    pub sample_messages: Vec<String>,
    /// Rendered style prompt
    pub style_prompt: String,
}

impl PersonalityProfile {
    /// Derive a profile from `messages`; the style prompt is left empty
    pub fn derive(user_id: &str, username: &str, messages: &[ChannelMessage]) -> Self {
        let texts: Vec<String> = messages.iter().map(|m| m.content.clone()).collect();
        let lengths: Vec<usize> = texts.iter().map(|t| t.chars().count()).collect();
        let timestamps: Vec<DateTime<Utc>> = messages.iter().map(|m| m.timestamp).collect();

        let avg_message_length = if lengths.is_empty() {
            0.0
        } else {
            lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
        };

        Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
            message_count: texts.len(),
            avg_message_length,
            length_distribution: length_distribution(&lengths, &timestamps),
            common_words: common_words(&texts, TOP_WORDS),
            common_phrases: common_phrases(&texts, TOP_PHRASES),
            emoji_usage: emojis(&texts, TOP_EMOJIS),
            capitalization: capitalization(&texts).to_string(),
            punctuation_style: punctuation(&texts).to_string(),
            tone_indicators: tone(&texts).into_iter().map(str::to_string).collect(),
            format_habits: format_habits(&texts),
            sample_messages: select_samples(&texts, SAMPLE_COUNT),
            style_prompt: String::new(),
        }
    }

    /// First common phrase, if any
    pub fn top_phrase(&self) -> Option<&str> {
        self.common_phrases.first().map(String::as_str)
    }

    /// First common word, if any
    pub fn top_word(&self) -> Option<&str> {
        self.common_words.first().map(String::as_str)
    }
}

fn fraction(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

/// Dominant capitalization style
pub fn capitalization(messages: &[String]) -> &'static str {
    if messages.is_empty() {
        return "mixed";
    }

    let (mut lower, mut upper, mut normal) = (0, 0, 0);
    for msg in messages {
        if *msg == msg.to_lowercase() {
            lower += 1;
        } else if !msg.is_empty() && *msg == msg.to_uppercase() {
            upper += 1;
        } else if msg.starts_with(|c: char| c.is_ascii_uppercase()) {
            normal += 1;
        }
    }

    let total = messages.len();
    if fraction(lower, total) >= 0.7 {
        "lowercase"
    } else if fraction(upper, total) >= 0.5 {
        "uppercase"
    } else if fraction(normal, total) >= 0.5 {
        "normal"
    } else {
        "mixed"
    }
}

/// Punctuation density class
pub fn punctuation(messages: &[String]) -> &'static str {
    let mut marks = 0usize;
    let mut chars = 0usize;
    for msg in messages {
        for c in msg.chars() {
            chars += 1;
            if matches!(c, '!' | '?' | '.' | ',' | ';' | ':') {
                marks += 1;
            }
        }
    }
    if chars == 0 {
        return "minimal";
    }

    let ratio = marks as f64 / chars as f64;
    if ratio < 0.02 {
        "minimal"
    } else if ratio > 0.08 {
        "heavy"
    } else {
        "normal"
    }
}

fn rank(counts: HashMap<String, usize>, limit: usize) -> Vec<String> {
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(k, _)| k).collect()
}

/// Most frequent non-stop words longer than two letters
pub fn common_words(messages: &[String], limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for msg in messages {
        let lower = msg.to_lowercase();
        for word in WORD_RE.find_iter(&lower).map(|m| m.as_str()) {
            if word.len() > 2 && !STOP_SET.contains(word) {
                *counts.entry(word.to_string()).or_default() += 1;
            }
        }
    }
    rank(counts, limit)
}

/// Most frequent word bigrams of at least four characters
pub fn common_phrases(messages: &[String], limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for msg in messages {
        let lower = msg.to_lowercase();
        let tokens: Vec<&str> = PHRASE_TOKEN_RE.find_iter(&lower).map(|m| m.as_str()).collect();
        for pair in tokens.windows(2) {
            let phrase = pair.join(" ");
            if phrase.len() >= 4 {
                *counts.entry(phrase).or_default() += 1;
            }
        }
    }
    rank(counts, limit)
}

/// Most frequent Unicode and custom emojis
pub fn emojis(messages: &[String], limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for msg in messages {
        for emoji in EMOJI_RE.find_iter(msg) {
            *counts.entry(emoji.as_str().to_string()).or_default() += 1;
        }
    }
    rank(counts, limit)
}

/// Rates of formatting habits per message
pub fn format_habits(messages: &[String]) -> FormatHabits {
    let total = messages.len();
    if total == 0 {
        return FormatHabits::default();
    }

    let count = |pred: &dyn Fn(&str) -> bool| messages.iter().filter(|m| pred(m)).count();
    FormatHabits {
        code_ticks_rate: fraction(count(&|m| m.contains('`')), total),
        code_block_rate: fraction(count(&|m| m.contains("```")), total),
        emphasis_rate: fraction(count(&|m| m.contains('*')), total),
        quote_rate: fraction(count(&|m| m.lines().any(|l| l.trim_start().starts_with('>'))), total),
        multi_line_rate: fraction(count(&|m| m.contains('\n')), total),
        ellipsis_rate: fraction(count(&|m| m.contains("...")), total),
    }
}

/// Tone labels
pub fn tone(messages: &[String]) -> Vec<&'static str> {
    let total = messages.len();
    if total == 0 {
        return vec!["neutral"];
    }

    let count = |pred: &dyn Fn(&str) -> bool| messages.iter().filter(|m| pred(m)).count();
    let exclaim = fraction(count(&|m| m.contains('!')), total);
    let question = fraction(count(&|m| m.contains('?')), total);
    let laughing = fraction(
        count(&|m| {
            let lower = m.to_lowercase();
            lower.contains("lol") || lower.contains("lmao") || lower.contains("haha")
        }),
        total,
    );
    let shouting = fraction(count(&|m| m.chars().count() > 3 && m == m.to_uppercase()), total);
    let long = fraction(count(&|m| m.chars().count() > 200), total);

    let mut labels = Vec::new();
    if exclaim > 0.3 {
        labels.push("enthusiastic");
    }
    if question > 0.2 {
        labels.push("inquisitive");
    }
    if laughing > 0.2 {
        labels.push("humorous");
    }
    if shouting > 0.1 {
        labels.push("expressive");
    }
    if long > 0.3 {
        labels.push("detailed");
    } else if long < 0.1 {
        labels.push("concise");
    }
    if labels.is_empty() {
        labels.push("casual");
    }
    labels
}

/// Length percentiles and burstiness
///
/// Timestamps are sorted before adjacent gaps are measured.
pub fn length_distribution(lengths: &[usize], timestamps: &[DateTime<Utc>]) -> LengthDistribution {
    if lengths.is_empty() {
        return LengthDistribution::default();
    }

    let mut sorted = lengths.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();

    let mut times = timestamps.to_vec();
    times.sort();
    let burstiness = if times.len() > 1 {
        let bursts = times
            .windows(2)
            .filter(|w| (w[1] - w[0]).num_milliseconds() < 60_000)
            .count();
        bursts as f64 / (times.len() - 1) as f64
    } else {
        0.0
    };

    LengthDistribution {
        p25: sorted[n / 4] as f64,
        p50: sorted[n / 2] as f64,
        p75: sorted[n * 3 / 4] as f64,
        burstiness,
    }
}

/// A short, a medium and a long message, topped up with medium ones
pub fn select_samples(messages: &[String], count: usize) -> Vec<String> {
    if messages.len() <= count {
        return messages.to_vec();
    }

    let mut short = Vec::new();
    let mut medium = Vec::new();
    let mut long = Vec::new();
    for msg in messages {
        match msg.chars().count() {
            0..=49 => short.push(msg),
            50..=149 => medium.push(msg),
            _ => long.push(msg),
        }
    }

    let mut samples: Vec<String> = [short.first(), medium.first(), long.first()]
        .into_iter()
        .flatten()
        .map(|m| m.to_string())
        .collect();
    for msg in medium.iter().skip(1) {
        if samples.len() >= count {
            break;
        }
        samples.push(msg.to_string());
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_capitalization_thresholds() {
        let lower = strings(&["hey", "ok", "sure", "yes", "no", "lol", "k", "Hi", "Yo", "Sup"]);
        assert_eq!(capitalization(&lower), "lowercase");

        let shouting = strings(&["WHAT", "NO WAY", "Hello there", "ok"]);
        assert_eq!(capitalization(&shouting), "uppercase");

        let normal = strings(&["Hello there", "Sounds good", "ok", "Fine"]);
        assert_eq!(capitalization(&normal), "normal");

        let mixed = strings(&["hello", "wHat", "Fine", "yes", "mAybe"]);
        assert_eq!(capitalization(&mixed), "mixed");
    }

    #[test]
    fn test_punctuation_classes() {
        assert_eq!(punctuation(&strings(&["no punctuation here at all really"])), "minimal");
        assert_eq!(punctuation(&strings(&["what?!", "ok."])), "heavy");
        assert_eq!(punctuation(&strings(&["this sentence has one mark, nice"])), "normal");
        assert_eq!(punctuation(&[]), "minimal");
    }

    #[test]
    fn test_common_words_skip_stop_words_and_short_tokens() {
        let msgs = strings(&[
            "I like neovim and the neovim plugins",
            "neovim is my editor, rust too",
            "Rust and go",
        ]);
        let words = common_words(&msgs, 3);
        assert_eq!(words, vec!["neovim", "rust", "editor"]);
        assert!(!words.iter().any(|w| w == "the" || w == "go"));
    }

    #[test]
    fn test_common_phrases() {
        let msgs = strings(&["i use arch btw", "i use arch every day", "a b"]);
        let phrases = common_phrases(&msgs, 2);
        assert_eq!(phrases, vec!["i use", "use arch"]);
        // "a b" is shorter than four characters
        assert!(!common_phrases(&msgs, 20).contains(&"a b".to_string()));
    }

    #[test]
    fn test_emojis() {
        let msgs = strings(&["nice 😀 😀", "<:pepe:12345> lol :fire:", "☀ ok"]);
        let found = emojis(&msgs, 5);
        assert_eq!(found[0], "😀");
        assert!(found.contains(&"<:pepe:12345>".to_string()));
        assert!(found.contains(&":fire:".to_string()));
        assert!(found.contains(&"☀".to_string()));
    }

    #[test]
    fn test_format_habits() {
        let msgs = strings(&["use `ls`", "```rust\nfn main() {}\n```", "> quoted\nreply", "hmm..."]);
        let habits = format_habits(&msgs);
        assert_eq!(habits.code_ticks_rate, 0.5);
        assert_eq!(habits.code_block_rate, 0.25);
        assert_eq!(habits.quote_rate, 0.25);
        assert_eq!(habits.multi_line_rate, 0.5);
        assert_eq!(habits.ellipsis_rate, 0.25);
        assert_eq!(habits.emphasis_rate, 0.0);
    }

    #[test]
    fn test_tone_labels() {
        assert_eq!(tone(&[]), vec!["neutral"]);
        let msgs = strings(&["lol that is wild", "haha yes", "ok", "sure thing", "fine"]);
        assert_eq!(tone(&msgs), vec!["humorous", "concise"]);
        let calm = vec!["a".repeat(120); 4];
        assert_eq!(tone(&calm), vec!["casual"]);
    }

    #[test]
    fn test_length_distribution_and_burstiness() {
        let t = |s: i64| Utc.timestamp_opt(1_700_000_000 + s, 0).unwrap();
        // out of order on purpose
        let times = vec![t(0), t(300), t(30), t(320)];
        let dist = length_distribution(&[10, 40, 20, 30], &times);
        assert_eq!(dist.p25, 20.0);
        assert_eq!(dist.p50, 30.0);
        assert_eq!(dist.p75, 40.0);
        // gaps 30, 270, 20
        assert!((dist.burstiness - 2.0 / 3.0).abs() < 1e-9);

        assert_eq!(length_distribution(&[5], &[t(0)]).burstiness, 0.0);
    }

    #[test]
    fn test_sample_selection() {
        let short = "short one".to_string();
        let medium: Vec<String> = (0..5).map(|i| format!("{i}{}", "m".repeat(60))).collect();
        let long = "l".repeat(160);
        let mut msgs = vec![short.clone(), long.clone()];
        msgs.extend(medium.clone());

        let samples = select_samples(&msgs, 5);
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[0], short);
        assert_eq!(samples[1], medium[0]);
        assert_eq!(samples[2], long);
        assert_eq!(samples[3], medium[1]);

        let few = strings(&["a", "b"]);
        assert_eq!(select_samples(&few, 5), few);
    }
}
