//! Best-effort profile extraction from user input.
//!
//! Two independent scans over the lowercased input: a display name after
//! phrases like "my name is", and interest categories when the user says
//! something like "I love". Trigger phrases match on word boundaries, so
//! "him" never triggers "i'm". Category keywords only need a leading
//! boundary, so "guitars" counts as "guitar"; keywords of two letters or
//! fewer must match whole, so "air" never counts as "ai".

use std::sync::LazyLock;

use regex::Regex;

/// Name trigger phrases, in priority order.
pub const NAME_TRIGGERS: [&str; 4] = ["my name is", "i'm", "call me", "i am"];

/// Interest trigger phrases, in priority order.
pub const INTEREST_TRIGGERS: [&str; 5] = ["i love", "i like", "i enjoy", "interested in", "my hobby"];

/// Category -> keywords. A category matches if any keyword occurs.
pub const INTEREST_CATEGORIES: &[(&str, &[&str])] = &[
    ("sports", &["football", "soccer", "basketball", "tennis", "swimming", "running", "gym"]),
    ("technology", &["programming", "coding", "ai", "machine learning", "computers", "software"]),
    ("music", &["music", "guitar", "piano", "singing", "concerts", "bands"]),
    ("reading", &["books", "reading", "novels", "literature"]),
    ("cooking", &["cooking", "baking", "recipes", "food"]),
    ("travel", &["travel", "traveling", "vacation", "countries"]),
    ("movies", &["movies", "films", "cinema", "netflix"]),
    ("games", &["games", "gaming", "video games", "board games"]),
];

/// Keywords at most this long must match as whole words.
const WHOLE_WORD_KEYWORD_LEN: usize = 2;

fn phrase_regex(phrase: &str) -> Option<Regex> {
    Regex::new(&format!(r"\b{}\b", regex::escape(phrase))).ok()
}

fn keyword_regex(keyword: &str) -> Option<Regex> {
    if keyword.chars().count() <= WHOLE_WORD_KEYWORD_LEN {
        return phrase_regex(keyword);
    }
    Regex::new(&format!(r"\b{}", regex::escape(keyword))).ok()
}

static NAME_PATTERNS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| NAME_TRIGGERS.iter().filter_map(|p| phrase_regex(p)).collect());

static INTEREST_PATTERNS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| INTEREST_TRIGGERS.iter().filter_map(|p| phrase_regex(p)).collect());

static CATEGORY_PATTERNS: LazyLock<Vec<(&'static str, Vec<Regex>)>> = LazyLock::new(|| {
    INTEREST_CATEGORIES
        .iter()
        .map(|(category, keywords)| {
            (
                *category,
                keywords.iter().filter_map(|k| keyword_regex(k)).collect(),
            )
        })
        .collect()
});

/// Find a display name in `text`.
///
/// Triggers are tried in priority order. For a trigger that occurs, the
/// first word after its last occurrence is taken, stripped of surrounding
/// punctuation and title-cased; it is accepted only if it is alphabetic
/// and longer than one character. Otherwise the next trigger is tried.
pub fn extract_name(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    NAME_PATTERNS.iter().find_map(|pattern| {
        let last = pattern.find_iter(&lowered).last()?;
        let token = lowered.get(last.end()..)?.split_whitespace().next()?;
        let token = token.trim_matches(|c: char| !c.is_alphanumeric());
        let accepted = token.chars().count() > 1 && token.chars().all(char::is_alphabetic);
        accepted.then(|| title_case(token))
    })
}

/// Interest categories mentioned in `text`, in table order.
///
/// Empty unless an interest trigger occurs. When one does, the whole input
/// is classified and every matching category is returned.
pub fn extract_interests(text: &str) -> Vec<&'static str> {
    let lowered = text.to_lowercase();
    if !INTEREST_PATTERNS.iter().any(|p| p.is_match(&lowered)) {
        return Vec::new();
    }
    CATEGORY_PATTERNS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| k.is_match(&lowered)))
        .map(|(category, _)| *category)
        .collect()
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
