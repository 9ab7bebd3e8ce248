//! Response sanitization.
//!
//! Raw provider output goes through, in order: extraction, truncation to
//! the first turn, artifact removal, the echo guard and the minimum-content
//! guard. A surviving reply is then capped at `max_chars`. The result is
//! never empty and never contains a speaker label.

use super::prompt::PromptLabels;

/// Characters trimmed from both ends of a reply.
const EDGE_ARTIFACTS: &[char] = &['.', ',', '!', '?', ';', ':', ' '];

/// Longest slice of user input quoted back inside a placeholder.
const MAX_QUOTED_CHARS: usize = 60;

/// Which guard, if any, replaced the model's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The model's own text survived.
    Clean,
    /// The model parroted the user; replaced with a clarifying prompt.
    EchoReplaced,
    /// The text was too short; replaced with an engagement prompt.
    TooShortReplaced,
}

/// A sanitized reply and how it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    /// Final reply text.
    pub text: String,
    /// Guard outcome.
    pub outcome: Outcome,
}

impl Sanitized {
    /// Whether a guard had to replace the model output.
    pub fn is_degenerate(&self) -> bool {
        self.outcome != Outcome::Clean
    }
}

/// Stateless reply cleaner.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    human_marker: String,
    assistant_marker: String,
    min_chars: usize,
    max_chars: usize,
}

impl Sanitizer {
    /// Sanitizer for the given labels and length bounds.
    pub fn new(labels: &PromptLabels, min_chars: usize, max_chars: usize) -> Self {
        Self {
            human_marker: format!("{}:", labels.human),
            assistant_marker: format!("{}:", labels.assistant),
            min_chars,
            max_chars: max_chars.max(min_chars).max(1),
        }
    }

    /// Clean `raw` produced for `prompt`, guarding against echoes of `input`.
    pub fn sanitize(&self, raw: &str, prompt: &str, input: &str) -> Sanitized {
        let extracted = self.extract(raw, prompt);
        let first_turn = self.first_turn(extracted.trim_start());
        let cleaned = strip_artifacts(first_turn);

        let input_key = echo_key(input);
        if !input_key.is_empty() && echo_key(&cleaned) == input_key {
            return Sanitized {
                text: self.echo_placeholder(input),
                outcome: Outcome::EchoReplaced,
            };
        }
        if cleaned.chars().count() < self.min_chars {
            return Sanitized {
                text: self.short_placeholder(input),
                outcome: Outcome::TooShortReplaced,
            };
        }
        Sanitized {
            text: self.clamp(&cleaned),
            outcome: Outcome::Clean,
        }
    }

    /// Step 1: drop an echoed prompt, else keep what follows the last
    /// assistant label, else keep everything.
    fn extract<'a>(&self, raw: &'a str, prompt: &str) -> &'a str {
        if !prompt.is_empty() {
            if let Some(rest) = raw.strip_prefix(prompt) {
                return rest;
            }
        }
        match raw.rfind(&self.assistant_marker) {
            Some(idx) => raw
                .get(idx.saturating_add(self.assistant_marker.len())..)
                .unwrap_or_default(),
            None => raw,
        }
    }

    /// Step 2: cut at the first label or newline.
    fn first_turn<'a>(&self, text: &'a str) -> &'a str {
        let cut = [
            text.find(&self.human_marker),
            text.find(&self.assistant_marker),
            text.find('\n'),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(text.len());
        text.get(..cut).unwrap_or(text)
    }

    /// Enforce `max_chars`: keep the first sentence if it fits, else hard cut.
    pub fn clamp(&self, text: &str) -> String {
        if text.chars().count() <= self.max_chars {
            return text.to_owned();
        }
        if let Some(end) = text.find(['.', '!', '?']) {
            let sentence = text.get(..=end).unwrap_or(text).trim();
            let body = sentence.trim_end_matches(EDGE_ARTIFACTS);
            let fits = sentence.chars().count() <= self.max_chars;
            if fits && body.chars().count() >= self.min_chars {
                return sentence.to_owned();
            }
        }
        let cut: String = text.chars().take(self.max_chars).collect();
        format!("{}.", cut.trim_end().trim_end_matches(EDGE_ARTIFACTS))
    }

    /// Placeholder used when the model repeated the user verbatim.
    pub fn echo_placeholder(&self, input: &str) -> String {
        format!(
            "That's interesting that you mentioned '{}'. Can you tell me more about that?",
            self.quote(input)
        )
    }

    /// Placeholder used when the model produced too little text.
    pub fn short_placeholder(&self, input: &str) -> String {
        format!(
            "I find '{}' intriguing. What are your thoughts on it?",
            self.quote(input)
        )
    }

    /// User input made safe to embed in a reply: one line, no labels, bounded.
    fn quote(&self, input: &str) -> String {
        let mut flat = input.split_whitespace().collect::<Vec<_>>().join(" ");
        // Removing one label can splice the remainder into another.
        loop {
            let stripped = flat
                .replace(&self.human_marker, "")
                .replace(&self.assistant_marker, "");
            if stripped == flat {
                break;
            }
            flat = stripped;
        }
        let flat = flat.trim();
        if flat.chars().count() > MAX_QUOTED_CHARS {
            let head: String = flat.chars().take(MAX_QUOTED_CHARS).collect();
            format!("{}...", head.trim_end())
        } else if flat.is_empty() {
            "that".to_owned()
        } else {
            flat.to_owned()
        }
    }
}

/// Step 3: strip one wrapping quote pair, then edge punctuation.
fn strip_artifacts(text: &str) -> String {
    let mut s = text.trim();
    for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”')] {
        if s.chars().count() >= 2 && s.starts_with(open) && s.ends_with(close) {
            s = s
                .strip_prefix(open)
                .and_then(|rest| rest.strip_suffix(close))
                .unwrap_or(s);
            break;
        }
    }
    s.trim_matches(|c: char| EDGE_ARTIFACTS.contains(&c) || c.is_whitespace())
        .to_owned()
}

/// Comparison form for the echo guard: lowercased, edge punctuation ignored.
fn echo_key(text: &str) -> String {
    text.trim_matches(|c: char| EDGE_ARTIFACTS.contains(&c) || c.is_whitespace())
        .to_lowercase()
}
