//! Prompt assembly.
//!
//! Turns (personality, profile, recent history, new input) into one
//! completion prompt that ends on an open assistant label. No provider
//! length limits are applied here.

use crate::personality::Personality;
use crate::store::{Message, Role, UserProfile};

/// Opening word of the simplified retry prompt. The retry reply is this
/// word followed by whatever the provider continues with.
pub const RETRY_LEAD: &str = "That's";

/// Speaker labels and assistant name used in prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptLabels {
    /// Label for user turns (`Human`).
    pub human: String,
    /// Label for assistant turns (`AI`).
    pub assistant: String,
    /// Name the assistant goes by in the framing sentence.
    pub assistant_name: String,
}

impl Default for PromptLabels {
    fn default() -> Self {
        Self {
            human: "Human".to_owned(),
            assistant: "AI".to_owned(),
            assistant_name: "ConvoAI".to_owned(),
        }
    }
}

impl PromptLabels {
    /// `"Human:"`-style marker for a role.
    pub fn marker(&self, role: Role) -> String {
        match role {
            Role::User => format!("{}:", self.human),
            Role::Assistant => format!("{}:", self.assistant),
        }
    }

    /// Stop sequences that end generation when the model starts a new turn.
    pub fn stop_sequences(&self) -> Vec<String> {
        vec![
            format!("\n{}:", self.human),
            format!("\n{}:", self.assistant),
        ]
    }
}

/// Builds completion prompts.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    labels: PromptLabels,
    history_window: usize,
}

impl PromptAssembler {
    /// Assembler rendering at most `history_window` prior messages.
    pub fn new(labels: PromptLabels, history_window: usize) -> Self {
        Self {
            labels,
            history_window,
        }
    }

    /// The labels this assembler renders with.
    pub fn labels(&self) -> &PromptLabels {
        &self.labels
    }

    /// How many prior messages a prompt may include.
    pub fn history_window(&self) -> usize {
        self.history_window
    }

    /// Build the full prompt for one turn.
    ///
    /// `history` must not contain `input` itself; only its last
    /// `history_window` entries are rendered, oldest first.
    pub fn assemble(
        &self,
        personality: &Personality,
        profile: &UserProfile,
        history: &[Message],
        input: &str,
    ) -> String {
        let labels = &self.labels;
        let mut prompt = String::new();

        let partner = profile.display_name.as_deref().unwrap_or("a human");
        prompt.push_str(&format!(
            "This is a conversation between {partner} and {}, an AI assistant.\n",
            labels.assistant_name
        ));

        let hint = match personality.prompt_style_hint.trim() {
            "" => "responds naturally",
            h => h,
        };
        prompt.push_str(&format!(
            "{} is {}; it {hint}.\n\n",
            labels.assistant_name,
            lower_first(personality.description.trim().trim_end_matches('.'))
        ));

        let start = history.len().saturating_sub(self.history_window);
        for message in history.iter().skip(start) {
            prompt.push_str(&format!(
                "{} {}\n",
                labels.marker(message.role),
                one_line(&message.text)
            ));
        }

        prompt.push_str(&format!(
            "{} {}\n{}",
            labels.marker(Role::User),
            one_line(input),
            labels.marker(Role::Assistant)
        ));
        prompt
    }

    /// Short prompt for the single regeneration attempt.
    pub fn simplified(&self, input: &str) -> String {
        format!(
            "{} {}\n{} {RETRY_LEAD}",
            self.labels.marker(Role::User),
            one_line(input),
            self.labels.marker(Role::Assistant)
        )
    }
}

/// Collapse a message onto one line so each turn stays one prompt line.
fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => "a helpful assistant".to_owned(),
    }
}
