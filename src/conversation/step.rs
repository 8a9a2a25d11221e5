//! Conversation cursor and the option menus offered to the client.

use serde::{Deserialize, Serialize};

/// Ordered cursor through an SOS flow.
///
/// The cursor is held by the client and sent back on every turn; a step
/// names the question being entered, and entering it persists the answer to
/// the question asked one step earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStep {
    /// Dispatcher-only pre-step that picks craving vs energy.
    IdentifyStruggle,
    Welcome,
    IdentifyCraving,
    IdentifyBlocker,
    GaugeIntensity,
    GaugeEnergy,
    IdentifyLocation,
    IdentifyTrigger,
    IdentifyApproach,
    SuggestTactic,
    Encouragement,
    /// Energy only: did the client do the suggested activity.
    CheckActivityCompletion,
    RateResult,
    Close,
}

impl ConversationStep {
    /// Every step, in flow order.
    pub const ALL: [ConversationStep; 14] = [
        ConversationStep::IdentifyStruggle,
        ConversationStep::Welcome,
        ConversationStep::IdentifyCraving,
        ConversationStep::IdentifyBlocker,
        ConversationStep::GaugeIntensity,
        ConversationStep::GaugeEnergy,
        ConversationStep::IdentifyLocation,
        ConversationStep::IdentifyTrigger,
        ConversationStep::IdentifyApproach,
        ConversationStep::SuggestTactic,
        ConversationStep::Encouragement,
        ConversationStep::CheckActivityCompletion,
        ConversationStep::RateResult,
        ConversationStep::Close,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStep::IdentifyStruggle => "IDENTIFY_STRUGGLE",
            ConversationStep::Welcome => "WELCOME",
            ConversationStep::IdentifyCraving => "IDENTIFY_CRAVING",
            ConversationStep::IdentifyBlocker => "IDENTIFY_BLOCKER",
            ConversationStep::GaugeIntensity => "GAUGE_INTENSITY",
            ConversationStep::GaugeEnergy => "GAUGE_ENERGY",
            ConversationStep::IdentifyLocation => "IDENTIFY_LOCATION",
            ConversationStep::IdentifyTrigger => "IDENTIFY_TRIGGER",
            ConversationStep::IdentifyApproach => "IDENTIFY_APPROACH",
            ConversationStep::SuggestTactic => "SUGGEST_TACTIC",
            ConversationStep::Encouragement => "ENCOURAGEMENT",
            ConversationStep::CheckActivityCompletion => "CHECK_ACTIVITY_COMPLETION",
            ConversationStep::RateResult => "RATE_RESULT",
            ConversationStep::Close => "CLOSE",
        }
    }
}

impl std::fmt::Display for ConversationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConversationStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase();
        ConversationStep::ALL
            .iter()
            .copied()
            .find(|step| step.as_str() == wanted)
            .ok_or_else(|| format!("Unknown conversation step: {}", s))
    }
}

/// A choice offered to the client: either a bare label or a structured option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OfferedOption {
    Plain(String),
    Choice(Choice),
}

/// Structured option rendered as a button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    pub name: String,
    /// Machine value sent back when picked (defaults to `name`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Longer helper text shown under the name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl OfferedOption {
    /// The string the client sends back when this option is picked.
    pub fn value(&self) -> &str {
        match self {
            OfferedOption::Plain(label) => label,
            OfferedOption::Choice(choice) => choice.value.as_deref().unwrap_or(&choice.name),
        }
    }
}

/// Compile-time option used in the static step tables.
#[derive(Debug, Clone, Copy)]
pub struct StaticChoice {
    pub emoji: Option<&'static str>,
    pub name: &'static str,
    pub value: Option<&'static str>,
}

impl StaticChoice {
    pub const fn new(emoji: &'static str, name: &'static str) -> Self {
        Self {
            emoji: Some(emoji),
            name,
            value: None,
        }
    }

    pub const fn plain(name: &'static str) -> Self {
        Self {
            emoji: None,
            name,
            value: None,
        }
    }

    pub const fn valued(emoji: &'static str, name: &'static str, value: &'static str) -> Self {
        Self {
            emoji: Some(emoji),
            name,
            value: Some(value),
        }
    }
}

impl From<&StaticChoice> for OfferedOption {
    fn from(choice: &StaticChoice) -> Self {
        match (choice.emoji, choice.value) {
            (None, None) => OfferedOption::Plain(choice.name.to_string()),
            (emoji, value) => OfferedOption::Choice(Choice {
                emoji: emoji.map(str::to_string),
                name: choice.name.to_string(),
                value: value.map(str::to_string),
                text: None,
            }),
        }
    }
}

/// Accept the current suggestion.
pub const ACCEPT_OPTION: &str = "Yes, I'll try it";
/// Ask for the secondary suggestion (offered once).
pub const ANOTHER_IDEA_OPTION: &str = "Another idea";

/// The 1-10 rating scale.
pub fn rating_options() -> Vec<OfferedOption> {
    (1..=10).map(|n| OfferedOption::Plain(n.to_string())).collect()
}

/// Options shown with a tactic suggestion.
pub fn tactic_options(second_round: bool) -> Vec<OfferedOption> {
    if second_round {
        vec![OfferedOption::Plain(ACCEPT_OPTION.to_string())]
    } else {
        vec![
            OfferedOption::Plain(ACCEPT_OPTION.to_string()),
            OfferedOption::Plain(ANOTHER_IDEA_OPTION.to_string()),
        ]
    }
}

/// Whether an answer asks for the secondary suggestion.
pub fn is_another_idea(answer: &str) -> bool {
    let normalized = answer.trim().to_lowercase();
    normalized == ANOTHER_IDEA_OPTION.to_lowercase()
        || normalized.contains("another")
        || normalized.contains("something else")
        || normalized.contains("different")
}
