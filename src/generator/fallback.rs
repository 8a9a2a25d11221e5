//! Canned coach lines used when generation is unavailable.

use super::GenerationContext;
use crate::conversation::ConversationStep;
use crate::storage::IncidentKind;

const GENERIC_LINE: &str = "I'm here with you, {name}. Tell me a little more about what's going on.";

fn template(kind: IncidentKind, ctx: &GenerationContext) -> &'static str {
    use ConversationStep::*;

    if ctx.follow_up {
        return match kind {
            IncidentKind::Craving => "Checking in, {name}. How strong is the craving now, from 1 to 10?",
            IncidentKind::Energy => "Hey {name}, checking in. Did you get a chance to try {intervention}?",
        };
    }

    match (kind, ctx.step) {
        (_, IdentifyStruggle) => {
            "Hi {name}, I'm here for you. Are you dealing with a craving or low energy right now?"
        }
        (_, SuggestTactic) if ctx.alternative => {
            "No problem, here's another idea: {intervention}. {intervention_description}"
        }
        (_, SuggestTactic) => {
            "Let's try this: {intervention}. {intervention_description} Want to give it a go?"
        }

        (IncidentKind::Craving, Welcome | IdentifyCraving) => {
            "Hi {name}, I'm glad you reached out. What are you craving right now?"
        }
        (IncidentKind::Craving, GaugeIntensity) => {
            "Thanks for telling me. How strong is the craving for {trigger}, from 1 to 10?"
        }
        (IncidentKind::Craving, IdentifyLocation) => "Got it. Where are you right now?",
        (IncidentKind::Craving, IdentifyTrigger) => "What do you think set this craving off?",
        (IncidentKind::Craving, Encouragement) => {
            "Great choice, {name}. Give {intervention} a go. When you're done, how strong is the craving now, from 1 to 10?"
        }
        (IncidentKind::Craving, RateResult) => {
            "Nice work riding that out. How helpful was {intervention}, from 1 to 10?"
        }
        (IncidentKind::Craving, Close) => {
            "Thanks, {name}. Every craving you ride out makes the next one easier. I'm here whenever you need me."
        }

        (IncidentKind::Energy, Welcome | IdentifyBlocker) => {
            "Hi {name}, let's get you moving. What's holding you back right now?"
        }
        (IncidentKind::Energy, GaugeEnergy) => {
            "That makes sense. How is your energy right now, from 1 to 10?"
        }
        (IncidentKind::Energy, IdentifyLocation) => "Where are you right now?",
        (IncidentKind::Energy, IdentifyApproach) => {
            "What kind of activity sounds doable right now?"
        }
        (IncidentKind::Energy, Encouragement) => {
            "Love it, {name}. Go try {intervention} and let me know once you've done it."
        }
        (IncidentKind::Energy, CheckActivityCompletion) => {
            "Thanks for letting me know. How is your energy now, from 1 to 10?"
        }
        (IncidentKind::Energy, RateResult) => "How helpful was {intervention} for you, from 1 to 10?",
        (IncidentKind::Energy, Close) => {
            "Thanks, {name}. Small steps add up. I'm here whenever you need a boost."
        }

        _ => GENERIC_LINE,
    }
}

/// Canned line for the step in `ctx`, with placeholders filled from its facts.
pub fn fallback_line(ctx: &GenerationContext) -> String {
    let name = if ctx.client_name.trim().is_empty() {
        "there"
    } else {
        ctx.client_name.trim()
    };
    let trigger = ctx.facts.trigger.as_deref().unwrap_or("it");
    let (intervention, description) = match &ctx.intervention {
        Some(brief) => (brief.name.as_str(), brief.description.as_str()),
        None => ("this strategy", ""),
    };

    template(ctx.flow, ctx)
        .replace("{name}", name)
        .replace("{trigger}", trigger)
        .replace("{intervention_description}", description)
        .replace("{intervention}", intervention)
        .replace("  ", " ")
        .trim()
        .to_string()
}
