//! Static step tables for the craving and energy flows.

use super::step::{ConversationStep, StaticChoice};
use crate::storage::{IncidentKind, MessageType};

/// Incident field an answer is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    TriggerFood,
    InitialIntensity,
    Context,
    FinalIntensity,
    Blocker,
    EnergyLevel,
    Approach,
    ActivityCompleted,
    PostEnergyLevel,
    Location,
    /// The accepted intervention (primary or secondary).
    Intervention,
    ResultRating,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::TriggerFood => "trigger_food",
            Field::InitialIntensity => "initial_intensity",
            Field::Context => "context",
            Field::FinalIntensity => "final_intensity",
            Field::Blocker => "blocker",
            Field::EnergyLevel => "energy_level",
            Field::Approach => "approach",
            Field::ActivityCompleted => "activity_completed",
            Field::PostEnergyLevel => "post_energy_level",
            Field::Location => "location",
            Field::Intervention => "intervention_id",
            Field::ResultRating => "result_rating",
        }
    }

    /// Whether the answer is read as a 1-10 rating.
    pub fn is_rating(&self) -> bool {
        matches!(
            self,
            Field::InitialIntensity
                | Field::FinalIntensity
                | Field::EnergyLevel
                | Field::PostEnergyLevel
                | Field::ResultRating
        )
    }
}

/// Where a step's offered options come from.
#[derive(Debug, Clone, Copy)]
pub enum OptionSource {
    None,
    Fixed(&'static [StaticChoice]),
    Rating,
    /// Accept / another-idea buttons for a suggestion.
    Tactic,
}

/// One row of a flow table.
#[derive(Debug, Clone, Copy)]
pub struct StepSpec {
    pub step: ConversationStep,
    /// Field written with the answer to the previous question.
    pub persists: Option<Field>,
    pub next: ConversationStep,
    pub options: OptionSource,
    /// Tag stored on the client message that enters this step.
    pub answer_type: MessageType,
    /// Entering this step resolves the incident.
    pub resolves: bool,
}

impl StepSpec {
    const fn new(step: ConversationStep, next: ConversationStep) -> Self {
        Self {
            step,
            persists: None,
            next,
            options: OptionSource::None,
            answer_type: MessageType::Text,
            resolves: false,
        }
    }

    const fn persists(mut self, field: Field, answer_type: MessageType) -> Self {
        self.persists = Some(field);
        self.answer_type = answer_type;
        self
    }

    const fn options(mut self, options: OptionSource) -> Self {
        self.options = options;
        self
    }

    const fn resolves(mut self) -> Self {
        self.resolves = true;
        self
    }
}

/// A fixed step sequence interpreted by the generic engine.
pub trait Flow: Send + Sync + 'static {
    const KIND: IncidentKind;

    fn steps() -> &'static [StepSpec];

    /// The first question asked once the flow is chosen.
    fn first_step() -> ConversationStep {
        Self::steps()[0].step
    }

    fn spec(step: ConversationStep) -> Option<&'static StepSpec> {
        Self::steps().iter().find(|spec| spec.step == step)
    }

    /// Kind of answer the client gives while `step` is the cursor.
    fn expected_answer(step: ConversationStep) -> MessageType {
        Self::spec(step)
            .and_then(|current| Self::spec(current.next))
            .filter(|next| next.step != step)
            .map(|next| next.answer_type)
            .unwrap_or(MessageType::Text)
    }
}

use ConversationStep::*;

const CRAVING_FOODS: &[StaticChoice] = &[
    StaticChoice::new("🍫", "Chocolate"),
    StaticChoice::new("🍟", "Chips"),
    StaticChoice::new("🍦", "Ice cream"),
    StaticChoice::new("🍪", "Cookies"),
    StaticChoice::new("🍕", "Fast food"),
    StaticChoice::plain("Something else"),
];

const CRAVING_LOCATIONS: &[StaticChoice] = &[
    StaticChoice::new("🏠", "Home"),
    StaticChoice::new("💼", "Work"),
    StaticChoice::new("🚗", "Car"),
    StaticChoice::new("🛒", "Store"),
    StaticChoice::new("🍽️", "Restaurant"),
];

const CRAVING_TRIGGERS: &[StaticChoice] = &[
    StaticChoice::plain("Stressed"),
    StaticChoice::plain("Bored"),
    StaticChoice::plain("Tired"),
    StaticChoice::plain("Social situation"),
    StaticChoice::plain("Just saw it"),
    StaticChoice::plain("Something else"),
];

const ENERGY_BLOCKERS: &[StaticChoice] = &[
    StaticChoice::new("😴", "Tired"),
    StaticChoice::new("😣", "Stressed"),
    StaticChoice::new("😐", "Unmotivated"),
    StaticChoice::new("⏰", "Too busy"),
    StaticChoice::new("🤕", "Sore or achy"),
];

const ENERGY_LOCATIONS: &[StaticChoice] = &[
    StaticChoice::new("🏠", "Home"),
    StaticChoice::new("💼", "Work"),
    StaticChoice::new("🏋️", "Gym"),
    StaticChoice::new("🌳", "Outside"),
    StaticChoice::new("✈️", "Traveling"),
];

const ENERGY_APPROACHES: &[StaticChoice] = &[
    StaticChoice::plain("Something quick"),
    StaticChoice::plain("Something gentle"),
    StaticChoice::plain("Something energizing"),
    StaticChoice::plain("Something social"),
];

const COMPLETION_CHOICES: &[StaticChoice] = &[
    StaticChoice::valued("✅", "I did it!", "yes"),
    StaticChoice::valued("⏳", "Not this time", "no"),
];

const CRAVING_STEPS: &[StepSpec] = &[
    StepSpec::new(IdentifyCraving, GaugeIntensity).options(OptionSource::Fixed(CRAVING_FOODS)),
    StepSpec::new(GaugeIntensity, IdentifyLocation)
        .persists(Field::TriggerFood, MessageType::OptionSelection)
        .options(OptionSource::Rating),
    StepSpec::new(IdentifyLocation, IdentifyTrigger)
        .persists(Field::InitialIntensity, MessageType::IntensityRating)
        .options(OptionSource::Fixed(CRAVING_LOCATIONS)),
    StepSpec::new(IdentifyTrigger, SuggestTactic)
        .persists(Field::Location, MessageType::LocationSelection)
        .options(OptionSource::Fixed(CRAVING_TRIGGERS)),
    StepSpec::new(SuggestTactic, Encouragement)
        .persists(Field::Context, MessageType::OptionSelection)
        .options(OptionSource::Tactic),
    StepSpec::new(Encouragement, RateResult)
        .persists(Field::Intervention, MessageType::TacticResponse)
        .options(OptionSource::Rating),
    StepSpec::new(RateResult, Close)
        .persists(Field::FinalIntensity, MessageType::IntensityRating)
        .options(OptionSource::Rating)
        .resolves(),
    StepSpec::new(Close, Close).persists(Field::ResultRating, MessageType::IntensityRating),
];

const ENERGY_STEPS: &[StepSpec] = &[
    StepSpec::new(IdentifyBlocker, GaugeEnergy).options(OptionSource::Fixed(ENERGY_BLOCKERS)),
    StepSpec::new(GaugeEnergy, IdentifyLocation)
        .persists(Field::Blocker, MessageType::OptionSelection)
        .options(OptionSource::Rating),
    StepSpec::new(IdentifyLocation, IdentifyApproach)
        .persists(Field::EnergyLevel, MessageType::IntensityRating)
        .options(OptionSource::Fixed(ENERGY_LOCATIONS)),
    StepSpec::new(IdentifyApproach, SuggestTactic)
        .persists(Field::Location, MessageType::LocationSelection)
        .options(OptionSource::Fixed(ENERGY_APPROACHES)),
    StepSpec::new(SuggestTactic, Encouragement)
        .persists(Field::Approach, MessageType::OptionSelection)
        .options(OptionSource::Tactic),
    StepSpec::new(Encouragement, CheckActivityCompletion)
        .persists(Field::Intervention, MessageType::TacticResponse)
        .options(OptionSource::Fixed(COMPLETION_CHOICES)),
    StepSpec::new(CheckActivityCompletion, RateResult)
        .persists(Field::ActivityCompleted, MessageType::FollowupResponse)
        .options(OptionSource::Rating),
    StepSpec::new(RateResult, Close)
        .persists(Field::PostEnergyLevel, MessageType::IntensityRating)
        .options(OptionSource::Rating)
        .resolves(),
    StepSpec::new(Close, Close).persists(Field::ResultRating, MessageType::IntensityRating),
];

/// Food-craving flow.
pub struct CravingFlow;

impl Flow for CravingFlow {
    const KIND: IncidentKind = IncidentKind::Craving;

    fn steps() -> &'static [StepSpec] {
        CRAVING_STEPS
    }
}

/// Low-energy / movement flow.
pub struct EnergyFlow;

impl Flow for EnergyFlow {
    const KIND: IncidentKind = IncidentKind::Energy;

    fn steps() -> &'static [StepSpec] {
        ENERGY_STEPS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn walk<F: Flow>() -> Vec<ConversationStep> {
        let mut path = vec![F::first_step()];
        let mut current = F::first_step();
        while current != Close {
            current = F::spec(current).unwrap().next;
            path.push(current);
        }
        path
    }

    #[test]
    fn test_craving_sequence() {
        assert_eq!(
            walk::<CravingFlow>(),
            vec![
                IdentifyCraving,
                GaugeIntensity,
                IdentifyLocation,
                IdentifyTrigger,
                SuggestTactic,
                Encouragement,
                RateResult,
                Close
            ]
        );
    }

    #[test]
    fn test_energy_sequence() {
        assert_eq!(
            walk::<EnergyFlow>(),
            vec![
                IdentifyBlocker,
                GaugeEnergy,
                IdentifyLocation,
                IdentifyApproach,
                SuggestTactic,
                Encouragement,
                CheckActivityCompletion,
                RateResult,
                Close
            ]
        );
    }

    #[test]
    fn test_every_step_after_the_first_persists_an_answer() {
        for spec in CravingFlow::steps().iter().skip(1) {
            assert!(spec.persists.is_some(), "craving {} persists nothing", spec.step);
        }
        for spec in EnergyFlow::steps().iter().skip(1) {
            assert!(spec.persists.is_some(), "energy {} persists nothing", spec.step);
        }
    }

    #[test]
    fn test_only_rate_result_resolves() {
        let resolving: Vec<_> = CravingFlow::steps()
            .iter()
            .chain(EnergyFlow::steps())
            .filter(|spec| spec.resolves)
            .map(|spec| spec.step)
            .collect();
        assert_eq!(resolving, vec![RateResult, RateResult]);
    }

    #[test]
    fn test_expected_answer_types() {
        assert_eq!(
            CravingFlow::expected_answer(GaugeIntensity),
            MessageType::IntensityRating
        );
        assert_eq!(
            CravingFlow::expected_answer(IdentifyLocation),
            MessageType::LocationSelection
        );
        assert_eq!(
            EnergyFlow::expected_answer(Encouragement),
            MessageType::FollowupResponse
        );
        assert_eq!(CravingFlow::expected_answer(Close), MessageType::Text);
        assert!(EnergyFlow::spec(IdentifyTrigger).is_none());
    }

    #[test]
    fn test_rating_fields() {
        assert!(Field::InitialIntensity.is_rating());
        assert!(Field::ResultRating.is_rating());
        assert!(!Field::Location.is_rating());
        assert_eq!(Field::Intervention.as_str(), "intervention_id");
    }
}
