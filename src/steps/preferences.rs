//! Preference collection steps
//!
//! The collector is the interrupt point: after it runs the driver pauses so a
//! human can supply preferences. The parser folds them into the conversation.

use crate::models::{Message, RiskTolerance, UserPreferences};
use crate::state::{RunState, StateUpdate};
use crate::steps::{Step, StepName};
use crate::Result;
use async_trait::async_trait;
use tracing::debug;

pub const COLLECTOR_MESSAGE: &str = "Ready to collect user investment preferences...";

/// Summary handed to the model after preferences arrive.
pub fn preference_summary(prefs: &UserPreferences) -> String {
    format!(
        "\nUser Investment Profile:\n- Risk Tolerance: {}\n- Max P/B: {}\n",
        prefs.risk_label(),
        prefs.max_price_to_book_label()
    )
}

/// Context block prepended to every analyst request once preferences exist.
pub fn preference_context(prefs: &UserPreferences) -> String {
    format!(
        r#"
CONSIDERATION: USER PREFERENCES
============================================
The user has specified these investment criteria:

Risk Tolerance: {}
Preferred Price-to-Book: {}

INTERPRETATION GUIDELINES (Remember: REITs are dividend investments first):
- "conservative" risk -> Prioritize dividend stability and capital preservation.
- "moderate" risk -> Expects growth and can accept some volatility for long term growth, but must still weigh dividend stability and capital preservation.

============================================
"#,
        prefs.risk_label(),
        prefs.max_price_to_book_label()
    )
}

/// Preferences from free-text answers. Unknown risk levels fall back to
/// moderate; an unparseable or non-positive ratio means no limit.
pub fn preferences_from_answers(risk: &str, max_price_to_book: &str) -> UserPreferences {
    UserPreferences {
        risk_tolerance: Some(RiskTolerance::parse(risk).unwrap_or(RiskTolerance::Moderate)),
        max_price_to_book: max_price_to_book
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|pb| pb.is_finite() && *pb > 0.0),
    }
}

pub struct PreferenceCollectorStep;

#[async_trait]
impl Step for PreferenceCollectorStep {
    fn name(&self) -> StepName {
        StepName::PreferenceCollector
    }

    async fn run(&self, state: &RunState) -> Result<StateUpdate> {
        if state.preferences_collected {
            debug!("Preferences already collected, passing through");
            return Ok(StateUpdate::new());
        }

        Ok(StateUpdate::new().message(Message::human(COLLECTOR_MESSAGE)))
    }
}

pub struct PreferenceParserStep;

#[async_trait]
impl Step for PreferenceParserStep {
    fn name(&self) -> StepName {
        StepName::PreferenceParser
    }

    async fn run(&self, state: &RunState) -> Result<StateUpdate> {
        let prefs = state.user_preferences.clone();

        debug!(
            risk_tolerance = %prefs.risk_label(),
            max_price_to_book = %prefs.max_price_to_book_label(),
            "Parsing injected preferences"
        );

        let summary = preference_summary(&prefs);
        Ok(StateUpdate::new()
            .user_preferences(prefs)
            .preferences_collected(true)
            .message(Message::human(summary)))
    }
}
