//! Critic response parsing
//!
//! The critic model is asked for a JSON verdict but often wraps it in prose or
//! markdown fences. Parsing never fails: anything unreadable is a rejection.

use serde_json::Value;
use tracing::debug;

pub const DEFAULT_REJECTION_FEEDBACK: &str = "The analysis lacks depth. Provide REIT-specific \
details for each recommendation: tenant and portfolio quality, lease expiry profile, \
gearing and interest coverage against the regulatory limit, DPU track record, and how \
each pick fits the stated risk tolerance and price-to-book preference.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticVerdict {
    pub approved: bool,
    pub feedback: Option<String>,
}

impl CriticVerdict {
    pub fn approve() -> Self {
        Self {
            approved: true,
            feedback: None,
        }
    }

    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            approved: false,
            feedback: Some(feedback.into()),
        }
    }
}

/// Interpret the critic's raw reply.
pub fn parse_critic_response(response: &str) -> CriticVerdict {
    if let Some(verdict) = first_json_object(response).and_then(verdict_from_json) {
        return verdict;
    }

    let normalized = response.to_lowercase();
    if normalized.contains(r#""approved": true"#) || normalized.contains(r#""approved":true"#) {
        debug!("Critic verdict recovered from loose text match");
        return CriticVerdict::approve();
    }

    debug!("Critic reply unreadable, treating as rejection");
    CriticVerdict::reject(DEFAULT_REJECTION_FEEDBACK)
}

fn verdict_from_json(candidate: &str) -> Option<CriticVerdict> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    let approved = value.get("approved")?.as_bool()?;

    let feedback = value
        .get("feedback")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Some(CriticVerdict { approved, feedback })
}

/// First balanced `{...}` substring, ignoring braces inside string literals.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}
