//! Weighted readiness scoring.
//!
//! Pure functions: the same answers always produce the same score. Scores are
//! weighted averages of normalized answers in `[0, 1]`, scaled to `0..=100`.
//! Unanswered inputs are excluded from both numerator and denominator — they
//! are never treated as zero.

use crate::model::{CheckCategory, Constraint, ConstraintValue, SuitabilityAnswer, SuitabilityCheck};

// ─── Core computation ─────────────────────────────────────────────────────────

/// One scoring input: a weight and a normalized answer, `None` if unanswered.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput {
    pub weight: f64,
    pub value: Option<f64>,
}

/// Weighted average of the answered inputs, rounded to `0..=100`.
///
/// Zero eligible inputs (or zero total weight) yields 0 — never a division
/// by zero, never NaN.
pub fn compute_score(inputs: &[ScoreInput]) -> u8 {
    let mut weight_sum = 0.0;
    let mut value_sum = 0.0;
    for input in inputs {
        if let Some(value) = input.value {
            weight_sum += input.weight;
            value_sum += input.weight * value.clamp(0.0, 1.0);
        }
    }
    if weight_sum <= 0.0 {
        return 0;
    }
    ((100.0 * value_sum / weight_sum).round() as u8).min(100)
}

/// Qualitative band for a score. Bands are closed-open: a score belongs to
/// exactly one band, with no gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreLevel {
    Excellent,
    Good,
    Moderate,
    Poor,
}

impl ScoreLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => ScoreLevel::Excellent,
            60..=79 => ScoreLevel::Good,
            40..=59 => ScoreLevel::Moderate,
            _ => ScoreLevel::Poor,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScoreLevel::Excellent => "excellent",
            ScoreLevel::Good => "good",
            ScoreLevel::Moderate => "moderate",
            ScoreLevel::Poor => "poor",
        }
    }
}

// ─── Feasibility ──────────────────────────────────────────────────────────────

/// Fixed per-constraint weights. Unlisted constraints weigh 1.0.
fn constraint_weight(id: &str) -> f64 {
    match id {
        "data-availability" => 1.5,
        "connectivity" => 0.5,
        _ => 1.0,
    }
}

/// Map a select option to `[0, 1]`. Option lists are ordered worst-to-best,
/// so the mapping is by vocabulary rather than position: sparse answers
/// ("limited", "none", "low", "solo") score 0, middling ones 0.5, strong
/// ones 1.0. Unrecognized vocabulary counts as "unknown" (0.5).
fn normalize_choice(choice: &str) -> f64 {
    match choice {
        "limited" | "none" | "low" | "solo" | "tight" => 0.0,
        "moderate" | "some" | "medium" | "small" | "partial" | "unknown" => 0.5,
        "substantial" | "extensive" | "high" | "large" | "full" | "flexible" => 1.0,
        _ => 0.5,
    }
}

fn normalize_constraint(constraint: &Constraint) -> Option<f64> {
    match constraint.value.as_ref()? {
        ConstraintValue::Choice(choice) => Some(normalize_choice(choice)),
        ConstraintValue::Flag(flag) => Some(if *flag { 1.0 } else { 0.0 }),
    }
}

/// Feasibility score over the answered constraints.
pub fn feasibility_score(constraints: &[Constraint]) -> u8 {
    let inputs: Vec<ScoreInput> = constraints
        .iter()
        .map(|c| ScoreInput {
            weight: constraint_weight(&c.id),
            value: normalize_constraint(c),
        })
        .collect();
    compute_score(&inputs)
}

// ─── Suitability ──────────────────────────────────────────────────────────────

/// Normalize a suitability answer. An `unknown` is not a missing answer —
/// it is an answered "we don't know", weighed by how risky that ignorance
/// is for the category.
pub fn answer_value(answer: SuitabilityAnswer, category: CheckCategory) -> f64 {
    match answer {
        SuitabilityAnswer::Yes => 1.0,
        SuitabilityAnswer::No => 0.0,
        SuitabilityAnswer::Unknown => match category {
            CheckCategory::Data | CheckCategory::Ethics => 0.4,
            CheckCategory::Infrastructure => 0.7,
        },
    }
}

/// Suitability score over all checks, equal weights.
pub fn suitability_score(checks: &[SuitabilityCheck]) -> u8 {
    let inputs: Vec<ScoreInput> = checks
        .iter()
        .map(|c| ScoreInput {
            weight: 1.0,
            value: Some(answer_value(c.answer, c.category)),
        })
        .collect();
    compute_score(&inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProjectState;
    use proptest::prelude::*;

    fn set(state: &mut ProjectState, id: &str, choice: &str) {
        let c = state.constraints.iter_mut().find(|c| c.id == id).unwrap();
        c.value = Some(ConstraintValue::Choice(choice.to_string()));
    }

    #[test]
    fn empty_inputs_score_zero() {
        assert_eq!(compute_score(&[]), 0);
        assert_eq!(ScoreLevel::from_score(0), ScoreLevel::Poor);
    }

    #[test]
    fn unanswered_inputs_are_excluded() {
        let inputs = [
            ScoreInput { weight: 1.0, value: Some(1.0) },
            ScoreInput { weight: 5.0, value: None },
        ];
        assert_eq!(compute_score(&inputs), 100);
    }

    #[test]
    fn all_weights_zero_scores_zero() {
        let inputs = [ScoreInput { weight: 0.0, value: Some(1.0) }];
        assert_eq!(compute_score(&inputs), 0);
    }

    #[test]
    fn worst_case_constraints_score_poor() {
        // budget=limited, ai-experience=none, stakeholder-support=low; the
        // rest unanswered. All answered values normalize to 0.
        let mut state = ProjectState::with_defaults("p1");
        set(&mut state, "budget", "limited");
        set(&mut state, "ai-experience", "none");
        set(&mut state, "stakeholder-support", "low");
        let score = feasibility_score(&state.constraints);
        assert_eq!(score, 0);
        assert_eq!(ScoreLevel::from_score(score), ScoreLevel::Poor);
    }

    #[test]
    fn all_yes_checks_score_excellent() {
        let mut state = ProjectState::with_defaults("p1");
        for check in &mut state.suitability_checks {
            check.answer = SuitabilityAnswer::Yes;
        }
        let score = suitability_score(&state.suitability_checks);
        assert_eq!(score, 100);
        assert_eq!(ScoreLevel::from_score(score), ScoreLevel::Excellent);
    }

    #[test]
    fn one_no_out_of_four_scores_75() {
        let mut state = ProjectState::with_defaults("p1");
        for check in &mut state.suitability_checks {
            check.answer = SuitabilityAnswer::Yes;
        }
        state.suitability_checks[0].answer = SuitabilityAnswer::No;
        assert_eq!(suitability_score(&state.suitability_checks), 75);
    }

    #[test]
    fn band_edges_are_closed_open() {
        assert_eq!(ScoreLevel::from_score(100), ScoreLevel::Excellent);
        assert_eq!(ScoreLevel::from_score(80), ScoreLevel::Excellent);
        assert_eq!(ScoreLevel::from_score(79), ScoreLevel::Good);
        assert_eq!(ScoreLevel::from_score(60), ScoreLevel::Good);
        assert_eq!(ScoreLevel::from_score(59), ScoreLevel::Moderate);
        assert_eq!(ScoreLevel::from_score(40), ScoreLevel::Moderate);
        assert_eq!(ScoreLevel::from_score(39), ScoreLevel::Poor);
    }

    proptest! {
        #[test]
        fn score_is_bounded_and_pure(
            inputs in prop::collection::vec(
                (0.0f64..10.0, proptest::option::of(0.0f64..=1.0)),
                0..12,
            )
        ) {
            let inputs: Vec<ScoreInput> = inputs
                .into_iter()
                .map(|(weight, value)| ScoreInput { weight, value })
                .collect();
            let first = compute_score(&inputs);
            prop_assert!(first <= 100);
            prop_assert_eq!(first, compute_score(&inputs));
        }
    }
}
