//! Run-completion gate over `CORE` goals.

use serde::{Deserialize, Serialize};

use crate::core::types::Goal;

/// Minimum confidence for a goal evaluation to count as achieved.
pub const COMPLETION_CONFIDENCE: f64 = 0.7;

/// Outcome of judging one goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalEvaluation {
    pub achieved: bool,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
}

impl GoalEvaluation {
    pub fn achieved(confidence: f64, evidence: impl Into<String>) -> Self {
        Self {
            achieved: true,
            confidence,
            evidence: vec![evidence.into()],
            blockers: Vec::new(),
        }
    }

    pub fn unmet(confidence: f64, blocker: impl Into<String>) -> Self {
        Self {
            achieved: false,
            confidence,
            evidence: Vec::new(),
            blockers: vec![blocker.into()],
        }
    }

    pub fn counts(&self, threshold: f64) -> bool {
        self.achieved && self.confidence >= threshold
    }
}

/// Fold an evaluation into the goal and report whether it counts as met.
///
/// Without an evaluation the goal keeps its stored flag.
pub fn apply_evaluation(goal: &mut Goal, evaluation: Option<&GoalEvaluation>, threshold: f64) -> bool {
    match evaluation {
        Some(evaluation) => {
            goal.achieved = evaluation.achieved;
            goal.confidence = evaluation.confidence.clamp(0.0, 1.0);
            evaluation.counts(threshold)
        }
        None => goal.achieved,
    }
}

/// True when every `CORE` goal is achieved with enough confidence.
pub fn core_goals_met(goals: &[Goal], threshold: f64) -> bool {
    goals
        .iter()
        .filter(|goal| goal.is_core())
        .all(|goal| goal.achieved && goal.confidence >= threshold)
}

pub fn unmet_core_goals(goals: &[Goal], threshold: f64) -> Vec<&Goal> {
    goals
        .iter()
        .filter(|goal| goal.is_core() && !(goal.achieved && goal.confidence >= threshold))
        .collect()
}
