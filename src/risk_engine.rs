use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{RiskLevel, StudentMetricSnapshot};

pub const FALLBACK_MODEL_ID: &str = "fallback-rules-v1";

/// Threshold set for the rule-based fallback scorer.
/// All comparisons are strict `<`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub high_grade_below: f64,
    pub high_attendance_below: f64,
    pub medium_grade_below: f64,
    pub medium_attendance_below: f64,
    pub factor_grade_below: f64,
    pub factor_attendance_below: f64,
    pub factor_study_hours_below: f64,
    pub factor_task_submission_below: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            high_grade_below: 5.0,
            high_attendance_below: 60.0,
            medium_grade_below: 7.0,
            medium_attendance_below: 80.0,
            factor_grade_below: 5.0,
            factor_attendance_below: 70.0,
            factor_study_hours_below: 5.0,
            factor_task_submission_below: 70.0,
        }
    }
}

/// Same shape the predictor client produces, minus the model-only fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackAssessment {
    pub risk_level: RiskLevel,
    pub key_factors: Vec<String>,
    pub model: &'static str,
}

impl FallbackAssessment {
    pub fn joined_factors(&self) -> String {
        self.key_factors.join(", ")
    }
}

/// Deterministic rule-based risk scorer used when the external predictor is unavailable
#[derive(Debug, Clone, Default)]
pub struct FallbackRiskEngine {
    thresholds: RiskThresholds,
}

impl FallbackRiskEngine {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self { thresholds }
    }

    /// Never fails: any snapshot, including an empty one, yields a usable result.
    ///
    /// With no metrics at all the level is `Medio`. Otherwise a missing grade
    /// average or attendance percentage is classified as zero.
    pub fn assess(&self, snapshot: &StudentMetricSnapshot) -> FallbackAssessment {
        if snapshot.is_empty() {
            debug!(
                "📉 No metrics for student {}, defaulting to Medio",
                snapshot.student_id
            );
            return FallbackAssessment {
                risk_level: RiskLevel::Medio,
                key_factors: vec!["insufficient data".to_string()],
                model: FALLBACK_MODEL_ID,
            };
        }

        let risk_level = self.classify(
            snapshot.grade_avg.unwrap_or(0.0),
            snapshot.attendance_pct.unwrap_or(0.0),
        );
        let key_factors = self.key_factors(snapshot);

        FallbackAssessment {
            risk_level,
            key_factors,
            model: FALLBACK_MODEL_ID,
        }
    }

    fn classify(&self, grade_avg: f64, attendance_pct: f64) -> RiskLevel {
        let t = &self.thresholds;

        if grade_avg < t.high_grade_below || attendance_pct < t.high_attendance_below {
            RiskLevel::Alto
        } else if grade_avg < t.medium_grade_below || attendance_pct < t.medium_attendance_below {
            RiskLevel::Medio
        } else {
            RiskLevel::Bajo
        }
    }

    fn key_factors(&self, snapshot: &StudentMetricSnapshot) -> Vec<String> {
        let t = &self.thresholds;
        let mut factors = Vec::new();

        if let Some(grade) = snapshot.grade_avg.filter(|g| *g < t.factor_grade_below) {
            factors.push(format!("low grades ({}/10)", trim_number(grade)));
        }
        if let Some(attendance) = snapshot
            .attendance_pct
            .filter(|a| *a < t.factor_attendance_below)
        {
            factors.push(format!("{}% absence", trim_number(100.0 - attendance)));
        }
        if snapshot
            .study_hours_week
            .map_or(false, |h| h < t.factor_study_hours_below)
        {
            factors.push("few weekly study hours".to_string());
        }
        if snapshot
            .task_submission_pct
            .map_or(false, |p| p < t.factor_task_submission_below)
        {
            factors.push("low task submission rate".to_string());
        }

        if factors.is_empty() {
            factors.push("good overall performance".to_string());
        }

        factors
    }
}

// 4.0 -> "4", 4.25 -> "4.3"
fn trim_number(value: f64) -> String {
    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{:.0}", rounded)
    } else {
        format!("{:.1}", rounded)
    }
}
