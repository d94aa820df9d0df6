use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RiskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Bajo,
    Medio,
    Alto,
    #[serde(rename = "Crítico")]
    Critico,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Bajo => "Bajo",
            RiskLevel::Medio => "Medio",
            RiskLevel::Alto => "Alto",
            RiskLevel::Critico => "Crítico",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = RiskError;

    /// Accepts any casing, with or without the accent on "crítico".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bajo" => Ok(RiskLevel::Bajo),
            "medio" => Ok(RiskLevel::Medio),
            "alto" => Ok(RiskLevel::Alto),
            "crítico" | "critico" => Ok(RiskLevel::Critico),
            other => Err(RiskError::ValidationError(format!(
                "unknown risk level '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single assessment row. Only `Calculando` is non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssessmentState {
    Calculando,
    Completado,
    CompletadoFallback,
    Error,
}

impl AssessmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentState::Calculando => "Calculando",
            AssessmentState::Completado => "Completado",
            AssessmentState::CompletadoFallback => "CompletadoFallback",
            AssessmentState::Error => "Error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AssessmentState::Calculando)
    }
}

impl FromStr for AssessmentState {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Calculando" => Ok(AssessmentState::Calculando),
            "Completado" => Ok(AssessmentState::Completado),
            "CompletadoFallback" => Ok(AssessmentState::CompletadoFallback),
            "Error" => Ok(AssessmentState::Error),
            other => Err(RiskError::ValidationError(format!(
                "unknown assessment state '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Calificacion,
    Asistencia,
    Prediccion,
    Aviso,
    Tarea,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Calificacion => "calificacion",
            NotificationKind::Asistencia => "asistencia",
            NotificationKind::Prediccion => "prediccion",
            NotificationKind::Aviso => "aviso",
            NotificationKind::Tarea => "tarea",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calificacion" => Ok(NotificationKind::Calificacion),
            "asistencia" => Ok(NotificationKind::Asistencia),
            "prediccion" => Ok(NotificationKind::Prediccion),
            "aviso" => Ok(NotificationKind::Aviso),
            "tarea" => Ok(NotificationKind::Tarea),
            other => Err(RiskError::ValidationError(format!(
                "unknown notification type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Alta,
    Media,
    Baja,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Alta => "alta",
            Priority::Media => "media",
            Priority::Baja => "baja",
        }
    }
}

impl FromStr for Priority {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alta" => Ok(Priority::Alta),
            "media" => Ok(Priority::Media),
            "baja" => Ok(Priority::Baja),
            other => Err(RiskError::ValidationError(format!(
                "unknown priority '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Presente,
    Ausente,
    Justificado,
    Tardanza,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Presente => "Presente",
            AttendanceStatus::Ausente => "Ausente",
            AttendanceStatus::Justificado => "Justificado",
            AttendanceStatus::Tardanza => "Tardanza",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Presente" => Ok(AttendanceStatus::Presente),
            "Ausente" => Ok(AttendanceStatus::Ausente),
            "Justificado" => Ok(AttendanceStatus::Justificado),
            "Tardanza" => Ok(AttendanceStatus::Tardanza),
            other => Err(RiskError::ValidationError(format!(
                "unknown attendance status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Participation {
    Baja,
    Media,
    Alta,
}

impl Participation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Participation::Baja => "baja",
            Participation::Media => "media",
            Participation::Alta => "alta",
        }
    }
}

impl FromStr for Participation {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "baja" => Ok(Participation::Baja),
            "media" => Ok(Participation::Media),
            "alta" => Ok(Participation::Alta),
            other => Err(RiskError::ValidationError(format!(
                "unknown participation level '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub given_names: String,
    pub surnames: String,
    pub semester: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub name: String,
}

/// Aggregated academic signals for one student at the time of the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentMetricSnapshot {
    pub student_id: String,
    pub semester: Option<i64>,
    pub grade_avg: Option<f64>,
    pub exam_avg: Option<f64>,
    pub attendance_pct: Option<f64>,
    pub study_hours_week: Option<f64>,
    pub task_submission_pct: Option<f64>,
    pub participation: Option<Participation>,
    pub uses_study_techniques: Option<bool>,
}

impl StudentMetricSnapshot {
    pub fn is_empty(&self) -> bool {
        self.grade_avg.is_none()
            && self.exam_avg.is_none()
            && self.attendance_pct.is_none()
            && self.study_hours_week.is_none()
            && self.task_submission_pct.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub id: String,
    pub student_id: String,
    pub assessed_at: DateTime<Utc>,
    pub risk_level: RiskLevel,
    /// Dropout probability as a percentage, absent for rule-based results
    pub probability: Option<f64>,
    pub score: Option<f64>,
    pub key_factors: String,
    pub recommendations: Vec<String>,
    pub state: AssessmentState,
    pub model: String,
    pub period: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub student_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub read: bool,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Natural key of an attendance record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttendanceKey {
    pub student_id: String,
    pub subject_id: String,
    pub period: String,
    pub class_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub key: AttendanceKey,
    pub status: AttendanceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Grouping key for per-subject attendance summaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttendanceGroupKey {
    pub period: String,
    pub subject_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grade {
    pub id: String,
    pub student_id: String,
    pub subject_id: String,
    pub period: String,
    pub evaluation_type: String,
    pub grade: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyHabit {
    pub student_id: String,
    pub recorded_at: DateTime<Utc>,
    pub weekly_hours: f64,
    pub uses_techniques: bool,
    pub participation: Participation,
    pub task_submission_pct: f64,
}
