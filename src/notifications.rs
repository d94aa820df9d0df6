use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{RiskError, RiskResult};
use crate::metrics::MetricsCollector;
use crate::models::{AttendanceStatus, Notification, NotificationKind, Priority, RiskLevel};
use crate::realtime::{EventBus, RealtimeEvent, NOTIFICATION};
use crate::storage::NotificationStore;

const GRADE_TEMPLATE: &str = "Your grade in {{subject}} was recorded: {{grade}}/10 ({{evaluation}})";
const PRESENT_TEMPLATE: &str = "Your attendance in {{subject}} on {{date}} was confirmed.";
const ABSENT_TEMPLATE: &str = "Your attendance in {{subject}} on {{date}} was recorded as {{status}}.";

/// Domain event that produces a notification
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    Grade {
        grade_id: String,
        subject_name: String,
        grade: f64,
        evaluation_type: String,
    },
    Attendance {
        attendance_id: String,
        subject_name: String,
        status: AttendanceStatus,
        class_date: NaiveDate,
    },
    Prediction {
        assessment_id: String,
        risk_level: RiskLevel,
        key_factors: Vec<String>,
    },
}

impl NotificationEvent {
    pub fn kind(&self) -> NotificationKind {
        match self {
            NotificationEvent::Grade { .. } => NotificationKind::Calificacion,
            NotificationEvent::Attendance { .. } => NotificationKind::Asistencia,
            NotificationEvent::Prediction { .. } => NotificationKind::Prediccion,
        }
    }

    /// Pure function of the event; fixed at creation.
    pub fn priority(&self) -> Priority {
        match self {
            NotificationEvent::Grade { grade, .. } => {
                if *grade < 6.0 {
                    Priority::Alta
                } else if *grade < 8.0 {
                    Priority::Media
                } else {
                    Priority::Baja
                }
            }
            NotificationEvent::Attendance { status, .. } => match status {
                AttendanceStatus::Presente => Priority::Baja,
                _ => Priority::Media,
            },
            NotificationEvent::Prediction { risk_level, .. } => match risk_level {
                RiskLevel::Alto | RiskLevel::Critico => Priority::Alta,
                RiskLevel::Medio => Priority::Media,
                RiskLevel::Bajo => Priority::Baja,
            },
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            NotificationEvent::Grade { .. } => "New grade",
            NotificationEvent::Attendance {
                status: AttendanceStatus::Presente,
                ..
            } => "Attendance recorded",
            NotificationEvent::Attendance { .. } => "Absence recorded",
            NotificationEvent::Prediction { .. } => "Risk prediction updated",
        }
    }

    pub fn message(&self) -> String {
        match self {
            NotificationEvent::Grade {
                subject_name,
                grade,
                evaluation_type,
                ..
            } => GRADE_TEMPLATE
                .replace("{{subject}}", subject_name)
                .replace("{{grade}}", &grade.to_string())
                .replace("{{evaluation}}", evaluation_type),
            NotificationEvent::Attendance {
                subject_name,
                status,
                class_date,
                ..
            } => {
                let template = if *status == AttendanceStatus::Presente {
                    PRESENT_TEMPLATE
                } else {
                    ABSENT_TEMPLATE
                };
                template
                    .replace("{{subject}}", subject_name)
                    .replace("{{date}}", &class_date.to_string())
                    .replace("{{status}}", &status.as_str().to_lowercase())
            }
            NotificationEvent::Prediction { risk_level, .. } => match risk_level {
                RiskLevel::Critico => "Your academic risk prediction is now CRITICAL. Contact your academic advisor as soon as possible.".to_string(),
                RiskLevel::Alto => "Your academic risk prediction is now HIGH. Please contact your academic advisor.".to_string(),
                RiskLevel::Medio => "Your academic risk prediction is now MEDIUM. Review your recent performance.".to_string(),
                RiskLevel::Bajo => "Your academic risk prediction remains LOW. Keep it up!".to_string(),
            },
        }
    }

    /// Correlation ids and event details stored alongside the notification
    pub fn metadata(&self) -> Value {
        match self {
            NotificationEvent::Grade {
                grade_id,
                subject_name,
                grade,
                evaluation_type,
            } => json!({
                "grade_id": grade_id,
                "subject": subject_name,
                "grade": grade,
                "evaluation_type": evaluation_type,
            }),
            NotificationEvent::Attendance {
                attendance_id,
                subject_name,
                status,
                class_date,
            } => json!({
                "attendance_id": attendance_id,
                "subject": subject_name,
                "status": status,
                "class_date": class_date,
            }),
            NotificationEvent::Prediction {
                assessment_id,
                risk_level,
                key_factors,
            } => json!({
                "assessment_id": assessment_id,
                "risk_level": risk_level,
                "key_factors": key_factors,
            }),
        }
    }
}

/// Persists per-student notifications and pushes them to the student's
/// realtime channel
pub struct NotificationEmitter {
    store: Arc<dyn NotificationStore>,
    bus: Arc<EventBus>,
    metrics: Arc<MetricsCollector>,
}

impl NotificationEmitter {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        bus: Arc<EventBus>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        info!("🔔 Initializing notification emitter");
        Self {
            store,
            bus,
            metrics,
        }
    }

    /// Every call creates a new row; nothing is deduplicated.
    pub async fn emit(&self, student_id: &str, event: NotificationEvent) -> RiskResult<Notification> {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            kind: event.kind(),
            title: event.title().to_string(),
            message: event.message(),
            priority: event.priority(),
            read: false,
            metadata: event.metadata(),
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.insert_notification(&notification).await {
            self.metrics.record_notification(false);
            return Err(RiskError::NotificationFailure(e.to_string()));
        }
        self.metrics.record_notification(true);

        self.bus.publish(RealtimeEvent::targeted(
            NOTIFICATION,
            student_id,
            serde_json::to_value(&notification)?,
        ));

        debug!(
            "🔔 Notification {} ({}, {}) created for {}",
            notification.id,
            notification.kind.as_str(),
            notification.priority.as_str(),
            student_id
        );
        Ok(notification)
    }

    /// Best-effort variant: failures are logged and counted, never returned.
    pub async fn notify(&self, student_id: &str, event: NotificationEvent) -> Option<Notification> {
        match self.emit(student_id, event).await {
            Ok(notification) => Some(notification),
            Err(e) if e.is_recoverable() => {
                warn!("⚠️ Notification for {} dropped: {}", student_id, e);
                None
            }
            Err(e) => {
                error!("❌ Notification for {} failed unexpectedly: {}", student_id, e);
                None
            }
        }
    }

    pub async fn list(&self, student_id: &str, limit: Option<i64>) -> RiskResult<Vec<Notification>> {
        self.store.notifications_for_student(student_id, limit).await
    }

    pub async fn unread(&self, student_id: &str) -> RiskResult<Vec<Notification>> {
        self.store.unread_notifications(student_id).await
    }

    pub async fn count_unread(&self, student_id: &str) -> RiskResult<i64> {
        self.store.count_unread(student_id).await
    }

    pub async fn mark_read(&self, id: &str) -> RiskResult<()> {
        if self.store.mark_notification_read(id).await? {
            Ok(())
        } else {
            Err(RiskError::not_found("Notification", id))
        }
    }

    pub async fn mark_all_read(&self, student_id: &str) -> RiskResult<u64> {
        self.store.mark_all_read(student_id).await
    }

    pub async fn delete(&self, id: &str) -> RiskResult<()> {
        if self.store.delete_notification(id).await? {
            Ok(())
        } else {
            Err(RiskError::not_found("Notification", id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grade(value: f64) -> NotificationEvent {
        NotificationEvent::Grade {
            grade_id: "g1".to_string(),
            subject_name: "Física".to_string(),
            grade: value,
            evaluation_type: "Examen".to_string(),
        }
    }

    fn prediction(level: RiskLevel) -> NotificationEvent {
        NotificationEvent::Prediction {
            assessment_id: "a1".to_string(),
            risk_level: level,
            key_factors: vec![],
        }
    }

    #[test]
    fn grade_priority_boundaries() {
        assert_eq!(grade(5.9).priority(), Priority::Alta);
        assert_eq!(grade(6.0).priority(), Priority::Media);
        assert_eq!(grade(7.9).priority(), Priority::Media);
        assert_eq!(grade(8.0).priority(), Priority::Baja);
        assert_eq!(grade(9.0).priority(), Priority::Baja);
    }

    #[test]
    fn attendance_priority_depends_on_presence() {
        let event = |status| NotificationEvent::Attendance {
            attendance_id: "x".to_string(),
            subject_name: "Física".to_string(),
            status,
            class_date: NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(),
        };
        assert_eq!(event(AttendanceStatus::Presente).priority(), Priority::Baja);
        assert_eq!(event(AttendanceStatus::Ausente).priority(), Priority::Media);
        assert_eq!(event(AttendanceStatus::Tardanza).priority(), Priority::Media);
        assert_eq!(event(AttendanceStatus::Justificado).title(), "Absence recorded");
    }

    #[test]
    fn prediction_priority_follows_level() {
        assert_eq!(prediction(RiskLevel::Critico).priority(), Priority::Alta);
        assert_eq!(prediction(RiskLevel::Alto).priority(), Priority::Alta);
        assert_eq!(prediction(RiskLevel::Medio).priority(), Priority::Media);
        assert_eq!(prediction(RiskLevel::Bajo).priority(), Priority::Baja);
    }

    #[test]
    fn grade_message_names_subject_and_evaluation() {
        let message = grade(7.5).message();
        assert_eq!(message, "Your grade in Física was recorded: 7.5/10 (Examen)");
        assert_eq!(grade(7.5).metadata()["grade_id"], "g1");
    }
}
