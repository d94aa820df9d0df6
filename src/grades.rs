use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{RiskError, RiskResult};
use crate::models::Grade;
use crate::notifications::{NotificationEmitter, NotificationEvent};
use crate::realtime::{EventBus, RealtimeEvent, CALIFICACION_CREATED, CALIFICACION_UPDATED};
use crate::storage::{GradeStore, StudentDirectory};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeInput {
    pub student_id: String,
    pub subject_id: String,
    pub period: String,
    pub evaluation_type: String,
    pub grade: f64,
}

/// Records a grade, then notifies the student and broadcasts the change
pub struct GradeRecorder {
    directory: Arc<dyn StudentDirectory>,
    store: Arc<dyn GradeStore>,
    emitter: Arc<NotificationEmitter>,
    bus: Arc<EventBus>,
}

impl GradeRecorder {
    pub fn new(
        directory: Arc<dyn StudentDirectory>,
        store: Arc<dyn GradeStore>,
        emitter: Arc<NotificationEmitter>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            directory,
            store,
            emitter,
            bus,
        }
    }

    pub async fn record(&self, input: GradeInput) -> RiskResult<Grade> {
        validate_range(input.grade)?;

        self.directory
            .find_student(&input.student_id)
            .await?
            .ok_or_else(|| RiskError::not_found("Student", &input.student_id))?;
        let subject = self
            .directory
            .find_subject(&input.subject_id)
            .await?
            .ok_or_else(|| RiskError::not_found("Subject", &input.subject_id))?;

        let grade = Grade {
            id: Uuid::new_v4().to_string(),
            student_id: input.student_id,
            subject_id: input.subject_id,
            period: input.period,
            evaluation_type: input.evaluation_type,
            grade: input.grade,
            created_at: Utc::now(),
        };
        self.store.insert_grade(&grade).await?;

        info!(
            "📝 Grade {} recorded for {} in {}",
            grade.grade, grade.student_id, subject.name
        );

        self.emitter
            .notify(
                &grade.student_id,
                NotificationEvent::Grade {
                    grade_id: grade.id.clone(),
                    subject_name: subject.name,
                    grade: grade.grade,
                    evaluation_type: grade.evaluation_type.clone(),
                },
            )
            .await;

        self.bus.publish(RealtimeEvent::new(
            CALIFICACION_CREATED,
            serde_json::to_value(&grade)?,
        ));

        Ok(grade)
    }

    /// Corrects the value of an existing grade and re-notifies the student.
    pub async fn update(&self, grade_id: &str, value: f64) -> RiskResult<Grade> {
        validate_range(value)?;

        let grade = self.store.update_grade(grade_id, value).await?;
        let subject_name = self
            .directory
            .find_subject(&grade.subject_id)
            .await?
            .map(|s| s.name)
            .unwrap_or_else(|| grade.subject_id.clone());

        info!("📝 Grade {} corrected to {}", grade.id, grade.grade);

        self.emitter
            .notify(
                &grade.student_id,
                NotificationEvent::Grade {
                    grade_id: grade.id.clone(),
                    subject_name,
                    grade: grade.grade,
                    evaluation_type: grade.evaluation_type.clone(),
                },
            )
            .await;

        self.bus.publish(RealtimeEvent::new(
            CALIFICACION_UPDATED,
            serde_json::to_value(&grade)?,
        ));

        Ok(grade)
    }
}

fn validate_range(value: f64) -> RiskResult<()> {
    if !(0.0..=10.0).contains(&value) {
        return Err(RiskError::ValidationError(format!(
            "grade {} outside 0-10",
            value
        )));
    }
    Ok(())
}
