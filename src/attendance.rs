//! Attendance recording: the batch upsert used when an instructor takes roll for a
//! whole class, the single-record path, and per-subject summaries.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{RiskError, RiskResult};
use crate::metrics::MetricsCollector;
use crate::models::{AttendanceGroupKey, AttendanceKey, AttendanceRecord, AttendanceStatus, Subject};
use crate::notifications::{NotificationEmitter, NotificationEvent};
use crate::realtime::{EventBus, RealtimeEvent, ASISTENCIA_CREATED, ASISTENCIA_LOTE, ASISTENCIA_UPDATED};
use crate::storage::{AttendanceStore, StudentDirectory};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceEntry {
    pub student_id: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub subject_id: String,
    pub class_date: NaiveDate,
    pub period: String,
    pub entries: Vec<AttendanceEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub student_id: String,
    pub record_id: String,
    pub action: UpsertAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemError {
    pub student_id: String,
    pub error: String,
}

/// `successes + failures == total` always holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub results: Vec<BatchItemResult>,
    pub errors: Vec<BatchItemError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleAttendanceInput {
    pub student_id: String,
    pub subject_id: String,
    pub period: String,
    pub class_date: NaiveDate,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceSummary {
    pub period: String,
    pub subject_id: String,
    pub total: u32,
    pub presentes: u32,
    pub ausentes: u32,
    pub justificadas: u32,
    pub tardanzas: u32,
    /// Present plus justified over total, 0-100
    pub percentage: f64,
}

pub struct AttendanceProcessor {
    directory: Arc<dyn StudentDirectory>,
    store: Arc<dyn AttendanceStore>,
    emitter: Arc<NotificationEmitter>,
    bus: Arc<EventBus>,
    metrics: Arc<MetricsCollector>,
}

impl AttendanceProcessor {
    pub fn new(
        directory: Arc<dyn StudentDirectory>,
        store: Arc<dyn AttendanceStore>,
        emitter: Arc<NotificationEmitter>,
        bus: Arc<EventBus>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        info!("📋 Initializing attendance processor");
        Self {
            directory,
            store,
            emitter,
            bus,
            metrics,
        }
    }

    /// Applies every entry independently. A missing subject aborts before any
    /// item is touched; any other failure is confined to its item.
    pub async fn process_batch(&self, request: BatchRequest) -> RiskResult<BatchOutcome> {
        let subject = self
            .directory
            .find_subject(&request.subject_id)
            .await?
            .ok_or_else(|| RiskError::not_found("Subject", &request.subject_id))?;

        info!(
            "📋 Processing attendance batch: {} entries for {} on {}",
            request.entries.len(),
            subject.name,
            request.class_date
        );

        let mut results = Vec::new();
        let mut errors = Vec::new();

        for entry in &request.entries {
            match self.process_item(&request, entry).await {
                Ok(result) => {
                    self.metrics.record_attendance_item(true);
                    results.push(result);
                }
                Err(e) => {
                    self.metrics.record_attendance_item(false);
                    warn!("⚠️ Attendance item failed: {}", e);
                    errors.push(BatchItemError {
                        student_id: entry.student_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let outcome = BatchOutcome {
            total: request.entries.len(),
            successes: results.len(),
            failures: errors.len(),
            results,
            errors,
        };

        self.publish_batch(&subject, &request, &outcome);

        info!(
            "✅ Attendance batch done: {}/{} succeeded",
            outcome.successes, outcome.total
        );
        Ok(outcome)
    }

    async fn process_item(
        &self,
        request: &BatchRequest,
        entry: &AttendanceEntry,
    ) -> RiskResult<BatchItemResult> {
        let item_failure = |reason: String| RiskError::BatchItemFailure {
            student_id: entry.student_id.clone(),
            reason,
        };

        self.directory
            .find_student(&entry.student_id)
            .await
            .map_err(|e| item_failure(e.to_string()))?
            .ok_or_else(|| item_failure("student not found".to_string()))?;

        let key = AttendanceKey {
            student_id: entry.student_id.clone(),
            subject_id: request.subject_id.clone(),
            period: request.period.clone(),
            class_date: request.class_date,
        };

        let (record, action) = self
            .upsert(&key, entry.status)
            .await
            .map_err(|e| item_failure(e.to_string()))?;

        Ok(BatchItemResult {
            student_id: entry.student_id.clone(),
            record_id: record.id,
            action,
        })
    }

    async fn upsert(
        &self,
        key: &AttendanceKey,
        status: AttendanceStatus,
    ) -> RiskResult<(AttendanceRecord, UpsertAction)> {
        if let Some(existing) = self.store.find_attendance(key).await? {
            let record = self.store.update_attendance_status(&existing.id, status).await?;
            return Ok((record, UpsertAction::Updated));
        }

        match self.store.insert_attendance(key, status).await {
            Ok(record) => Ok((record, UpsertAction::Created)),
            Err(RiskError::Conflict(_)) => {
                // Lost an insert race on the natural key
                debug!("Attendance insert raced for {}, updating instead", key.student_id);
                let existing = self
                    .store
                    .find_attendance(key)
                    .await?
                    .ok_or_else(|| RiskError::not_found("Attendance", &key.student_id))?;
                let record = self.store.update_attendance_status(&existing.id, status).await?;
                Ok((record, UpsertAction::Updated))
            }
            Err(e) => Err(e),
        }
    }

    fn publish_batch(&self, subject: &Subject, request: &BatchRequest, outcome: &BatchOutcome) {
        let payload = json!({
            "subject_id": subject.id,
            "subject_name": subject.name,
            "class_date": request.class_date,
            "period": request.period,
            "total": outcome.total,
            "successes": outcome.successes,
            "failures": outcome.failures,
            "results": outcome.results,
            "errors": outcome.errors,
        });
        self.bus.publish(RealtimeEvent::new(ASISTENCIA_LOTE, payload));
    }

    /// Non-batch path. Refuses to overwrite an existing record.
    pub async fn record_single(&self, input: SingleAttendanceInput) -> RiskResult<AttendanceRecord> {
        self.directory
            .find_student(&input.student_id)
            .await?
            .ok_or_else(|| RiskError::not_found("Student", &input.student_id))?;
        let subject = self
            .directory
            .find_subject(&input.subject_id)
            .await?
            .ok_or_else(|| RiskError::not_found("Subject", &input.subject_id))?;

        let key = AttendanceKey {
            student_id: input.student_id,
            subject_id: input.subject_id,
            period: input.period,
            class_date: input.class_date,
        };

        if self.store.find_attendance(&key).await?.is_some() {
            return Err(RiskError::Conflict(format!(
                "attendance already recorded for {} in {} on {}",
                key.student_id, key.subject_id, key.class_date
            )));
        }

        let record = self.store.insert_attendance(&key, input.status).await?;

        self.emitter
            .notify(
                &record.key.student_id,
                NotificationEvent::Attendance {
                    attendance_id: record.id.clone(),
                    subject_name: subject.name,
                    status: record.status,
                    class_date: record.key.class_date,
                },
            )
            .await;

        self.bus.publish(RealtimeEvent::new(
            ASISTENCIA_CREATED,
            serde_json::to_value(&record)?,
        ));

        Ok(record)
    }

    /// Changes the status of an existing record by id.
    pub async fn update_status(
        &self,
        record_id: &str,
        status: AttendanceStatus,
    ) -> RiskResult<AttendanceRecord> {
        let record = self.store.update_attendance_status(record_id, status).await?;
        let subject_name = self
            .directory
            .find_subject(&record.key.subject_id)
            .await?
            .map(|s| s.name)
            .unwrap_or_else(|| record.key.subject_id.clone());

        self.emitter
            .notify(
                &record.key.student_id,
                NotificationEvent::Attendance {
                    attendance_id: record.id.clone(),
                    subject_name,
                    status: record.status,
                    class_date: record.key.class_date,
                },
            )
            .await;

        self.bus.publish(RealtimeEvent::new(
            ASISTENCIA_UPDATED,
            serde_json::to_value(&record)?,
        ));

        Ok(record)
    }

    pub async fn records_for_student(&self, student_id: &str) -> RiskResult<Vec<AttendanceRecord>> {
        self.store.attendance_for_student(student_id).await
    }

    pub async fn summary_for_student(&self, student_id: &str) -> RiskResult<Vec<AttendanceSummary>> {
        let records = self.store.attendance_for_student(student_id).await?;
        Ok(summarize(&records))
    }
}

/// Groups records by (period, subject) in key order.
pub fn summarize(records: &[AttendanceRecord]) -> Vec<AttendanceSummary> {
    let mut groups: BTreeMap<AttendanceGroupKey, [u32; 4]> = BTreeMap::new();

    for record in records {
        let key = AttendanceGroupKey {
            period: record.key.period.clone(),
            subject_id: record.key.subject_id.clone(),
        };
        let counts = groups.entry(key).or_default();
        let slot = match record.status {
            AttendanceStatus::Presente => 0,
            AttendanceStatus::Ausente => 1,
            AttendanceStatus::Justificado => 2,
            AttendanceStatus::Tardanza => 3,
        };
        counts[slot] += 1;
    }

    groups
        .into_iter()
        .map(|(key, [presentes, ausentes, justificadas, tardanzas])| {
            let total = presentes + ausentes + justificadas + tardanzas;
            AttendanceSummary {
                period: key.period,
                subject_id: key.subject_id,
                total,
                presentes,
                ausentes,
                justificadas,
                tardanzas,
                percentage: (presentes + justificadas) as f64 / total as f64 * 100.0,
            }
        })
        .collect()
}
