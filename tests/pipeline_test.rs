mod common;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use common::*;
use edurisk::attendance::{AttendanceEntry, BatchRequest, SingleAttendanceInput, UpsertAction};
use edurisk::error::{RiskError, RiskResult};
use edurisk::grades::GradeInput;
use edurisk::models::{AssessmentState, AttendanceStatus, Notification, Priority, RiskAssessment, RiskLevel};
use edurisk::notifications::NotificationEmitter;
use edurisk::orchestrator::AssessmentOrchestrator;
use edurisk::realtime::{
    ASISTENCIA_LOTE, ASISTENCIA_UPDATED, CALIFICACION_UPDATED, NOTIFICATION, PREDICCION_CREATED,
};
use edurisk::risk_engine::FALLBACK_MODEL_ID;
use edurisk::storage::{AssessmentStore, NotificationStore, StorageEngine};

#[tokio::test]
async fn successful_prediction_completes_and_notifies() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let scorer = FixedScorer::new(high_risk_response());
    let service = service(&dir, 1000, scorer.clone()).await?;
    seed_student(&service, "s1").await?;

    let mut shared = service.bus().subscribe().expect("bus running");
    let mut personal = service.bus().subscribe_student("s1").expect("bus running");

    let outcome = service.orchestrator().assess("s1", Some("2024-1".to_string())).await?;

    assert!(!outcome.fallback_used);
    assert!(outcome.advisory.is_none());
    assert_eq!(outcome.assessment.state, AssessmentState::Completado);
    assert_eq!(outcome.assessment.risk_level, RiskLevel::Alto);
    assert!((outcome.assessment.probability.unwrap_or_default() - 85.0).abs() < 1e-9);
    assert_eq!(outcome.assessment.model, "rf-2.1.0");
    assert_eq!(
        outcome.assessment.key_factors,
        "low grade average, irregular attendance"
    );
    assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);

    let event = timeout(Duration::from_secs(2), shared.recv()).await?.expect("event");
    assert_eq!(event.name, PREDICCION_CREATED);
    assert!(event.target.is_none());

    // The student's channel gets the targeted notification and the shared broadcast
    let mut names = Vec::new();
    for _ in 0..2 {
        let event = timeout(Duration::from_secs(2), personal.recv()).await?.expect("event");
        names.push(event.name);
    }
    assert!(names.contains(&NOTIFICATION.to_string()));
    assert!(names.contains(&PREDICCION_CREATED.to_string()));

    assert_eq!(wait_for_notifications(&service, "s1", 1).await?, 1);
    let notification = &service.notifications().list("s1", None).await?[0];
    assert_eq!(notification.priority, Priority::Alta);
    assert_eq!(notification.metadata["assessment_id"], outcome.assessment.id);

    Ok(())
}

#[tokio::test]
async fn slow_predictor_falls_back_within_timeout() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let service = service(&dir, 200, Arc::new(SlowScorer(Duration::from_secs(10)))).await?;
    seed_student(&service, "s1").await?;
    seed_habits(&service, "s1", 2.0).await?;

    let started = Instant::now();
    let outcome = service.orchestrator().assess("s1", None).await?;
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(1500), "took {:?}", elapsed);
    assert!(outcome.fallback_used);
    assert!(outcome.advisory.is_some());
    assert_eq!(outcome.assessment.state, AssessmentState::CompletadoFallback);
    assert_eq!(outcome.assessment.model, FALLBACK_MODEL_ID);
    // Habits only: missing grade and attendance are classified as zero
    assert_eq!(outcome.assessment.risk_level, RiskLevel::Alto);
    assert_eq!(
        outcome.assessment.key_factors,
        "few weekly study hours, low task submission rate"
    );

    let stored = service.orchestrator().find(&outcome.assessment.id).await?;
    assert_eq!(stored.state, AssessmentState::CompletadoFallback);
    Ok(())
}

#[tokio::test]
async fn failing_predictor_uses_rule_engine_on_real_metrics() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let service = service(&dir, 500, Arc::new(FailingScorer)).await?;
    seed_student(&service, "s1").await?;
    seed_subject(&service, "mat", "Matemática").await?;

    for (evaluation, grade) in [("Examen", 3.5), ("Tarea", 4.5)] {
        service
            .grades()
            .record(GradeInput {
                student_id: "s1".to_string(),
                subject_id: "mat".to_string(),
                period: "2024-1".to_string(),
                evaluation_type: evaluation.to_string(),
                grade,
            })
            .await?;
    }

    let outcome = service.orchestrator().assess("s1", None).await?;
    assert!(outcome.fallback_used);
    assert_eq!(outcome.assessment.risk_level, RiskLevel::Alto);
    assert_eq!(outcome.assessment.key_factors, "low grades (4/10)");
    assert!(outcome.assessment.probability.is_none());
    Ok(())
}

#[tokio::test]
async fn unknown_student_is_not_found_and_writes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let service = service(&dir, 500, FixedScorer::new(high_risk_response())).await?;

    let err = service.orchestrator().assess("ghost", None).await.unwrap_err();
    assert!(matches!(err, RiskError::NotFound { .. }));
    assert!(service.orchestrator().list_all().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn concurrent_assessments_each_get_their_own_row() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let service = service(&dir, 500, FixedScorer::new(high_risk_response())).await?;
    seed_student(&service, "s1").await?;

    let calls = (0..5).map(|_| service.orchestrator().assess("s1", None));
    let outcomes = futures::future::join_all(calls).await;

    let mut ids: Vec<String> = outcomes
        .into_iter()
        .map(|o| o.map(|o| o.assessment.id))
        .collect::<Result<_, _>>()?;
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);

    let history = service.orchestrator().history("s1").await?;
    assert_eq!(history.len(), 5);
    assert!(history.iter().all(|a| a.state.is_terminal()));
    Ok(())
}

/// Notification store that always fails
struct BrokenNotifications;

#[async_trait]
impl NotificationStore for BrokenNotifications {
    async fn insert_notification(&self, _n: &Notification) -> RiskResult<()> {
        Err(RiskError::StorageError("disk full".to_string()))
    }
    async fn notifications_for_student(&self, _s: &str, _l: Option<i64>) -> RiskResult<Vec<Notification>> {
        Ok(Vec::new())
    }
    async fn unread_notifications(&self, _s: &str) -> RiskResult<Vec<Notification>> {
        Ok(Vec::new())
    }
    async fn count_unread(&self, _s: &str) -> RiskResult<i64> {
        Ok(0)
    }
    async fn mark_notification_read(&self, _id: &str) -> RiskResult<bool> {
        Ok(false)
    }
    async fn mark_all_read(&self, _s: &str) -> RiskResult<u64> {
        Ok(0)
    }
    async fn delete_notification(&self, _id: &str) -> RiskResult<bool> {
        Ok(false)
    }
}

/// Delegates to real storage but refuses to finalize
struct UnfinalizableAssessments(Arc<edurisk::storage::StorageEngine>);

#[async_trait]
impl AssessmentStore for UnfinalizableAssessments {
    async fn insert_assessment(&self, a: &RiskAssessment) -> RiskResult<()> {
        self.0.insert_assessment(a).await
    }
    async fn finalize_assessment(&self, _a: &RiskAssessment) -> RiskResult<()> {
        Err(RiskError::StorageError("write failed".to_string()))
    }
    async fn mark_assessment_error(&self, id: &str) -> RiskResult<bool> {
        self.0.mark_assessment_error(id).await
    }
    async fn find_assessment(&self, id: &str) -> RiskResult<Option<RiskAssessment>> {
        self.0.find_assessment(id).await
    }
    async fn assessments_for_student(&self, s: &str) -> RiskResult<Vec<RiskAssessment>> {
        self.0.assessments_for_student(s).await
    }
    async fn list_assessments(&self) -> RiskResult<Vec<RiskAssessment>> {
        self.0.list_assessments().await
    }
}

#[tokio::test]
async fn notification_failure_never_fails_the_assessment() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let service = service(&dir, 500, FixedScorer::new(high_risk_response())).await?;
    seed_student(&service, "s1").await?;

    let storage = service.storage().clone();
    let emitter = Arc::new(NotificationEmitter::new(
        Arc::new(BrokenNotifications),
        service.bus().clone(),
        service.metrics().clone(),
    ));
    let predictor = Arc::new(edurisk::predictor_client::PredictorClient::new(
        &test_config(&dir, 500).predictor,
        FixedScorer::new(high_risk_response()),
        service.metrics().clone(),
    ));
    let orchestrator = AssessmentOrchestrator::new(
        storage.clone(),
        storage.clone(),
        storage.clone(),
        predictor,
        emitter,
        service.bus().clone(),
        service.metrics().clone(),
    );

    let outcome = orchestrator.assess("s1", None).await?;
    assert_eq!(outcome.assessment.state, AssessmentState::Completado);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(service.metrics().notification_failures_total.get(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_finalize_leaves_row_in_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let service = service(&dir, 500, FixedScorer::new(high_risk_response())).await?;
    seed_student(&service, "s1").await?;

    let storage = service.storage().clone();
    let predictor = Arc::new(edurisk::predictor_client::PredictorClient::new(
        &test_config(&dir, 500).predictor,
        FixedScorer::new(high_risk_response()),
        service.metrics().clone(),
    ));
    let orchestrator = AssessmentOrchestrator::new(
        storage.clone(),
        storage.clone(),
        Arc::new(UnfinalizableAssessments(storage.clone())),
        predictor,
        service.notifications().clone(),
        service.bus().clone(),
        service.metrics().clone(),
    );

    let err = orchestrator.assess("s1", None).await.unwrap_err();
    assert!(matches!(err, RiskError::StorageError(_)));

    let history = service.orchestrator().history("s1").await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, AssessmentState::Error);
    Ok(())
}

fn batch(entries: &[(&str, AttendanceStatus)]) -> BatchRequest {
    BatchRequest {
        subject_id: "mat".to_string(),
        class_date: NaiveDate::from_ymd_opt(2024, 4, 8).expect("valid date"),
        period: "2024-1".to_string(),
        entries: entries
            .iter()
            .map(|(id, status)| AttendanceEntry {
                student_id: id.to_string(),
                status: *status,
            })
            .collect(),
    }
}

#[tokio::test]
async fn batch_isolates_failing_items_and_broadcasts_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let service = service(&dir, 500, FixedScorer::new(high_risk_response())).await?;
    seed_subject(&service, "mat", "Matemática").await?;
    seed_student(&service, "s1").await?;
    seed_student(&service, "s3").await?;

    let mut shared = service.bus().subscribe().expect("bus running");

    let request = batch(&[
        ("s1", AttendanceStatus::Presente),
        ("missing", AttendanceStatus::Ausente),
        ("s3", AttendanceStatus::Tardanza),
    ]);
    let outcome = service.attendance().process_batch(request).await?;

    assert_eq!(outcome.total, 3);
    assert_eq!(outcome.successes, 2);
    assert_eq!(outcome.failures, 1);
    assert_eq!(outcome.errors[0].student_id, "missing");
    assert!(outcome.results.iter().all(|r| r.action == UpsertAction::Created));

    let event = timeout(Duration::from_secs(1), shared.recv()).await?.expect("event");
    assert_eq!(event.name, ASISTENCIA_LOTE);
    assert_eq!(event.payload["subject_name"], "Matemática");
    assert_eq!(event.payload["successes"], 2);
    assert!(timeout(Duration::from_millis(100), shared.recv()).await.is_err());
    Ok(())
}

#[tokio::test]
async fn resubmitting_a_batch_updates_in_place() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let service = service(&dir, 500, FixedScorer::new(high_risk_response())).await?;
    seed_subject(&service, "mat", "Matemática").await?;
    seed_student(&service, "s1").await?;
    seed_student(&service, "s2").await?;

    let first = service
        .attendance()
        .process_batch(batch(&[("s1", AttendanceStatus::Ausente), ("s2", AttendanceStatus::Presente)]))
        .await?;
    let second = service
        .attendance()
        .process_batch(batch(&[("s1", AttendanceStatus::Justificado), ("s2", AttendanceStatus::Presente)]))
        .await?;

    assert_eq!(first.successes, 2);
    assert_eq!(second.successes, 2);
    assert!(second.results.iter().all(|r| r.action == UpsertAction::Updated));
    assert_eq!(first.results[0].record_id, second.results[0].record_id);

    let records = service.attendance().records_for_student("s1").await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, AttendanceStatus::Justificado);
    Ok(())
}

#[tokio::test]
async fn batch_for_unknown_subject_applies_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let service = service(&dir, 500, FixedScorer::new(high_risk_response())).await?;
    seed_student(&service, "s1").await?;

    let err = service
        .attendance()
        .process_batch(batch(&[("s1", AttendanceStatus::Presente)]))
        .await
        .unwrap_err();
    assert!(matches!(err, RiskError::NotFound { .. }));
    assert!(service.attendance().records_for_student("s1").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn single_attendance_conflicts_on_existing_key() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let service = service(&dir, 500, FixedScorer::new(high_risk_response())).await?;
    seed_subject(&service, "mat", "Matemática").await?;
    seed_student(&service, "s1").await?;

    let input = SingleAttendanceInput {
        student_id: "s1".to_string(),
        subject_id: "mat".to_string(),
        period: "2024-1".to_string(),
        class_date: NaiveDate::from_ymd_opt(2024, 4, 9).expect("valid date"),
        status: AttendanceStatus::Ausente,
    };

    service.attendance().record_single(input.clone()).await?;
    let err = service.attendance().record_single(input).await.unwrap_err();
    assert!(matches!(err, RiskError::Conflict(_)));

    let notifications = service.notifications().list("s1", None).await?;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].priority, Priority::Media);

    let summary = service.attendance().summary_for_student("s1").await?;
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].ausentes, 1);
    assert_eq!(summary[0].percentage, 0.0);
    Ok(())
}

#[tokio::test]
async fn notification_facade_tracks_read_state() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let service = service(&dir, 500, FixedScorer::new(high_risk_response())).await?;
    seed_subject(&service, "mat", "Matemática").await?;
    seed_student(&service, "s1").await?;

    for grade in [5.0, 7.0, 9.5] {
        service
            .grades()
            .record(GradeInput {
                student_id: "s1".to_string(),
                subject_id: "mat".to_string(),
                period: "2024-1".to_string(),
                evaluation_type: "Tarea".to_string(),
                grade,
            })
            .await?;
    }

    let notifications = service.notifications();
    assert_eq!(notifications.count_unread("s1").await?, 3);

    let latest = notifications.list("s1", Some(1)).await?;
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].priority, Priority::Baja);

    notifications.mark_read(&latest[0].id).await?;
    assert_eq!(notifications.count_unread("s1").await?, 2);
    assert_eq!(notifications.mark_all_read("s1").await?, 2);
    assert_eq!(notifications.count_unread("s1").await?, 0);

    assert!(matches!(
        notifications.delete("nope").await,
        Err(RiskError::NotFound { .. })
    ));
    assert!(matches!(
        notifications.mark_read("nope").await,
        Err(RiskError::NotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn out_of_range_grade_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let service = service(&dir, 500, FixedScorer::new(high_risk_response())).await?;
    seed_subject(&service, "mat", "Matemática").await?;
    seed_student(&service, "s1").await?;

    let err = service
        .grades()
        .record(GradeInput {
            student_id: "s1".to_string(),
            subject_id: "mat".to_string(),
            period: "2024-1".to_string(),
            evaluation_type: "Examen".to_string(),
            grade: 10.5,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RiskError::ValidationError(_)));
    assert_eq!(service.notifications().count_unread("s1").await?, 0);
    Ok(())
}

#[tokio::test]
async fn corrections_broadcast_update_events() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let service = service(&dir, 500, FixedScorer::new(high_risk_response())).await?;
    seed_subject(&service, "mat", "Matemática").await?;
    seed_student(&service, "s1").await?;

    let record = service
        .attendance()
        .record_single(SingleAttendanceInput {
            student_id: "s1".to_string(),
            subject_id: "mat".to_string(),
            period: "2024-1".to_string(),
            class_date: NaiveDate::from_ymd_opt(2024, 4, 10).expect("valid date"),
            status: AttendanceStatus::Ausente,
        })
        .await?;
    let grade = service
        .grades()
        .record(GradeInput {
            student_id: "s1".to_string(),
            subject_id: "mat".to_string(),
            period: "2024-1".to_string(),
            evaluation_type: "Examen".to_string(),
            grade: 4.0,
        })
        .await?;

    let mut shared = service.bus().subscribe().expect("bus running");

    let updated = service
        .attendance()
        .update_status(&record.id, AttendanceStatus::Justificado)
        .await?;
    assert_eq!(updated.status, AttendanceStatus::Justificado);
    assert!(updated.updated_at >= record.updated_at);

    let event = timeout(Duration::from_secs(1), shared.recv()).await?.expect("event");
    assert_eq!(event.name, ASISTENCIA_UPDATED);

    let corrected = service.grades().update(&grade.id, 6.5).await?;
    assert_eq!(corrected.grade, 6.5);
    assert_eq!(corrected.evaluation_type, "Examen");

    let event = timeout(Duration::from_secs(1), shared.recv()).await?.expect("event");
    assert_eq!(event.name, CALIFICACION_UPDATED);

    // One notification per write
    assert_eq!(service.notifications().count_unread("s1").await?, 4);

    assert!(matches!(
        service.grades().update(&grade.id, -1.0).await,
        Err(RiskError::ValidationError(_))
    ));
    assert!(matches!(
        service.grades().update("missing", 5.0).await,
        Err(RiskError::NotFound { .. })
    ));
    assert!(matches!(
        service.attendance().update_status("missing", AttendanceStatus::Presente).await,
        Err(RiskError::NotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn dropped_caller_does_not_strand_the_row() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let service = service(&dir, 1000, Arc::new(SlowScorer(Duration::from_secs(10)))).await?;
    seed_student(&service, "s1").await?;

    let orchestrator = Arc::clone(service.orchestrator());
    let call = tokio::spawn(async move { orchestrator.assess("s1", None).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    call.abort();

    let mut history = Vec::new();
    for _ in 0..50 {
        history = service.orchestrator().history("s1").await?;
        if !history.is_empty() && history.iter().all(|a| a.state.is_terminal()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, AssessmentState::CompletadoFallback);
    assert_eq!(history[0].model, FALLBACK_MODEL_ID);
    Ok(())
}

#[tokio::test]
async fn shutdown_waits_for_prediction_notification() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let service = service(&dir, 500, FixedScorer::new(high_risk_response())).await?;
    seed_student(&service, "s1").await?;

    service.orchestrator().assess("s1", None).await?;
    service.shutdown().await?;

    let reopened = StorageEngine::new(&test_config(&dir, 500).storage).await?;
    let stored = reopened.notifications_for_student("s1", None).await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].priority, Priority::Alta);
    reopened.close().await;
    Ok(())
}
