#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use edurisk::config::Config;
use edurisk::error::{RiskError, RiskResult};
use edurisk::models::{Participation, Student, StudyHabit, Subject};
use edurisk::predictor_client::{PredictorRequest, PredictorResponse, ScoringService};
use edurisk::RiskService;

pub fn test_config(dir: &tempfile::TempDir, timeout_ms: u64) -> Config {
    let mut config = Config::default();
    config.storage.db_path = dir.path().join("edurisk.db").to_string_lossy().to_string();
    config.storage.max_connections = 4;
    config.predictor.timeout_ms = timeout_ms;
    config.realtime.channel_capacity = 64;
    config
}

pub fn high_risk_response() -> PredictorResponse {
    PredictorResponse {
        riesgo: "alto".to_string(),
        probabilidad: 0.85,
        puntuacion: 45.5,
        factores_criticos: vec![
            "low grade average".to_string(),
            "irregular attendance".to_string(),
        ],
        recomendaciones: vec!["weekly tutoring".to_string()],
        fecha_prediccion: "2024-05-01T10:00:00".to_string(),
        modelo_version: "rf-2.1.0".to_string(),
    }
}

/// Always answers with the same response and counts calls
pub struct FixedScorer {
    pub response: PredictorResponse,
    pub calls: AtomicUsize,
}

impl FixedScorer {
    pub fn new(response: PredictorResponse) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ScoringService for FixedScorer {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn score(&self, _request: &PredictorRequest) -> RiskResult<PredictorResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

pub struct FailingScorer;

#[async_trait]
impl ScoringService for FailingScorer {
    fn name(&self) -> &str {
        "failing"
    }

    async fn score(&self, _request: &PredictorRequest) -> RiskResult<PredictorResponse> {
        Err(RiskError::PredictorUnavailable("connection refused".to_string()))
    }
}

pub struct SlowScorer(pub Duration);

#[async_trait]
impl ScoringService for SlowScorer {
    fn name(&self) -> &str {
        "slow"
    }

    async fn score(&self, _request: &PredictorRequest) -> RiskResult<PredictorResponse> {
        tokio::time::sleep(self.0).await;
        Ok(high_risk_response())
    }
}

pub async fn service(
    dir: &tempfile::TempDir,
    timeout_ms: u64,
    scorer: Arc<dyn ScoringService>,
) -> anyhow::Result<RiskService> {
    let service = RiskService::with_scoring_service(test_config(dir, timeout_ms), scorer).await?;
    service.start_components().await;
    Ok(service)
}

pub async fn seed_student(service: &RiskService, id: &str) -> anyhow::Result<()> {
    service
        .storage()
        .insert_student(&Student {
            id: id.to_string(),
            given_names: "Lucía".to_string(),
            surnames: "Mamani".to_string(),
            semester: 3,
        })
        .await?;
    Ok(())
}

pub async fn seed_subject(service: &RiskService, id: &str, name: &str) -> anyhow::Result<()> {
    service
        .storage()
        .insert_subject(&Subject {
            id: id.to_string(),
            name: name.to_string(),
        })
        .await?;
    Ok(())
}

pub async fn seed_habits(service: &RiskService, student_id: &str, hours: f64) -> anyhow::Result<()> {
    service
        .storage()
        .insert_study_habit(&StudyHabit {
            student_id: student_id.to_string(),
            recorded_at: chrono::Utc::now(),
            weekly_hours: hours,
            uses_techniques: false,
            participation: Participation::Baja,
            task_submission_pct: 50.0,
        })
        .await?;
    Ok(())
}

/// Polls until the student has at least `expected` notifications or the wait expires.
pub async fn wait_for_notifications(
    service: &RiskService,
    student_id: &str,
    expected: usize,
) -> anyhow::Result<usize> {
    for _ in 0..100 {
        let found = service.notifications().list(student_id, None).await?.len();
        if found >= expected {
            return Ok(found);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(service.notifications().list(student_id, None).await?.len())
}
