//! Risk assessment orchestration.
//!
//! One call walks a single row through its lifecycle:
//!
//! 1. the student is resolved and a metric snapshot taken,
//! 2. a `Calculando` row is inserted,
//! 3. the external predictor is asked, falling back to the rule engine on any
//!    failure,
//! 4. the row is finalized (`Completado` or `CompletadoFallback`), or marked
//!    `Error` if finalizing itself fails,
//! 5. notification and broadcast run after the caller has its result.
//!
//! Steps 2-5 run on a tracked task. Dropping the caller's future does not
//! abandon the row, and shutdown can wait for every in-flight assessment and
//! follow-up through [`AssessmentOrchestrator::drain`].
//!
//! Concurrent calls for the same student are independent and each produce
//! their own row.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{RiskError, RiskResult};
use crate::metrics::MetricsCollector;
use crate::models::{AssessmentState, RiskAssessment, RiskLevel, Student, StudentMetricSnapshot};
use crate::notifications::{NotificationEmitter, NotificationEvent};
use crate::predictor_client::PredictorClient;
use crate::realtime::{EventBus, RealtimeEvent, PREDICCION_CREATED};
use crate::risk_engine::FallbackRiskEngine;
use crate::storage::{AssessmentStore, MetricSnapshotProvider, StudentDirectory};

/// Model id carried by a row while it is still `Calculando`
pub const PENDING_MODEL: &str = "pending";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentOutcome {
    pub assessment: RiskAssessment,
    pub fallback_used: bool,
    pub advisory: Option<String>,
}

pub struct AssessmentOrchestrator {
    directory: Arc<dyn StudentDirectory>,
    snapshots: Arc<dyn MetricSnapshotProvider>,
    pipeline: Pipeline,
}

/// Everything the row lifecycle needs, cloned onto each tracked task
#[derive(Clone)]
struct Pipeline {
    store: Arc<dyn AssessmentStore>,
    predictor: Arc<PredictorClient>,
    fallback: FallbackRiskEngine,
    emitter: Arc<NotificationEmitter>,
    bus: Arc<EventBus>,
    metrics: Arc<MetricsCollector>,
    tasks: TaskTracker,
}

impl AssessmentOrchestrator {
    pub fn new(
        directory: Arc<dyn StudentDirectory>,
        snapshots: Arc<dyn MetricSnapshotProvider>,
        store: Arc<dyn AssessmentStore>,
        predictor: Arc<PredictorClient>,
        emitter: Arc<NotificationEmitter>,
        bus: Arc<EventBus>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        info!("🛡️  Initializing assessment orchestrator");
        Self {
            directory,
            snapshots,
            pipeline: Pipeline {
                store,
                predictor,
                fallback: FallbackRiskEngine::default(),
                emitter,
                bus,
                metrics,
                tasks: TaskTracker::new(),
            },
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackRiskEngine) -> Self {
        self.pipeline.fallback = fallback;
        self
    }

    pub async fn assess(&self, student_id: &str, period: Option<String>) -> RiskResult<AssessmentOutcome> {
        let student = self
            .directory
            .find_student(student_id)
            .await?
            .ok_or_else(|| RiskError::not_found("Student", student_id))?;

        let snapshot = self.snapshots.snapshot(&student).await?;

        let pipeline = self.pipeline.clone();
        let handle = self
            .pipeline
            .tasks
            .spawn(async move { pipeline.run(student, snapshot, period).await });

        handle.await?
    }

    /// Closes the task tracker and waits up to `limit` for in-flight
    /// assessments and their follow-ups. Returns false if the wait timed out.
    pub async fn drain(&self, limit: Duration) -> bool {
        self.pipeline.tasks.close();
        if self.pipeline.tasks.is_empty() {
            return true;
        }

        info!(
            "⏳ Waiting for {} assessment task(s) to finish",
            self.pipeline.tasks.len()
        );
        tokio::time::timeout(limit, self.pipeline.tasks.wait())
            .await
            .is_ok()
    }

    /// Newest first. Rows still `Calculando` are included and carry the
    /// placeholder level `Medio` and model [`PENDING_MODEL`].
    pub async fn history(&self, student_id: &str) -> RiskResult<Vec<RiskAssessment>> {
        self.pipeline.store.assessments_for_student(student_id).await
    }

    pub async fn find(&self, id: &str) -> RiskResult<RiskAssessment> {
        self.pipeline
            .store
            .find_assessment(id)
            .await?
            .ok_or_else(|| RiskError::not_found("Assessment", id))
    }

    /// Same placeholder caveat as [`Self::history`].
    pub async fn list_all(&self) -> RiskResult<Vec<RiskAssessment>> {
        self.pipeline.store.list_assessments().await
    }
}

impl Pipeline {
    async fn run(
        self,
        student: Student,
        snapshot: StudentMetricSnapshot,
        period: Option<String>,
    ) -> RiskResult<AssessmentOutcome> {
        let mut assessment = RiskAssessment {
            id: Uuid::new_v4().to_string(),
            student_id: student.id.clone(),
            assessed_at: Utc::now(),
            risk_level: RiskLevel::Medio,
            probability: None,
            score: None,
            key_factors: String::new(),
            recommendations: Vec::new(),
            state: AssessmentState::Calculando,
            model: PENDING_MODEL.to_string(),
            period,
        };
        self.store.insert_assessment(&assessment).await?;

        let (fallback_used, advisory) = match self.predictor.predict(&student, &snapshot).await {
            Ok(prediction) => {
                assessment.risk_level = prediction.risk_level;
                assessment.probability = Some(prediction.probability_pct);
                assessment.score = Some(prediction.score);
                assessment.key_factors = prediction.key_factors.join(", ");
                assessment.recommendations = prediction.recommendations;
                assessment.model = prediction.model_version;
                assessment.state = AssessmentState::Completado;
                (false, None)
            }
            Err(e) => {
                warn!("⚠️ Falling back to rule-based assessment for {}: {}", student.id, e);
                let result = self.fallback.assess(&snapshot);
                assessment.risk_level = result.risk_level;
                assessment.key_factors = result.joined_factors();
                assessment.model = result.model.to_string();
                assessment.state = AssessmentState::CompletadoFallback;
                (
                    true,
                    Some(format!(
                        "Prediction service unavailable ({}); result produced by rule-based fallback",
                        e
                    )),
                )
            }
        };

        if let Err(e) = self.store.finalize_assessment(&assessment).await {
            error!("❌ Failed to finalize assessment {}: {}", assessment.id, e);
            if let Err(mark_err) = self.store.mark_assessment_error(&assessment.id).await {
                error!(
                    "❌ Could not mark assessment {} as Error: {}",
                    assessment.id, mark_err
                );
            }
            return Err(e);
        }

        self.metrics.record_assessment(fallback_used);
        info!(
            "✅ Assessment {} for {}: {} ({})",
            assessment.id,
            student.id,
            assessment.risk_level,
            assessment.state.as_str()
        );

        self.spawn_follow_up(&student, &assessment);

        Ok(AssessmentOutcome {
            assessment,
            fallback_used,
            advisory,
        })
    }

    // Tracked so shutdown can wait for it; never delays or fails the caller.
    fn spawn_follow_up(&self, student: &Student, assessment: &RiskAssessment) {
        let emitter = Arc::clone(&self.emitter);
        let bus = Arc::clone(&self.bus);
        let assessment = assessment.clone();
        let payload = json!({
            "assessment": &assessment,
            "given_names": student.given_names,
            "surnames": student.surnames,
        });

        self.tasks.spawn(async move {
            let factors = assessment
                .key_factors
                .split(", ")
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();

            emitter
                .notify(
                    &assessment.student_id,
                    NotificationEvent::Prediction {
                        assessment_id: assessment.id.clone(),
                        risk_level: assessment.risk_level,
                        key_factors: factors,
                    },
                )
                .await;

            bus.publish(RealtimeEvent::new(PREDICCION_CREATED, payload));
        });
    }
}
