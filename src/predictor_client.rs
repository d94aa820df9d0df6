//! Client for the external dropout-risk scoring service.
//!
//! Every failure mode (timeout, transport error, non-2xx status, undecodable
//! or out-of-range body, disabled predictor) surfaces as
//! [`RiskError::PredictorUnavailable`] so callers have a single signal to
//! fall back on.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::PredictorConfig;
use crate::error::{RiskError, RiskResult};
use crate::metrics::MetricsCollector;
use crate::models::{Participation, RiskLevel, Student, StudentMetricSnapshot};

/// Wire payload for `POST /predict`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorRequest {
    pub id_estudiante: String,
    pub nombres: String,
    pub apellidos: String,
    pub semestre_actual: i64,
    pub notas_promedio: f64,
    pub notas_examenes_promedio: f64,
    pub entregas_tareas_porcentaje: f64,
    pub asistencia_porcentaje: f64,
    pub horas_estudio_semana: f64,
    pub participacion_clase: String,
    pub usa_tecnicas_estudio: bool,
}

impl PredictorRequest {
    /// Unknown metrics are sent as 0; participation defaults to "media".
    pub fn from_snapshot(student: &Student, snapshot: &StudentMetricSnapshot) -> Self {
        Self {
            id_estudiante: student.id.clone(),
            nombres: student.given_names.clone(),
            apellidos: student.surnames.clone(),
            semestre_actual: snapshot.semester.unwrap_or(student.semester),
            notas_promedio: snapshot.grade_avg.unwrap_or(0.0),
            notas_examenes_promedio: snapshot.exam_avg.unwrap_or(0.0),
            entregas_tareas_porcentaje: snapshot.task_submission_pct.unwrap_or(0.0),
            asistencia_porcentaje: snapshot.attendance_pct.unwrap_or(0.0),
            horas_estudio_semana: snapshot.study_hours_week.unwrap_or(0.0),
            participacion_clase: snapshot
                .participation
                .unwrap_or(Participation::Media)
                .as_str()
                .to_string(),
            usa_tecnicas_estudio: snapshot.uses_study_techniques.unwrap_or(false),
        }
    }
}

/// Raw response body. All fields are required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorResponse {
    pub riesgo: String,
    pub probabilidad: f64,
    pub puntuacion: f64,
    pub factores_criticos: Vec<String>,
    pub recomendaciones: Vec<String>,
    pub fecha_prediccion: String,
    pub modelo_version: String,
}

/// Validated prediction with the risk level normalized and the probability
/// rescaled to a percentage.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub risk_level: RiskLevel,
    pub probability_pct: f64,
    pub score: f64,
    pub key_factors: Vec<String>,
    pub recommendations: Vec<String>,
    pub model_version: String,
}

impl PredictorResponse {
    pub fn validate(self) -> RiskResult<Prediction> {
        let risk_level: RiskLevel = self
            .riesgo
            .parse()
            .map_err(|_| unavailable(format!("unknown risk label '{}'", self.riesgo)))?;

        if !(0.0..=1.0).contains(&self.probabilidad) {
            return Err(unavailable(format!(
                "probability {} outside [0, 1]",
                self.probabilidad
            )));
        }
        if !(0.0..=100.0).contains(&self.puntuacion) {
            return Err(unavailable(format!(
                "score {} outside [0, 100]",
                self.puntuacion
            )));
        }
        if self.modelo_version.trim().is_empty() {
            return Err(unavailable("empty model version".to_string()));
        }

        Ok(Prediction {
            risk_level,
            probability_pct: self.probabilidad * 100.0,
            score: self.puntuacion,
            key_factors: self.factores_criticos,
            recommendations: self.recomendaciones,
            model_version: self.modelo_version,
        })
    }
}

/// Pluggable scoring backend
#[async_trait]
pub trait ScoringService: Send + Sync {
    fn name(&self) -> &str;
    async fn score(&self, request: &PredictorRequest) -> RiskResult<PredictorResponse>;

    async fn health(&self) -> RiskResult<()> {
        Ok(())
    }
}

/// HTTP backend talking to the scoring service over JSON
pub struct HttpScoringService {
    client: Client,
    base_url: String,
}

impl HttpScoringService {
    pub fn new(config: &PredictorConfig) -> RiskResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ScoringService for HttpScoringService {
    fn name(&self) -> &str {
        "http"
    }

    async fn score(&self, request: &PredictorRequest) -> RiskResult<PredictorResponse> {
        let url = format!("{}/predict", self.base_url);
        debug!("Posting prediction request for {} to {}", request.id_estudiante, url);

        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(unavailable(format!("status {}: {}", status, body)));
        }

        Ok(response.json::<PredictorResponse>().await?)
    }

    async fn health(&self) -> RiskResult<()> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(unavailable(format!("health returned {}", response.status())));
        }
        Ok(())
    }
}

pub struct PredictorClient {
    backend: Arc<dyn ScoringService>,
    timeout: Duration,
    enabled: bool,
    metrics: Arc<MetricsCollector>,
}

impl PredictorClient {
    pub fn new(
        config: &PredictorConfig,
        backend: Arc<dyn ScoringService>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        info!(
            "🤖 Initializing predictor client ({} backend, timeout {}ms, enabled: {})",
            backend.name(),
            config.timeout_ms,
            config.enabled
        );

        Self {
            backend,
            timeout: Duration::from_millis(config.timeout_ms),
            enabled: config.enabled,
            metrics,
        }
    }

    /// Builds the client on top of the HTTP backend.
    pub fn http(config: &PredictorConfig, metrics: Arc<MetricsCollector>) -> RiskResult<Self> {
        let backend = HttpScoringService::new(config)?;
        Ok(Self::new(config, Arc::new(backend), metrics))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One attempt, no retries. The wait is bounded by the configured timeout
    /// regardless of backend.
    pub async fn predict(
        &self,
        student: &Student,
        snapshot: &StudentMetricSnapshot,
    ) -> RiskResult<Prediction> {
        if !self.enabled {
            return Err(unavailable("predictor disabled".to_string()));
        }

        let request = PredictorRequest::from_snapshot(student, snapshot);
        let started = Instant::now();

        let result = tokio::time::timeout(self.timeout, self.backend.score(&request)).await;
        self.metrics
            .predictor_latency_ms
            .observe(started.elapsed().as_secs_f64() * 1000.0);

        let response = match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("⚠️ Predictor call failed for {}: {}", student.id, e);
                return Err(as_unavailable(e));
            }
            Err(_) => {
                warn!(
                    "⏰ Predictor timed out after {}ms for {}",
                    self.timeout.as_millis(),
                    student.id
                );
                return Err(unavailable(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        let prediction = response.validate().map_err(|e| {
            warn!("⚠️ Predictor returned an invalid body for {}: {}", student.id, e);
            e
        })?;

        debug!(
            "🤖 Prediction for {}: {} ({:.1}%) via {}",
            student.id, prediction.risk_level, prediction.probability_pct, prediction.model_version
        );
        Ok(prediction)
    }

    /// Never fails start-up; reports whether the backend answered.
    pub async fn health(&self) -> bool {
        if !self.enabled {
            return false;
        }
        matches!(
            tokio::time::timeout(self.timeout, self.backend.health()).await,
            Ok(Ok(()))
        )
    }
}

fn unavailable(reason: String) -> RiskError {
    RiskError::PredictorUnavailable(reason)
}

fn as_unavailable(err: RiskError) -> RiskError {
    match err {
        RiskError::PredictorUnavailable(_) => err,
        other => RiskError::PredictorUnavailable(other.to_string()),
    }
}
