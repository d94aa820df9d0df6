use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::attendance::AttendanceProcessor;
use crate::config::Config;
use crate::error::{RiskError, RiskResult};
use crate::grades::GradeRecorder;
use crate::metrics::MetricsCollector;
use crate::notifications::NotificationEmitter;
use crate::orchestrator::AssessmentOrchestrator;
use crate::predictor_client::{HttpScoringService, PredictorClient, ScoringService};
use crate::realtime::{EventBus, RealtimeEvent};
use crate::risk_engine::FallbackRiskEngine;
use crate::server::{ApiServer, AppState};
use crate::storage::StorageEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Initializing,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ServiceState {
    pub status: ServiceStatus,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub predictor_reachable: bool,
}

/// Owns every component and their start/stop order
pub struct RiskService {
    config: Config,
    storage: Arc<StorageEngine>,
    metrics: Arc<MetricsCollector>,
    bus: Arc<EventBus>,
    predictor: Arc<PredictorClient>,
    notifications: Arc<NotificationEmitter>,
    orchestrator: Arc<AssessmentOrchestrator>,
    attendance: Arc<AttendanceProcessor>,
    grades: Arc<GradeRecorder>,
    state: Arc<RwLock<ServiceState>>,
    shutdown: CancellationToken,
    server_handle: Mutex<Option<JoinHandle<anyhow::Result<()>>>>,
}

impl RiskService {
    pub async fn new(config: Config) -> RiskResult<Self> {
        let backend = HttpScoringService::new(&config.predictor)?;
        Self::with_scoring_service(config, Arc::new(backend)).await
    }

    /// Wires the service around an arbitrary scoring backend.
    pub async fn with_scoring_service(
        config: Config,
        backend: Arc<dyn ScoringService>,
    ) -> RiskResult<Self> {
        info!("🎓 Initializing edurisk service");

        config
            .validate()
            .map_err(|e| RiskError::ConfigError(e.to_string()))?;

        let metrics = Arc::new(
            MetricsCollector::new()
                .map_err(|e| RiskError::ConfigError(format!("metrics registry: {}", e)))?,
        );
        let storage = Arc::new(StorageEngine::new(&config.storage).await?);
        let bus = Arc::new(EventBus::new(
            config.realtime.channel_capacity,
            Arc::clone(&metrics),
        ));
        let predictor = Arc::new(PredictorClient::new(
            &config.predictor,
            backend,
            Arc::clone(&metrics),
        ));

        let notifications = Arc::new(NotificationEmitter::new(
            storage.clone(),
            Arc::clone(&bus),
            Arc::clone(&metrics),
        ));
        let orchestrator = Arc::new(AssessmentOrchestrator::new(
            storage.clone(),
            storage.clone(),
            storage.clone(),
            Arc::clone(&predictor),
            Arc::clone(&notifications),
            Arc::clone(&bus),
            Arc::clone(&metrics),
        )
        .with_fallback(FallbackRiskEngine::new(config.fallback.clone())));
        let attendance = Arc::new(AttendanceProcessor::new(
            storage.clone(),
            storage.clone(),
            Arc::clone(&notifications),
            Arc::clone(&bus),
            Arc::clone(&metrics),
        ));
        let grades = Arc::new(GradeRecorder::new(
            storage.clone(),
            storage.clone(),
            Arc::clone(&notifications),
            Arc::clone(&bus),
        ));

        let state = Arc::new(RwLock::new(ServiceState {
            status: ServiceStatus::Initializing,
            started_at: None,
            predictor_reachable: false,
        }));

        Ok(Self {
            config,
            storage,
            metrics,
            bus,
            predictor,
            notifications,
            orchestrator,
            attendance,
            grades,
            state,
            shutdown: CancellationToken::new(),
            server_handle: Mutex::new(None),
        })
    }

    /// Opens the event bus and probes the predictor; does not serve HTTP.
    pub async fn start_components(&self) {
        self.bus.start();

        let reachable = self.predictor.health().await;
        if reachable {
            info!(
                "🤖 Predictor reachable at {} (timeout {:?})",
                self.config.predictor.base_url,
                self.predictor.timeout()
            );
        } else {
            warn!(
                "⚠️ Predictor not reachable at {}, assessments will use the rule-based fallback until it recovers",
                self.config.predictor.base_url
            );
        }

        let mut state = self.state.write().await;
        state.status = ServiceStatus::Running;
        state.started_at = Some(chrono::Utc::now());
        state.predictor_reachable = reachable;
    }

    pub async fn start(&self) -> RiskResult<()> {
        self.start_components().await;

        let server = ApiServer::new(self.config.clone(), self.app_state());
        let token = self.shutdown.child_token();
        let handle = tokio::spawn(async move { server.start(token).await });
        *self.server_handle.lock().await = Some(handle);

        info!("🚀 edurisk service started");
        Ok(())
    }

    /// Resolves when the API server exits or shutdown is requested.
    pub async fn wait_for_completion(&self) -> RiskResult<()> {
        let handle = self.server_handle.lock().await.take();
        match handle {
            Some(handle) => match handle.await? {
                Ok(()) => Ok(()),
                Err(e) => Err(RiskError::ServerError(e.to_string())),
            },
            None => {
                self.shutdown.cancelled().await;
                Ok(())
            }
        }
    }

    pub async fn shutdown(&self) -> RiskResult<()> {
        self.state.write().await.status = ServiceStatus::Stopping;

        self.bus.publish(RealtimeEvent::notice(
            "warning",
            "Service is shutting down",
            None,
        ));
        self.shutdown.cancel();

        if let Some(handle) = self.server_handle.lock().await.take() {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!("❌ API server error during shutdown: {}", e),
                Ok(Err(e)) => error!("❌ API server task failed: {}", e),
                Err(_) => warn!("⏰ API server did not stop within 5s"),
            }
        }

        // In-flight assessments and their notifications still need storage
        if !self.orchestrator.drain(Duration::from_secs(5)).await {
            warn!("⏰ Assessment tasks did not finish within 5s");
        }

        self.bus.stop();
        self.storage.close().await;
        self.state.write().await.status = ServiceStatus::Stopped;
        info!("✅ edurisk service stopped");
        Ok(())
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            orchestrator: Arc::clone(&self.orchestrator),
            attendance: Arc::clone(&self.attendance),
            grades: Arc::clone(&self.grades),
            notifications: Arc::clone(&self.notifications),
            bus: Arc::clone(&self.bus),
            storage: Arc::clone(&self.storage),
            metrics: Arc::clone(&self.metrics),
        }
    }

    pub async fn get_state(&self) -> ServiceState {
        self.state.read().await.clone()
    }

    pub fn orchestrator(&self) -> &Arc<AssessmentOrchestrator> {
        &self.orchestrator
    }

    pub fn attendance(&self) -> &Arc<AttendanceProcessor> {
        &self.attendance
    }

    pub fn grades(&self) -> &Arc<GradeRecorder> {
        &self.grades
    }

    pub fn notifications(&self) -> &Arc<NotificationEmitter> {
        &self.notifications
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }
}
