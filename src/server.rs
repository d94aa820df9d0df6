use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, patch, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info};

use crate::attendance::{AttendanceProcessor, BatchRequest, SingleAttendanceInput};
use crate::models::AttendanceStatus;
use crate::config::Config;
use crate::error::{ErrorSeverity, RiskError};
use crate::grades::{GradeInput, GradeRecorder};
use crate::metrics::MetricsCollector;
use crate::notifications::NotificationEmitter;
use crate::orchestrator::AssessmentOrchestrator;
use crate::realtime::{EventBus, RealtimeEvent, Subscription};
use crate::storage::StorageEngine;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<AssessmentOrchestrator>,
    pub attendance: Arc<AttendanceProcessor>,
    pub grades: Arc<GradeRecorder>,
    pub notifications: Arc<NotificationEmitter>,
    pub bus: Arc<EventBus>,
    pub storage: Arc<StorageEngine>,
    pub metrics: Arc<MetricsCollector>,
}

pub struct ApiServer {
    config: Config,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: Config, state: AppState) -> Self {
        Self { config, state }
    }

    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let app = create_router(self.state.clone());

        let addr = format!(
            "{}:{}",
            self.config.network.bind_address, self.config.network.api_port
        );

        info!("🌐 Starting API server on {}", addr);

        let listener = TcpListener::bind(&addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("🌐 API server stopped");
        Ok(())
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // Risk assessments
        .route("/api/v1/predicciones", get(list_assessments_handler))
        .route("/api/v1/predicciones/generar", post(generate_assessment_handler))
        .route("/api/v1/predicciones/:id", get(get_assessment_handler))
        .route(
            "/api/v1/predicciones/estudiante/:id",
            get(student_assessments_handler),
        )
        // Attendance
        .route("/api/v1/asistencias", post(single_attendance_handler))
        .route("/api/v1/asistencias/lote", post(batch_attendance_handler))
        .route("/api/v1/asistencias/:id", patch(update_attendance_handler))
        .route(
            "/api/v1/asistencias/estudiante/:id",
            get(student_attendance_handler),
        )
        .route(
            "/api/v1/asistencias/estudiante/:id/resumen",
            get(attendance_summary_handler),
        )
        // Grades
        .route("/api/v1/calificaciones", post(record_grade_handler))
        .route("/api/v1/calificaciones/:id", patch(update_grade_handler))
        // Notifications
        .route(
            "/api/v1/notificaciones/estudiante/:id",
            get(list_notifications_handler),
        )
        .route(
            "/api/v1/notificaciones/estudiante/:id/no-leidas",
            get(unread_notifications_handler),
        )
        .route(
            "/api/v1/notificaciones/estudiante/:id/no-leidas/count",
            get(count_unread_handler),
        )
        .route(
            "/api/v1/notificaciones/estudiante/:id/leer-todas",
            patch(mark_all_read_handler),
        )
        .route(
            "/api/v1/notificaciones/:id/leida",
            patch(mark_read_handler),
        )
        .route("/api/v1/notificaciones/:id", delete(delete_notification_handler))
        // Realtime
        .route("/ws", get(shared_websocket_handler))
        .route("/ws/estudiante/:id", get(student_websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// JSON error body `{error, message}` with a status derived from the error kind
pub struct ApiError(RiskError);

impl From<RiskError> for ApiError {
    fn from(err: RiskError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RiskError::NotFound { .. } => StatusCode::NOT_FOUND,
            RiskError::Conflict(_) => StatusCode::CONFLICT,
            RiskError::ValidationError(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match self.0.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!("❌ Request failed [{}]: {}", self.0.severity().as_str(), self.0)
            }
            _ => debug!("Request rejected: {}", self.0),
        }

        let body = json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn to_json<T: serde::Serialize>(value: &T) -> ApiResult {
    Ok(Json(serde_json::to_value(value).map_err(RiskError::from)?))
}

async fn health_handler(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let storage = state.storage.get_state().await;
    let running = state.bus.is_running();

    let response = json!({
        "status": if running { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": crate::VERSION,
        "realtime_running": running,
        "storage": {
            "assessments_stored": storage.assessments_stored,
            "notifications_stored": storage.notifications_stored,
            "attendance_writes": storage.attendance_writes,
            "grades_stored": storage.grades_stored,
        },
    });

    Ok(Json(response))
}

async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .gather()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[derive(Deserialize)]
struct GenerateRequest {
    #[serde(alias = "id_estudiante")]
    student_id: String,
    #[serde(default, alias = "periodo")]
    period: Option<String>,
}

async fn generate_assessment_handler(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult {
    let outcome = state
        .orchestrator
        .assess(&request.student_id, request.period)
        .await?;
    to_json(&outcome)
}

async fn list_assessments_handler(State(state): State<AppState>) -> ApiResult {
    to_json(&state.orchestrator.list_all().await?)
}

async fn get_assessment_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    to_json(&state.orchestrator.find(&id).await?)
}

async fn student_assessments_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    to_json(&state.orchestrator.history(&id).await?)
}

async fn batch_attendance_handler(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> ApiResult {
    to_json(&state.attendance.process_batch(request).await?)
}

async fn single_attendance_handler(
    State(state): State<AppState>,
    Json(input): Json<SingleAttendanceInput>,
) -> ApiResult {
    to_json(&state.attendance.record_single(input).await?)
}

#[derive(Deserialize)]
struct StatusUpdate {
    #[serde(alias = "estado")]
    status: AttendanceStatus,
}

async fn update_attendance_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult {
    to_json(&state.attendance.update_status(&id, update.status).await?)
}

async fn student_attendance_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    to_json(&state.attendance.records_for_student(&id).await?)
}

async fn attendance_summary_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    to_json(&state.attendance.summary_for_student(&id).await?)
}

async fn record_grade_handler(
    State(state): State<AppState>,
    Json(input): Json<GradeInput>,
) -> ApiResult {
    to_json(&state.grades.record(input).await?)
}

#[derive(Deserialize)]
struct GradeUpdate {
    #[serde(alias = "calificacion")]
    grade: f64,
}

async fn update_grade_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<GradeUpdate>,
) -> ApiResult {
    to_json(&state.grades.update(&id, update.grade).await?)
}

#[derive(Deserialize)]
struct LimitQuery {
    limite: Option<i64>,
}

async fn list_notifications_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult {
    to_json(&state.notifications.list(&id, query.limite).await?)
}

async fn unread_notifications_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    to_json(&state.notifications.unread(&id).await?)
}

async fn count_unread_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    let count = state.notifications.count_unread(&id).await?;
    Ok(Json(json!({ "count": count })))
}

async fn mark_read_handler(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.notifications.mark_read(&id).await?;
    Ok(Json(json!({ "id": id, "read": true })))
}

async fn mark_all_read_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    let updated = state.notifications.mark_all_read(&id).await?;
    Ok(Json(json!({ "updated": updated })))
}

async fn delete_notification_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    state.notifications.delete(&id).await?;
    Ok(Json(json!({ "id": id, "deleted": true })))
}

async fn shared_websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    match state.bus.subscribe() {
        Some(subscription) => ws.on_upgrade(move |socket| stream_events(socket, subscription)),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn student_websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.bus.subscribe_student(&id) {
        Some(subscription) => ws.on_upgrade(move |socket| stream_events(socket, subscription)),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

fn event_frame(event: &RealtimeEvent) -> Value {
    json!({
        "event": event.name,
        "target": event.target,
        "data": event.payload,
        "emitted_at": event.emitted_at.to_rfc3339(),
    })
}

async fn stream_events(mut socket: WebSocket, mut subscription: Subscription) {
    info!("📡 WebSocket connection established");

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let frame = event_frame(&event);
                if socket.send(Message::Text(frame.to_string())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(other)) => debug!("Ignoring client frame: {:?}", other),
                }
            }
        }
    }

    info!("📡 WebSocket connection closed");
}
