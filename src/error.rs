use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Predictor unavailable: {0}")]
    PredictorUnavailable(String),

    #[error("Notification error: {0}")]
    NotificationFailure(String),

    #[error("Batch item failed for student {student_id}: {reason}")]
    BatchItemFailure { student_id: String, reason: String },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

impl RiskError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        RiskError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Recoverable errors are absorbed locally and never fail the parent operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RiskError::PredictorUnavailable(_)
                | RiskError::NotificationFailure(_)
                | RiskError::BatchItemFailure { .. }
                | RiskError::HttpError(_)
                | RiskError::TimeoutError(_)
        )
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RiskError::ConfigError(_) => ErrorSeverity::Critical,
            RiskError::SqlError(_) => ErrorSeverity::High,
            RiskError::StorageError(_) => ErrorSeverity::High,
            RiskError::IoError(_) => ErrorSeverity::High,
            RiskError::ServerError(_) => ErrorSeverity::High,
            RiskError::NotFound { .. } => ErrorSeverity::Medium,
            RiskError::Conflict(_) => ErrorSeverity::Medium,
            RiskError::ValidationError(_) => ErrorSeverity::Medium,
            RiskError::PredictorUnavailable(_) => ErrorSeverity::Low,
            RiskError::NotificationFailure(_) => ErrorSeverity::Low,
            RiskError::BatchItemFailure { .. } => ErrorSeverity::Low,
            _ => ErrorSeverity::Medium,
        }
    }

    /// Short machine-readable tag used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            RiskError::NotFound { .. } => "not_found",
            RiskError::Conflict(_) => "conflict",
            RiskError::ValidationError(_) => "validation",
            RiskError::PredictorUnavailable(_) => "predictor_unavailable",
            RiskError::NotificationFailure(_) => "notification_failure",
            RiskError::BatchItemFailure { .. } => "batch_item_failure",
            _ => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorSeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Critical => "CRITICAL",
            ErrorSeverity::High => "HIGH",
            ErrorSeverity::Medium => "MEDIUM",
            ErrorSeverity::Low => "LOW",
        }
    }
}

pub type RiskResult<T> = Result<T, RiskError>;
