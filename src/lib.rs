//! # edurisk - Student dropout-risk assessment and notification service
//!
//! Scores students through an external predictor with a rule-based fallback,
//! records attendance and grades, notifies students, and fans events out to
//! connected dashboards in real time.

pub mod attendance;
pub mod config;
pub mod core;
pub mod error;
pub mod grades;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod orchestrator;
pub mod predictor_client;
pub mod realtime;
pub mod risk_engine;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use config::Config;
pub use core::RiskService;
pub use error::{RiskError, RiskResult};
pub use metrics::MetricsCollector;

/// edurisk version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// edurisk build information
pub const BUILD_INFO: &str = concat!("edurisk v", env!("CARGO_PKG_VERSION"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.starts_with("0.1"));
    }

    #[test]
    fn test_build_info() {
        assert!(BUILD_INFO.starts_with("edurisk v"));
    }
}
