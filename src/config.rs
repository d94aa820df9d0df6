use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::risk_engine::RiskThresholds;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub system: SystemConfig,
    pub predictor: PredictorConfig,
    pub storage: StorageConfig,
    pub realtime: RealtimeConfig,
    pub network: NetworkConfig,
    /// Rule-based fallback cut-offs
    #[serde(default)]
    pub fallback: RiskThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Log level
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// When disabled every assessment goes straight to the rule-based fallback
    pub enabled: bool,
    /// Base URL of the external scoring service
    pub base_url: String,
    /// Bounded wait for a single scoring call, in milliseconds
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path
    pub db_path: String,
    /// Connection pool size
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Per-subscriber buffer; slower subscribers skip ahead
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// API server port
    pub api_port: u16,
    /// Bind address
    pub bind_address: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system: SystemConfig {
                log_level: "info".to_string(),
            },
            predictor: PredictorConfig {
                enabled: true,
                base_url: "http://localhost:8000".to_string(),
                timeout_ms: 5000,
            },
            storage: StorageConfig {
                db_path: "./data/edurisk.db".to_string(),
                max_connections: 10,
            },
            realtime: RealtimeConfig {
                channel_capacity: 1024,
            },
            network: NetworkConfig {
                api_port: 4000,
                bind_address: "0.0.0.0".to_string(),
            },
            fallback: RiskThresholds::default(),
        }
    }
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            // Create default config file
            let default_config = Self::default();
            default_config.save(path).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(path).await?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;

        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.predictor.timeout_ms == 0 || self.predictor.timeout_ms > 30_000 {
            anyhow::bail!(
                "Predictor timeout {}ms is outside allowed range 1-30000ms",
                self.predictor.timeout_ms
            );
        }

        if !(self.predictor.base_url.starts_with("http://")
            || self.predictor.base_url.starts_with("https://"))
        {
            anyhow::bail!(
                "Predictor URL {} must use http or https",
                self.predictor.base_url
            );
        }

        if self.realtime.channel_capacity == 0 {
            anyhow::bail!("Realtime channel capacity must be greater than zero");
        }

        if self.storage.max_connections == 0 {
            anyhow::bail!("Storage pool needs at least one connection");
        }

        if self.network.api_port == 0 {
            anyhow::bail!("API port must be set");
        }

        let t = &self.fallback;
        if t.high_grade_below > t.medium_grade_below
            || t.high_attendance_below > t.medium_attendance_below
        {
            anyhow::bail!("Fallback Alto cut-offs must not exceed the Medio cut-offs");
        }

        Ok(())
    }
}
