/// Configuration management for the pipewright service
///
/// Handles server binding, database location and scheduler parameters.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Trigger scheduling and execution configuration
    pub scheduler: SchedulerConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding pipewright.db (default: "data")
    pub data_dir: String,
}

impl DatabaseConfig {
    /// Path of the SQLite database file
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("pipewright.db")
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pipelines fetched per page during the startup trigger reload
    pub reload_batch_size: i64,
    /// File root directory handed to every executor
    pub file_root_dir: String,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("PIPEWRIGHT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("PIPEWRIGHT_PORT")
                    .unwrap_or_else(|_| "3004".to_string())
                    .parse()
                    .unwrap_or(3004),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("PIPEWRIGHT_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            },
            scheduler: SchedulerConfig {
                reload_batch_size: std::env::var("PIPEWRIGHT_RELOAD_BATCH")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|size: &i64| *size > 0)
                    .unwrap_or(20),
                file_root_dir: std::env::var("PIPEWRIGHT_FILE_ROOT")
                    .unwrap_or_else(|_| "data/files".to_string()),
            },
        }
    }
}
