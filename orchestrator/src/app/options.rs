//! Application configuration options

use std::time::Duration;

use crate::deploy::EngineConfig;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{EngineSettings, Settings};
use crate::workers::prober;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Data directory layout
    pub layout: StorageLayout,

    /// Local HTTP server
    pub server: ServerOptions,

    /// Engine and external tool settings
    pub engine: EngineSettings,

    /// Enable the background prober
    pub enable_prober: bool,

    /// Prober worker options
    pub prober: prober::Options,
}

impl AppOptions {
    /// Runtime options from the settings file
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
                cors_origins: settings.server.cors_origins.clone(),
            },
            engine: settings.engine.clone(),
            enable_prober: settings.prober.enabled,
            prober: prober::Options {
                interval: Duration::from_secs(settings.prober.interval_secs.max(1)),
                ..Default::default()
            },
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::from_settings(&self.engine, self.layout.staging_dir().path().to_path_buf())
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), StorageLayout::default())
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,

    /// Time in-flight runs get to wind down after cancellation
    pub run_drain_timeout: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
            run_drain_timeout: Duration::from_secs(20),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Browser origins allowed by CORS; empty allows any
    pub cors_origins: Vec<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8340,
            cors_origins: Vec::new(),
        }
    }
}
